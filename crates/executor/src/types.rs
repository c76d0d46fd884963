//! 执行器类型定义

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 待发送的交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    /// 随交易发送的原生币数量
    pub value: U256,
    /// 日志中使用的简短描述，例如 "claim 0xabc.."
    pub label: String,
}

impl TxRequest {
    pub fn new(to: Address, data: Bytes, label: impl Into<String>) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
            label: label.into(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// 已确认交易的回执摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    pub effective_gas_price: U256,
}

impl TxReceipt {
    /// 实际支付的 L2 执行 gas 费用
    pub fn gas_cost(&self) -> U256 {
        self.gas_used.saturating_mul(self.effective_gas_price)
    }
}

/// 链上交互错误
///
/// 是否重试只由 [`ChainError::is_retryable`] 决定，调用方不再解析错误文本
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transient RPC error: {0}")]
    Transient(String),

    #[error("Provider error: {0}")]
    Rpc(String),

    #[error("Transaction reverted: {reason}")]
    Reverted { tx_hash: Option<H256>, reason: String },

    #[error("Timeout waiting for transaction {0:?}")]
    Timeout(H256),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Failed to decode {0} response")]
    Decode(String),

    #[error("Client is read-only, refusing to send: {0}")]
    ReadOnly(String),
}

/// 临时性错误特征 (限流、超时、连接中断)
const TRANSIENT_PATTERNS: [&str; 11] = [
    "429",
    "too many requests",
    "rate limit",
    "limit exceeded",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "error sending request",
    "502 bad gateway",
    "503 service unavailable",
];

/// 表示限流的 JSON-RPC 错误码
const TRANSIENT_RPC_CODES: [i64; 3] = [-32005, -32090, 429];

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, ChainError::Reverted { .. })
    }

    /// 根据 JSON-RPC 错误码和消息分类
    pub fn from_rpc_response(code: i64, message: &str) -> Self {
        if TRANSIENT_RPC_CODES.contains(&code) {
            return ChainError::Transient(format!("({}) {}", code, message));
        }
        Self::classify(message)
    }

    /// 仅凭错误文本分类
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("revert") {
            return ChainError::Reverted {
                tx_hash: None,
                reason: message.to_string(),
            };
        }
        if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
            return ChainError::Transient(message.to_string());
        }
        ChainError::Rpc(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ChainError::classify("HTTP error 429 Too Many Requests").is_retryable());
        assert!(ChainError::classify("error sending request for url").is_retryable());
        assert!(ChainError::from_rpc_response(-32005, "daily request count exceeded").is_retryable());

        let err = ChainError::classify("execution reverted: STF");
        assert!(err.is_revert());
        assert!(!err.is_retryable());

        assert_eq!(
            ChainError::classify("nonce too low"),
            ChainError::Rpc("nonce too low".to_string())
        );
        assert!(!ChainError::Timeout(H256::zero()).is_retryable());
    }

    #[test]
    fn test_receipt_gas_cost() {
        let receipt = TxReceipt {
            tx_hash: H256::zero(),
            block_number: 1,
            gas_used: U256::from(21_000),
            effective_gas_price: U256::from(2_000_000_000u64),
        };
        assert_eq!(receipt.gas_cost(), U256::from(42_000_000_000_000u64));
    }
}
