//! 基于 ethers 的链上客户端
//!
//! 发送流程：估算 gas → 获取 gas price / nonce → 签名广播 (仅一次) → 轮询回执。
//! 广播之前的步骤遇到临时性错误会按 [`RetryPolicy`] 重试；广播之后只等待，不重发。

use async_trait::async_trait;
use config_crate::ChainConfig;
use ethers::prelude::*;
use ethers::providers::MiddlewareError;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::client::ChainClient;
use crate::retry::{with_retry, RetryPolicy};
use crate::revert_decoder::RevertDecoder;
use crate::types::{ChainError, TxReceipt, TxRequest};

/// 执行器配置
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub chain_id: u64,
    /// 交易确认超时 (秒)
    pub confirmation_timeout_secs: u64,
    /// 需要的确认数
    pub confirmations: usize,
    /// Gas 价格倍数
    pub gas_price_multiplier: f64,
    /// Gas 限制倍数 (相对估算值)
    pub gas_limit_multiplier: f64,
    pub retry: RetryPolicy,
    /// 回执轮询间隔
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chain_id: 8453,
            confirmation_timeout_secs: 120,
            confirmations: 1,
            gas_price_multiplier: 1.1,
            gas_limit_multiplier: 1.2,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&ChainConfig> for ExecutorConfig {
    fn from(config: &ChainConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            confirmation_timeout_secs: config.confirmation_timeout_secs,
            confirmations: config.confirmations.max(1),
            gas_price_multiplier: config.gas_price_multiplier,
            retry: RetryPolicy::new(config.max_retries, Duration::from_millis(config.retry_base_delay_ms)),
            ..Default::default()
        }
    }
}

/// 将 ethers 中间件错误归类为 [`ChainError`]
pub fn map_middleware_error<E: MiddlewareError>(e: E) -> ChainError {
    if let Some(resp) = e.as_error_response() {
        if resp.is_revert() {
            let reason = match resp.as_revert_data() {
                Some(data) if !data.is_empty() => RevertDecoder::decode_revert_data(&data).message,
                _ => resp.message.clone(),
            };
            return ChainError::Reverted { tx_hash: None, reason };
        }
        return ChainError::from_rpc_response(resp.code, &resp.message);
    }
    ChainError::classify(&e.to_string())
}

fn scale(value: U256, multiplier: f64) -> U256 {
    if multiplier <= 0.0 || !multiplier.is_finite() {
        return value;
    }
    U256::from((value.low_u128() as f64 * multiplier) as u128)
}

/// ethers 链上客户端
pub struct EthersChainClient<M: Middleware + 'static> {
    config: ExecutorConfig,
    provider: Arc<M>,
    signer: Option<SignerMiddleware<Arc<M>, LocalWallet>>,
    address: Address,
}

impl<M: Middleware + 'static> EthersChainClient<M> {
    /// 使用私钥创建可发送交易的客户端
    pub fn new(config: ExecutorConfig, provider: Arc<M>, private_key: &str) -> Result<Self, ChainError> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Wallet(e.to_string()))?
            .with_chain_id(config.chain_id);
        let address = wallet.address();
        let signer = SignerMiddleware::new(provider.clone(), wallet);

        info!(target: "trade_executor", "执行器已初始化: 链 {} | 钱包 {:?}", config.chain_id, address);

        Ok(Self {
            config,
            provider,
            signer: Some(signer),
            address,
        })
    }

    /// 只读客户端，`address` 仅用于查询余额与授权
    pub fn read_only(config: ExecutorConfig, provider: Arc<M>, address: Address) -> Self {
        info!(target: "trade_executor", "只读执行器: 链 {} | 地址 {:?}", config.chain_id, address);
        Self {
            config,
            provider,
            signer: None,
            address,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 获取 gas price
    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        let base_price = with_retry(&self.config.retry, "eth_gasPrice", || async {
            self.provider.get_gas_price().await.map_err(map_middleware_error)
        })
        .await?;
        Ok(scale(base_price, self.config.gas_price_multiplier))
    }

    async fn prepare(&self, request: &TxRequest) -> Result<TypedTransaction, ChainError> {
        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(self.address)
            .to(request.to)
            .data(request.data.clone())
            .value(request.value)
            .chain_id(self.config.chain_id)
            .into();

        // estimate_gas 底层也是 eth_call，revert 会在这里提前暴露
        let estimate = {
            let tx = &tx;
            with_retry(&self.config.retry, "eth_estimateGas", || async move {
                self.provider.estimate_gas(tx, None).await.map_err(map_middleware_error)
            })
            .await?
        };
        let gas_limit = scale(estimate, self.config.gas_limit_multiplier);
        let gas_price = self.get_gas_price().await?;
        let nonce = with_retry(&self.config.retry, "eth_getTransactionCount", || async {
            self.provider
                .get_transaction_count(self.address, Some(BlockNumber::Pending.into()))
                .await
                .map_err(map_middleware_error)
        })
        .await?;

        debug!(
            target: "trade_executor",
            "{} | Gas 估算: {} | Gas 限制: {} | Gas 价格: {} | nonce: {}",
            request.label, estimate, gas_limit, gas_price, nonce
        );

        tx.set_gas(gas_limit);
        tx.set_gas_price(gas_price);
        tx.set_nonce(nonce);
        Ok(tx)
    }

    /// 等待交易确认
    async fn wait_for_confirmation(&self, tx_hash: H256, tx: &TypedTransaction) -> Result<TransactionReceipt, ChainError> {
        let timeout = Duration::from_secs(self.config.confirmation_timeout_secs);
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                error!(target: "trade_executor", "等待确认超时: {:?}", tx_hash);
                return Err(ChainError::Timeout(tx_hash));
            }

            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status != Some(U64::from(1)) {
                        let block_num = receipt.block_number.map(|n| n.as_u64()).unwrap_or(0);
                        let reason = self.get_revert_reason(tx, receipt.block_number).await;

                        error!(target: "trade_executor", "❌ 交易 Revert!");
                        error!(target: "trade_executor", "   交易哈希: {:?}", tx_hash);
                        error!(target: "trade_executor", "   区块号: {}", block_num);
                        error!(target: "trade_executor", "   Revert 原因: {}", reason);

                        return Err(ChainError::Reverted {
                            tx_hash: Some(tx_hash),
                            reason,
                        });
                    }

                    if self.has_enough_confirmations(&receipt).await {
                        info!(target: "trade_executor", "交易确认成功: {:?} | Block: {:?}", tx_hash, receipt.block_number);
                        return Ok(receipt);
                    }
                }
                Ok(None) => debug!(target: "trade_executor", "等待交易确认: {:?}", tx_hash),
                Err(e) => warn!(target: "trade_executor", "获取交易回执失败: {:?}", e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn has_enough_confirmations(&self, receipt: &TransactionReceipt) -> bool {
        if self.config.confirmations <= 1 {
            return true;
        }
        let Some(mined) = receipt.block_number else {
            return false;
        };
        match self.provider.get_block_number().await {
            Ok(latest) => latest.as_u64().saturating_sub(mined.as_u64()) + 1 >= self.config.confirmations as u64,
            Err(e) => {
                warn!(target: "trade_executor", "获取最新区块失败: {:?}", e);
                false
            }
        }
    }

    /// 在 revert 的区块上重放交易以获取原因
    async fn get_revert_reason(&self, tx: &TypedTransaction, block_number: Option<U64>) -> String {
        let block_id = block_number.map(|n| BlockId::Number(BlockNumber::Number(n)));
        match self.provider.call(tx, block_id).await {
            Ok(_) => "Transaction succeeded in replay (unexpected)".to_string(),
            Err(e) => match map_middleware_error(e) {
                ChainError::Reverted { reason, .. } => reason,
                other => other.to_string(),
            },
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChainClient<M> {
    fn address(&self) -> Address {
        self.address
    }

    fn is_read_only(&self) -> bool {
        self.signer.is_none()
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().from(self.address).to(to).data(data).into();
        let tx = &tx;
        with_retry(&self.config.retry, "eth_call", || async move {
            self.provider.call(tx, None).await.map_err(map_middleware_error)
        })
        .await
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        with_retry(&self.config.retry, "eth_getBalance", || async {
            self.provider.get_balance(owner, None).await.map_err(map_middleware_error)
        })
        .await
    }

    async fn block_timestamp(&self) -> Result<u64, ChainError> {
        let block = with_retry(&self.config.retry, "eth_getBlockByNumber", || async {
            self.provider.get_block(BlockNumber::Latest).await.map_err(map_middleware_error)
        })
        .await?;
        block
            .map(|b| b.timestamp.low_u64())
            .ok_or_else(|| ChainError::Decode("latest block".to_string()))
    }

    async fn send_transaction(&self, request: TxRequest) -> Result<TxReceipt, ChainError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ChainError::ReadOnly(request.label.clone()))?;

        let tx = self.prepare(&request).await?;

        info!(target: "trade_executor", "📤 发送交易: {} → {:?}", request.label, request.to);
        let tx_hash = {
            let pending = signer
                .send_transaction(tx.clone(), None)
                .await
                .map_err(map_middleware_error)?;
            pending.tx_hash()
        };
        info!(target: "trade_executor", "交易已发送: {:?}", tx_hash);

        let receipt = self.wait_for_confirmation(tx_hash, &tx).await?;
        let result = TxReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            gas_used: receipt.gas_used.unwrap_or_default(),
            effective_gas_price: receipt.effective_gas_price.unwrap_or_default(),
        };
        info!(
            target: "trade_executor",
            "✅ {} 完成 | gas 使用: {} | gas 费用: {} wei",
            request.label,
            result.gas_used,
            result.gas_cost()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{self, Token};
    use ethers::providers::{JsonRpcError, MockProvider, MockResponse};

    // 公开的测试私钥
    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            poll_interval: Duration::from_millis(1),
            confirmation_timeout_secs: 5,
            ..Default::default()
        }
    }

    fn mocked() -> (Arc<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (Arc::new(provider), mock)
    }

    fn rpc_error(code: i64, message: &str, data: Option<serde_json::Value>) -> MockResponse {
        MockResponse::Error(JsonRpcError {
            code,
            message: message.to_string(),
            data,
        })
    }

    #[test]
    fn test_config_from_chain_config() {
        let chain = ChainConfig {
            chain_id: 8453,
            name: "base".into(),
            rpc_url: "http://localhost:8545".into(),
            private_key: None,
            contracts: config_crate::ChainContracts::base(),
            confirmation_timeout_secs: 60,
            confirmations: 0,
            gas_price_multiplier: 1.5,
            max_retries: 2,
            retry_base_delay_ms: 250,
        };
        let config = ExecutorConfig::from(&chain);
        assert_eq!(config.confirmations, 1);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(scale(U256::from(1_000), config.gas_price_multiplier), U256::from(1_500));
    }

    #[tokio::test]
    async fn test_call_retries_rate_limit() {
        let (provider, mock) = mocked();
        let client = EthersChainClient::read_only(fast_config(), provider, Address::repeat_byte(1));

        // MockProvider 从队尾取响应
        mock.push::<Bytes, _>(Bytes::from(vec![0xab])).unwrap();
        mock.push_response(rpc_error(-32005, "request rate exceeded", None));

        let result = client.call(Address::repeat_byte(2), Bytes::new()).await.unwrap();
        assert_eq!(result, Bytes::from(vec![0xab]));
    }

    #[tokio::test]
    async fn test_call_revert_is_decoded_and_not_retried() {
        let (provider, mock) = mocked();
        let client = EthersChainClient::read_only(fast_config(), provider, Address::repeat_byte(1));

        let mut data = ethers::utils::id("NotApproved(address)").to_vec();
        data.extend(abi::encode(&[Token::Address(Address::repeat_byte(1))]));
        mock.push_response(rpc_error(
            3,
            "execution reverted",
            Some(serde_json::Value::String(format!("0x{}", hex::encode(&data)))),
        ));

        let err = client.call(Address::repeat_byte(2), Bytes::new()).await.unwrap_err();
        match err {
            ChainError::Reverted { reason, .. } => assert!(reason.starts_with("NotApproved(")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_only_refuses_to_send() {
        let (provider, _mock) = mocked();
        let client = EthersChainClient::read_only(fast_config(), provider, Address::repeat_byte(1));
        assert!(client.is_read_only());

        let err = client
            .send_transaction(TxRequest::new(Address::repeat_byte(2), Bytes::new(), "claim"))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::ReadOnly("claim".to_string()));
    }

    #[tokio::test]
    async fn test_balance_helpers() {
        let (provider, mock) = mocked();
        let client = EthersChainClient::read_only(fast_config(), provider, Address::repeat_byte(1));

        mock.push(U256::from(42)).unwrap();
        assert_eq!(
            client.balance_of(Address::zero(), Address::repeat_byte(1)).await.unwrap(),
            U256::from(42)
        );

        mock.push::<Bytes, _>(Bytes::from(abi::encode(&[Token::Uint(U256::from(7))]))).unwrap();
        assert_eq!(
            client.balance_of(Address::repeat_byte(9), Address::repeat_byte(1)).await.unwrap(),
            U256::from(7)
        );
        assert_eq!(client.decimals(Address::zero()).await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_send_transaction_waits_for_receipt() {
        let (provider, mock) = mocked();
        let client = EthersChainClient::new(fast_config(), provider, TEST_KEY).unwrap();
        assert!(!client.is_read_only());

        let tx_hash = H256::repeat_byte(0x11);
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(100)),
            gas_used: Some(U256::from(150_000)),
            effective_gas_price: Some(U256::from(1_000_000)),
            status: Some(U64::from(1)),
            ..Default::default()
        };

        // 请求顺序: estimateGas, gasPrice, getTransactionCount, sendRawTransaction, getTransactionReceipt
        mock.push(receipt).unwrap();
        mock.push(tx_hash).unwrap();
        mock.push(U256::from(3)).unwrap();
        mock.push(U256::from(1_000_000)).unwrap();
        mock.push(U256::from(100_000)).unwrap();

        let result = client
            .send_transaction(TxRequest::new(Address::repeat_byte(2), Bytes::from(vec![1, 2, 3]), "collect"))
            .await
            .unwrap();

        assert_eq!(result.tx_hash, tx_hash);
        assert_eq!(result.block_number, 100);
        assert_eq!(result.gas_cost(), U256::from(150_000u64 * 1_000_000u64));
    }

    #[tokio::test]
    async fn test_estimate_gas_revert_stops_before_broadcast() {
        let (provider, mock) = mocked();
        let client = EthersChainClient::new(fast_config(), provider, TEST_KEY).unwrap();

        mock.push_response(rpc_error(3, "execution reverted: Too little received", None));

        let err = client
            .send_transaction(TxRequest::new(Address::repeat_byte(2), Bytes::new(), "swap"))
            .await
            .unwrap_err();
        assert!(err.is_revert());
    }
}
