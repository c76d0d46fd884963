use async_trait::async_trait;
use dex::erc20;
use ethers::types::{Address, Bytes, U256};
use models::is_native;

use crate::types::{ChainError, TxReceipt, TxRequest};

/// 编排器依赖的链上能力
///
/// 只读调用需自行处理临时性错误重试；`send_transaction` 只广播一次并等待确认
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 发送交易所用的钱包地址
    fn address(&self) -> Address;

    /// 只读客户端 (无私钥) 拒绝发送交易
    fn is_read_only(&self) -> bool;

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;

    /// 最新区块时间戳 (秒)
    async fn block_timestamp(&self) -> Result<u64, ChainError>;

    /// 发送交易并等待确认，链上失败时返回 [`ChainError::Reverted`]
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt, ChainError>;

    /// ERC-20 或原生币余额
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        if is_native(token) {
            return self.native_balance(owner).await;
        }
        let data = self.call(token, erc20::balance_of_calldata(owner)).await?;
        erc20::decode_uint(&data).ok_or_else(|| ChainError::Decode(format!("balanceOf {:?}", token)))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, ChainError> {
        let data = self.call(token, erc20::allowance_calldata(owner, spender)).await?;
        erc20::decode_uint(&data).ok_or_else(|| ChainError::Decode(format!("allowance {:?}", token)))
    }

    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        if is_native(token) {
            return Ok(18);
        }
        let data = self.call(token, erc20::decimals_calldata()).await?;
        erc20::decode_decimals(&data).ok_or_else(|| ChainError::Decode(format!("decimals {:?}", token)))
    }

    /// 代币符号，查询失败时返回 None
    async fn symbol(&self, token: Address) -> Option<String> {
        if is_native(token) {
            return Some("ETH".to_string());
        }
        let data = self.call(token, erc20::symbol_calldata()).await.ok()?;
        erc20::decode_symbol(&data)
    }

    /// 以最新区块时间为基准的截止时间
    async fn deadline(&self, secs: u64) -> Result<U256, ChainError> {
        Ok(U256::from(self.block_timestamp().await?.saturating_add(secs)))
    }
}
