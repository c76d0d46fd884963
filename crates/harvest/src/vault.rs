use dex::erc20;
use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use tracing::info;

/// 将本次运行得到的结算资产转入金库
pub struct VaultTransfer<'a> {
    chain: &'a dyn ChainClient,
    vault: Address,
    settlement_token: Address,
}

impl<'a> VaultTransfer<'a> {
    pub fn new(chain: &'a dyn ChainClient, vault: Address, settlement_token: Address) -> Self {
        Self {
            chain,
            vault,
            settlement_token,
        }
    }

    /// 只转出 `amount` (本次运行的结算资产增量)，钱包原有余额不动
    ///
    /// 数量为 0 时不发送交易
    pub async fn transfer(&self, amount: U256) -> Result<Option<TxReceipt>, ChainError> {
        if amount.is_zero() {
            return Ok(None);
        }

        let receipt = self
            .chain
            .send_transaction(TxRequest::new(
                self.settlement_token,
                erc20::transfer_calldata(self.vault, amount),
                format!("transfer {} → vault {:?}", amount, self.vault),
            ))
            .await?;
        info!(target: "harvest", "🏦 已转入金库 {:?}: {}", self.vault, amount);
        Ok(Some(receipt))
    }
}
