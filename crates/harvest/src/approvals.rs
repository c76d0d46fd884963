use dex::{erc20, permit2};
use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use models::is_native;
use tracing::{debug, info};

/// ERC-20 与 Permit2 授权
///
/// 授权只在额度不足时发送，且总是授权最大额度；dry-run 下只记录将要执行的授权
pub struct Approvals<'a> {
    chain: &'a dyn ChainClient,
    permit2: Address,
    dry_run: bool,
}

impl<'a> Approvals<'a> {
    pub fn new(chain: &'a dyn ChainClient, permit2: Address, dry_run: bool) -> Self {
        Self { chain, permit2, dry_run }
    }

    /// 确保 `spender` 可从钱包转走至少 `required` 的 `token`
    pub async fn ensure_erc20(
        &self,
        token: Address,
        spender: Address,
        required: U256,
    ) -> Result<Option<TxReceipt>, ChainError> {
        if is_native(token) || required.is_zero() {
            return Ok(None);
        }

        let owner = self.chain.address();
        let current = self.chain.allowance(token, owner, spender).await?;
        if current >= required {
            debug!(target: "harvest", "授权充足: {:?} → {:?} ({})", token, spender, current);
            return Ok(None);
        }

        if self.dry_run {
            info!(target: "harvest", "[dry-run] 将授权 {:?} 给 {:?}", token, spender);
            return Ok(None);
        }

        let receipt = self
            .chain
            .send_transaction(TxRequest::new(
                token,
                erc20::approve_calldata(spender, U256::MAX),
                format!("approve {:?} → {:?}", token, spender),
            ))
            .await?;
        Ok(Some(receipt))
    }

    /// ERC-20 → Permit2 → `spender` 两级授权，Permit2 额度需未过期
    pub async fn ensure_permit2(
        &self,
        token: Address,
        spender: Address,
        required: U256,
    ) -> Result<Vec<TxReceipt>, ChainError> {
        let mut receipts = Vec::new();
        if is_native(token) || required.is_zero() {
            return Ok(receipts);
        }

        if let Some(receipt) = self.ensure_erc20(token, self.permit2, required).await? {
            receipts.push(receipt);
        }

        let owner = self.chain.address();
        let data = self
            .chain
            .call(self.permit2, permit2::allowance_calldata(owner, token, spender))
            .await?;
        let allowance = permit2::decode_allowance(&data)
            .ok_or_else(|| ChainError::Decode(format!("permit2 allowance {:?}", token)))?;
        let now = self.chain.block_timestamp().await?;
        if allowance.covers(required, now) {
            return Ok(receipts);
        }

        if self.dry_run {
            info!(target: "harvest", "[dry-run] 将通过 Permit2 授权 {:?} 给 {:?}", token, spender);
            return Ok(receipts);
        }

        let receipt = self
            .chain
            .send_transaction(TxRequest::new(
                self.permit2,
                permit2::approve_max_calldata(token, spender),
                format!("permit2 approve {:?} → {:?}", token, spender),
            ))
            .await?;
        receipts.push(receipt);
        Ok(receipts)
    }
}
