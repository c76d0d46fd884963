use dex::{erc20, escrow};
use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use futures_util::future::join_all;
use models::FeeBalanceSnapshot;
use tracing::info;

use crate::meter::{credit, BalanceMeter};

/// 单个代币的领取结果
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub snapshot: FeeBalanceSnapshot,
    /// 计入本次运行的数量
    pub credited: U256,
    pub receipt: TxReceipt,
}

/// 协议费用托管合约
pub struct FeeSourceAdapter<'a> {
    chain: &'a dyn ChainClient,
    escrow: Address,
}

impl<'a> FeeSourceAdapter<'a> {
    pub fn new(chain: &'a dyn ChainClient, escrow: Address) -> Self {
        Self { chain, escrow }
    }

    /// 查询每个代币的可领取数量 (只读，并发)
    pub async fn check_available(
        &self,
        owner: Address,
        tokens: &[Address],
    ) -> Vec<(Address, Result<U256, ChainError>)> {
        let reads = tokens.iter().map(|token| async move {
            let data = self
                .chain
                .call(self.escrow, escrow::available_fees_calldata(owner, *token))
                .await?;
            erc20::decode_uint(&data).ok_or_else(|| ChainError::Decode(format!("availableFees {:?}", token)))
        });
        tokens.iter().copied().zip(join_all(reads).await).collect()
    }

    /// 领取单个代币，数量由余额差得出
    pub async fn claim(&self, owner: Address, token: Address, expected: U256) -> Result<ClaimOutcome, ChainError> {
        let meter = BalanceMeter::new(self.chain);
        let request = TxRequest::new(
            self.escrow,
            escrow::claim_calldata(owner, token),
            format!("claim {:?}", token),
        );
        let measurement = meter
            .measure(&[token], || self.chain.send_transaction(request))
            .await?;

        let snapshot = measurement.snapshots[0];
        let credited = credit(&snapshot, Some(expected), "claim");
        info!(target: "harvest", "💰 领取 {:?}: {} (预期 {})", token, credited, expected);

        Ok(ClaimOutcome {
            snapshot,
            credited,
            receipt: measurement.receipt,
        })
    }
}
