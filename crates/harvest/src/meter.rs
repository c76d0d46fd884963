//! 余额差计量
//!
//! 每个会改变余额的步骤都按 "读余额 → 执行 → 再读余额" 计量，
//! 费用数量完全由余额差得出，不依赖事件日志。

use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError, TxReceipt};
use futures_util::future::join_all;
use models::{is_native, FeeBalanceSnapshot};
use std::future::Future;
use tracing::warn;

/// 一次被计量的链上操作
#[derive(Debug, Clone)]
pub struct Measurement {
    pub receipt: TxReceipt,
    pub snapshots: Vec<FeeBalanceSnapshot>,
}

impl Measurement {
    pub fn snapshot(&self, token: Address) -> Option<&FeeBalanceSnapshot> {
        self.snapshots.iter().find(|s| s.token == token)
    }

    pub fn delta(&self, token: Address) -> U256 {
        self.snapshot(token).map(|s| s.delta()).unwrap_or_default()
    }

    pub fn spent(&self, token: Address) -> U256 {
        self.snapshot(token).map(|s| s.spent()).unwrap_or_default()
    }
}

pub struct BalanceMeter<'a> {
    chain: &'a dyn ChainClient,
    owner: Address,
}

impl<'a> BalanceMeter<'a> {
    pub fn new(chain: &'a dyn ChainClient) -> Self {
        Self {
            owner: chain.address(),
            chain,
        }
    }

    /// 并发读取多个代币余额
    pub async fn balances(&self, tokens: &[Address]) -> Result<Vec<U256>, ChainError> {
        join_all(tokens.iter().map(|token| self.chain.balance_of(*token, self.owner)))
            .await
            .into_iter()
            .collect()
    }

    /// 计量 `action` 前后 `tokens` 的余额变化
    ///
    /// 原生币的 after 会加回本笔交易的 gas 费用，只反映价值流动
    pub async fn measure<F, Fut>(&self, tokens: &[Address], action: F) -> Result<Measurement, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxReceipt, ChainError>>,
    {
        let before = self.balances(tokens).await?;
        let receipt = action().await?;
        let after = self.balances(tokens).await?;

        let snapshots = tokens
            .iter()
            .zip(before.into_iter().zip(after))
            .map(|(token, (before, after))| {
                let after = if is_native(*token) {
                    after.saturating_add(receipt.gas_cost())
                } else {
                    after
                };
                FeeBalanceSnapshot::new(*token, before, after)
            })
            .collect();

        Ok(Measurement { receipt, snapshots })
    }
}

/// 计入的费用数量
///
/// 已知预期数量时，超出容忍度的部分视为无关转入，只计入预期数量
pub fn credit(snapshot: &FeeBalanceSnapshot, expected: Option<U256>, what: &str) -> U256 {
    if snapshot.decreased() {
        warn!(
            target: "harvest",
            "{}: {:?} 余额减少 {} -> {}，计为 0",
            what, snapshot.token, snapshot.before, snapshot.after
        );
    }

    match expected.filter(|e| !e.is_zero()) {
        Some(expected) => {
            let credited = snapshot.credited(expected);
            if credited < snapshot.delta() {
                warn!(
                    target: "harvest",
                    "{}: {:?} 到账 {} 超出预期 {}，可能存在无关转入，只计入预期数量",
                    what,
                    snapshot.token,
                    snapshot.delta(),
                    expected
                );
            }
            credited
        }
        None => snapshot.delta(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, TARGET};
    use executor::TxRequest;

    #[tokio::test]
    async fn test_measure_adds_gas_back_for_native() {
        let chain = MockChain::new();
        chain.set_balance(Address::zero(), U256::exp10(18));
        chain.set_balance(*TARGET, U256::from(500));

        let meter = BalanceMeter::new(&chain);
        let m = meter
            .measure(&[Address::zero(), *TARGET], || {
                chain.send_transaction(TxRequest::new(Address::repeat_byte(0x42), Default::default(), "noop"))
            })
            .await
            .unwrap();

        // 只付了 gas，价值流动为 0
        assert_eq!(m.delta(Address::zero()), U256::zero());
        assert_eq!(m.spent(Address::zero()), U256::zero());
        assert_eq!(m.delta(*TARGET), U256::zero());
        assert_eq!(chain.sent().len(), 1);
    }

    #[test]
    fn test_credit_guard() {
        let token = Address::repeat_byte(1);
        let inflated = FeeBalanceSnapshot::new(token, U256::zero(), U256::from(3_000));
        assert_eq!(credit(&inflated, Some(U256::from(1_000)), "claim"), U256::from(1_000));
        // 预期未知或为 0 时如实计入
        assert_eq!(credit(&inflated, None, "claim"), U256::from(3_000));
        assert_eq!(credit(&inflated, Some(U256::zero()), "claim"), U256::from(3_000));

        let decreased = FeeBalanceSnapshot::new(token, U256::from(10), U256::from(4));
        assert_eq!(credit(&decreased, None, "collect"), U256::zero());
    }
}
