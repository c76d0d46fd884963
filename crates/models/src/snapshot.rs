use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// 余额增量超过预期的容忍度 (基点)
pub const DELTA_TOLERANCE_BPS: u64 = 100;

/// 一次链上操作前后的余额快照
///
/// 费用数量完全由余额差推断，不解析事件日志。运行期间若有其他转入同一代币，
/// 会被计入 delta，因此调用方在已知预期数量时应使用 [`FeeBalanceSnapshot::credited`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBalanceSnapshot {
    pub token: Address,
    pub before: U256,
    pub after: U256,
}

impl FeeBalanceSnapshot {
    pub fn new(token: Address, before: U256, after: U256) -> Self {
        Self { token, before, after }
    }

    /// after - before，余额减少时为 0
    pub fn delta(&self) -> U256 {
        self.after.saturating_sub(self.before)
    }

    /// before - after，余额增加时为 0
    pub fn spent(&self) -> U256 {
        self.before.saturating_sub(self.after)
    }

    pub fn decreased(&self) -> bool {
        self.after < self.before
    }

    /// 对照预期数量计入的 delta
    ///
    /// delta 超出 `expected` 的部分大于容忍度时视为无关转入，只计入 `expected`
    pub fn credited(&self, expected: U256) -> U256 {
        let delta = self.delta();
        if self.exceeds_expected(expected) {
            expected
        } else {
            delta
        }
    }

    pub fn exceeds_expected(&self, expected: U256) -> bool {
        let delta = self.delta();
        if delta <= expected {
            return false;
        }
        let tolerance = expected.saturating_mul(U256::from(DELTA_TOLERANCE_BPS)) / U256::from(10_000u64);
        delta - expected > tolerance
    }
}
