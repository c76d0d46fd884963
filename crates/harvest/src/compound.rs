use config_crate::ChainContracts;
use dex::uniswap::math::{get_amounts_for_liquidity, get_liquidity_for_amounts, get_sqrt_ratio_at_tick};
use dex::uniswap::v4;
use dex::V4Planner;
use ethers::types::U256;
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use models::{is_native, Position};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::Result;
use crate::meter::BalanceMeter;

/// 原生币复投时为 gas 预留的余额 (0.001 ETH)
pub const NATIVE_GAS_RESERVE: u64 = 1_000_000_000_000_000;

/// 复投计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundPlan {
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    /// 分配给复投的数量
    pub amount0: U256,
    pub amount1: U256,
    pub amount0_max: u128,
    pub amount1_max: u128,
    /// 按当前价格预计消耗的数量
    pub expected0: U256,
    pub expected1: U256,
}

/// 复投执行结果
#[derive(Debug, Clone)]
pub struct CompoundOutcome {
    pub consumed: [U256; 2],
    pub receipt: TxReceipt,
}

/// 滑点百分比换算为基点
pub fn slippage_bps(slippage_pct: Decimal) -> u32 {
    (slippage_pct * Decimal::from(100)).trunc().to_u32().unwrap_or(0)
}

fn with_buffer(amount: U256, bps: u32) -> U256 {
    amount.saturating_mul(U256::from(10_000 + bps as u64)) / U256::from(10_000u64)
}

fn to_u128_saturating(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

/// 根据分配数量计算流动性增量与最大消耗
///
/// 最大消耗 = 数量 × (1 + 滑点)，不超过钱包余额 (原生币先扣除 gas 预留)。
/// 流动性为 0 时返回 None
pub fn plan(
    position: &Position,
    amounts: [U256; 2],
    sqrt_price_x96: U256,
    slippage_bps: u32,
    balances: [U256; 2],
) -> Result<Option<CompoundPlan>> {
    let sqrt_lower = get_sqrt_ratio_at_tick(position.tick_lower)?;
    let sqrt_upper = get_sqrt_ratio_at_tick(position.tick_upper)?;

    let liquidity = get_liquidity_for_amounts(sqrt_price_x96, sqrt_lower, sqrt_upper, amounts[0], amounts[1]);
    if liquidity == 0 {
        return Ok(None);
    }
    let (expected0, expected1) = get_amounts_for_liquidity(sqrt_price_x96, sqrt_lower, sqrt_upper, liquidity);

    let caps: Vec<U256> = position
        .pool_key
        .currencies()
        .iter()
        .zip(balances)
        .map(|(currency, balance)| {
            if is_native(*currency) {
                balance.saturating_sub(U256::from(NATIVE_GAS_RESERVE))
            } else {
                balance
            }
        })
        .collect();

    Ok(Some(CompoundPlan {
        sqrt_price_x96,
        liquidity,
        amount0: amounts[0],
        amount1: amounts[1],
        amount0_max: to_u128_saturating(with_buffer(amounts[0], slippage_bps).min(caps[0])),
        amount1_max: to_u128_saturating(with_buffer(amounts[1], slippage_bps).min(caps[1])),
        expected0,
        expected1,
    }))
}

/// 将手续费复投回同一头寸
pub struct CompoundExecutor<'a> {
    chain: &'a dyn ChainClient,
    contracts: &'a ChainContracts,
    slippage_bps: u32,
    deadline_secs: u64,
}

impl<'a> CompoundExecutor<'a> {
    pub fn new(chain: &'a dyn ChainClient, contracts: &'a ChainContracts, slippage_bps: u32, deadline_secs: u64) -> Self {
        Self {
            chain,
            contracts,
            slippage_bps,
            deadline_secs,
        }
    }

    /// 执行时重新读取池子当前价格
    pub async fn current_sqrt_price(&self, position: &Position) -> Result<U256> {
        let data = self
            .chain
            .call(self.contracts.state_view, v4::slot0_calldata(position.pool_key.pool_id()))
            .await?;
        let slot0 = v4::decode_slot0(&data).ok_or_else(|| ChainError::Decode("getSlot0".to_string()))?;
        debug!(target: "harvest", "池子 tick={} sqrtPriceX96={}", slot0.tick, slot0.sqrt_price_x96);
        Ok(slot0.sqrt_price_x96)
    }

    /// 读取价格与余额并生成计划
    pub async fn prepare(&self, position: &Position, amounts: [U256; 2]) -> Result<Option<CompoundPlan>> {
        let sqrt_price = self.current_sqrt_price(position).await?;
        let balances = BalanceMeter::new(self.chain)
            .balances(&position.pool_key.currencies())
            .await?;
        let plan = plan(position, amounts, sqrt_price, self.slippage_bps, [balances[0], balances[1]])?;
        if let Some(plan) = &plan {
            info!(
                target: "harvest",
                "📈 复投计划 #{}: L=+{} 预计消耗 {} / {} (上限 {} / {})",
                position.token_id, plan.liquidity, plan.expected0, plan.expected1, plan.amount0_max, plan.amount1_max
            );
        }
        Ok(plan)
    }

    /// 增加流动性并结算，消耗量由余额差得出
    pub async fn execute(&self, position: &Position, plan: &CompoundPlan) -> Result<CompoundOutcome> {
        let [currency0, currency1] = position.pool_key.currencies();
        let planner = V4Planner::increase_liquidity(
            position.token_id,
            plan.liquidity,
            plan.amount0_max,
            plan.amount1_max,
            currency0,
            currency1,
        );
        let deadline = self.chain.deadline(self.deadline_secs).await?;

        let mut request = TxRequest::new(
            self.contracts.position_manager,
            v4::modify_liquidities_calldata(&planner, deadline),
            format!("compound #{}", position.token_id),
        );
        if is_native(currency0) {
            request = request.with_value(U256::from(plan.amount0_max));
        }

        let measurement = BalanceMeter::new(self.chain)
            .measure(&[currency0, currency1], || self.chain.send_transaction(request))
            .await?;
        let consumed = [measurement.spent(currency0), measurement.spent(currency1)];
        info!(
            target: "harvest",
            "✅ 复投 #{} 完成: 消耗 {} / {}",
            position.token_id, consumed[0], consumed[1]
        );

        Ok(CompoundOutcome {
            consumed,
            receipt: measurement.receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::PositionCollector;
    use crate::testing::{position_fixture, MockChain, POSITION_ID, TARGET};
    use ethers::types::Address;
    use rust_decimal_macros::dec;

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_slippage_bps() {
        assert_eq!(slippage_bps(dec!(1)), 100);
        assert_eq!(slippage_bps(dec!(0.5)), 50);
        assert_eq!(slippage_bps(dec!(0)), 0);
    }

    #[test]
    fn test_plan_buffers_and_caps() {
        let position = position_fixture(1);
        let sqrt = get_sqrt_ratio_at_tick(82_940).unwrap();
        let amounts = [U256::exp10(17), e18(400)];

        // 余额充足：上限 = 数量 × 1.01
        let plan = plan(&position, amounts, sqrt, 100, [e18(10), e18(10_000)]).unwrap().unwrap();
        assert!(plan.liquidity > 0);
        assert_eq!(U256::from(plan.amount1_max), e18(404));
        assert!(plan.expected0 <= amounts[0] && plan.expected1 <= amounts[1]);

        // 原生币余额只比数量多一点：上限扣除 gas 预留
        let tight = U256::exp10(17) + U256::from(NATIVE_GAS_RESERVE) + U256::from(5);
        let capped = super::plan(&position, amounts, sqrt, 100, [tight, e18(10_000)]).unwrap().unwrap();
        assert_eq!(U256::from(capped.amount0_max), U256::exp10(17) + U256::from(5));
    }

    #[test]
    fn test_zero_liquidity_means_nothing_to_compound() {
        let position = position_fixture(1);
        let sqrt = get_sqrt_ratio_at_tick(82_940).unwrap();
        // 区间内只有一侧数量时流动性为 0
        let plan = plan(&position, [U256::zero(), e18(400)], sqrt, 100, [e18(1), e18(1_000)]).unwrap();
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn test_execute_native_pool_refunds_excess() {
        let chain = MockChain::with_position();
        let contracts = MockChain::contracts();
        chain.set_balance(*TARGET, e18(1_000));
        let executor = CompoundExecutor::new(&chain, &contracts, 100, 600);
        let position = position_fixture(chain.position_liquidity());
        assert_eq!(position.token_id, *POSITION_ID);

        let plan = executor
            .prepare(&position, [U256::exp10(17), e18(400)])
            .await
            .unwrap()
            .unwrap();
        PositionCollector::new(&chain, &contracts, 600, false)
            .ensure_approvals(&position, [U256::from(plan.amount0_max), U256::from(plan.amount1_max)])
            .await
            .unwrap();
        let native_before = chain.balance(Address::zero());
        let outcome = executor.execute(&position, &plan).await.unwrap();

        // 只消耗按价格计算的数量，多付的 ETH 被 SWEEP 退回
        assert_eq!(outcome.consumed, chain.last_increase_amounts());
        assert!(outcome.consumed[0] <= plan.amount0);
        assert_eq!(
            chain.balance(Address::zero()),
            native_before - outcome.consumed[0] - outcome.receipt.gas_cost()
        );
        assert_eq!(chain.position_liquidity(), position.liquidity + plan.liquidity);
    }
}
