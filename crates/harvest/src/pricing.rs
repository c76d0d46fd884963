use dex::uniswap::math::sqrt_price_x96_to_price;
use dex::uniswap::v4;
use ethers::types::{Address, U256};
use executor::ChainClient;
use models::{to_decimal_units, PoolKey, TokenLedger};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use services::PriceOracle;
use tracing::{debug, warn};

/// USD 估值
///
/// 价格优先取自预言机；预言机没有目标代币价格时，用头寸池子的价格乘以配对币的 USD 价格
pub struct UsdPricer<'a> {
    chain: &'a dyn ChainClient,
    oracle: &'a dyn PriceOracle,
    state_view: Address,
}

impl<'a> UsdPricer<'a> {
    pub fn new(chain: &'a dyn ChainClient, oracle: &'a dyn PriceOracle, state_view: Address) -> Self {
        Self {
            chain,
            oracle,
            state_view,
        }
    }

    pub async fn token_price(&self, token: Address, pool: Option<&PoolKey>) -> Option<Decimal> {
        if let Some(price) = self.oracle.price_usd(token).await {
            return Some(price);
        }
        let pool = pool.filter(|p| p.contains(token))?;
        let price = self.pool_derived_price(token, pool).await;
        if let Some(price) = price {
            debug!(target: "harvest", "{:?} 使用池子推导价格 ${}", token, price);
        }
        price
    }

    async fn pool_derived_price(&self, token: Address, pool: &PoolKey) -> Option<Decimal> {
        let other = pool.other(token)?;
        let other_usd = self.oracle.price_usd(other).await?;

        let data = self
            .chain
            .call(self.state_view, v4::slot0_calldata(pool.pool_id()))
            .await
            .ok()?;
        let slot0 = v4::decode_slot0(&data)?;
        let decimals0 = self.chain.decimals(pool.currency0).await.ok()?;
        let decimals1 = self.chain.decimals(pool.currency1).await.ok()?;

        // token1 / token0
        let price = sqrt_price_x96_to_price(slot0.sqrt_price_x96, decimals0, decimals1)?;
        if token == pool.currency0 {
            Some(price * other_usd)
        } else if price.is_zero() {
            None
        } else {
            Some(other_usd / price)
        }
    }

    /// 单个数量的 USD 价值，无价格时为 None
    pub async fn amount_usd(&self, token: Address, amount: U256, pool: Option<&PoolKey>) -> Option<Decimal> {
        let decimals = self.chain.decimals(token).await.ok()?;
        let units = to_decimal_units(amount, decimals)?;
        let price = self.token_price(token, pool).await?;
        units.checked_mul(price)
    }

    /// 账本总价值，无价格的代币按 $0 计并告警
    pub async fn value_usd(&self, ledger: &TokenLedger, pool: Option<&PoolKey>) -> Decimal {
        let mut total = Decimal::ZERO;
        for entry in ledger.iter().filter(|e| !e.amount.is_zero()) {
            match self.amount_usd(entry.token, entry.amount, pool).await {
                Some(value) => total += value,
                None => warn!(target: "harvest", "⚠️ {:?} 无法定价，按 $0 计入", entry.token),
            }
        }
        total
    }

    /// 按 USD 价格换算的预期兑换输出 (未扣滑点)
    pub async fn expected_output(
        &self,
        token_in: Address,
        amount_in: U256,
        token_out: Address,
        pool: Option<&PoolKey>,
    ) -> Option<U256> {
        let value = self.amount_usd(token_in, amount_in, pool).await?;
        let price_out = self.token_price(token_out, pool).await?;
        if price_out.is_zero() {
            return None;
        }
        let decimals_out = self.chain.decimals(token_out).await.ok()?;
        units_to_raw(value / price_out, decimals_out)
    }
}

/// Decimal 数量转换为链上最小单位 (向下取整)
pub fn units_to_raw(units: Decimal, decimals: u8) -> Option<U256> {
    let scale = Decimal::from(10u64.checked_pow(decimals.min(19) as u32)?);
    let mut raw = units.checked_mul(scale)?.trunc().to_u128()?;
    // 超过 19 位的精度部分在整数域补齐
    if decimals > 19 {
        raw = raw.checked_mul(10u128.checked_pow((decimals - 19) as u32)?)?;
    }
    Some(U256::from(raw))
}
