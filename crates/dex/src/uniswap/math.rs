//! 集中流动性数学 (TickMath / LiquidityAmounts)
//!
//! 所有价格均为 Q64.96 定点数表示的 sqrt(price)，价格基数为每 tick 1.0001。
//! 纯函数，无 I/O。

use ethers::types::{U256, U512};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// getSqrtRatioAtTick(MIN_TICK)
pub const MIN_SQRT_RATIO: u64 = 4295128739;

lazy_static::lazy_static! {
    /// getSqrtRatioAtTick(MAX_TICK)
    pub static ref MAX_SQRT_RATIO: U256 =
        U256::from_dec_str("1461446703485210103287273052203988822378723970342").unwrap();
    /// 2^96
    pub static ref Q96: U256 = U256::one() << 96;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("tick {0} outside [-887272, 887272]")]
    TickOutOfRange(i32),

    #[error("sqrt price {0} outside the supported range")]
    SqrtPriceOutOfRange(U256),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result does not fit in 256 bits")]
    Overflow,
}

/// TickMath 中按位相乘的常量 (1/sqrt(1.0001)^(2^i) 的 Q128 表示)
const TICK_MULTIPLIERS: [(u32, &str); 19] = [
    (0x2, "fff97272373d413259a46990580e213a"),
    (0x4, "fff2e50f5f656932ef12357cf3c7fdcc"),
    (0x8, "ffe5caca7e10e4e61c3624eaa0941cd0"),
    (0x10, "ffcb9843d60f6159c9db58835c926644"),
    (0x20, "ff973b41fa98c081472e6896dfb254c0"),
    (0x40, "ff2ea16466c96a3843ec78b326b52861"),
    (0x80, "fe5dee046a99a2a811c461f1969c3053"),
    (0x100, "fcbe86c7900a88aedcffc83b479aa3a4"),
    (0x200, "f987a7253ac413176f2b074cf7815e54"),
    (0x400, "f3392b0822b70005940c7a398e4b70f3"),
    (0x800, "e7159475a2c29b7443b29c7fa6e889d9"),
    (0x1000, "d097f3bdfd2022b8845ad8f792aa5825"),
    (0x2000, "a9f746462d870fdf8a65dc1f90e061e5"),
    (0x4000, "70d869a156d2a1b890bb3df62baf32f7"),
    (0x8000, "31be135f97d08fd981231505542fcfa6"),
    (0x10000, "9aa508b5b7a84e1c677de54f3e99bc9"),
    (0x20000, "5d6af8dedb81196699c329225ee604"),
    (0x40000, "2216e584f5fa1ea926041bedfe98"),
    (0x80000, "48a170391f7dc42444e8fa2"),
];

fn hex_word(s: &str) -> U256 {
    // 常量表为合法十六进制
    U256::from_str_radix(s, 16).unwrap_or_default()
}

/// tick -> sqrtPriceX96，向上取整 (与链上 TickMath 结果一致)
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, MathError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(MathError::TickOutOfRange(tick));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        hex_word("fffcb933bd6fad37aa2d162d1a594001")
    } else {
        U256::one() << 128
    };

    for (bit, multiplier) in TICK_MULTIPLIERS {
        if abs_tick & bit != 0 {
            // ratio < 2^128 且 multiplier < 2^128，乘积不会溢出
            ratio = (ratio * hex_word(multiplier)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96，向上取整
    let remainder = ratio & U256::from(u32::MAX);
    let rounded = (ratio >> 32) + if remainder.is_zero() { U256::zero() } else { U256::one() };
    Ok(rounded)
}

/// sqrtPriceX96 -> 最大的 tick，使 get_sqrt_ratio_at_tick(tick) <= sqrt_price_x96
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> Result<i32, MathError> {
    if sqrt_price_x96 < U256::from(MIN_SQRT_RATIO) || sqrt_price_x96 >= *MAX_SQRT_RATIO {
        return Err(MathError::SqrtPriceOutOfRange(sqrt_price_x96));
    }

    // ratio 随 tick 单调递增，二分查找
    let (mut low, mut high) = (MIN_TICK, MAX_TICK);
    while low < high {
        let mid = low + (high - low + 1) / 2;
        if get_sqrt_ratio_at_tick(mid)? <= sqrt_price_x96 {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    Ok(low)
}

/// a * b / denominator，中间结果 512 位
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product: U512 = a.full_mul(b);
    let result = product / U512::from(denominator);
    U256::try_from(result).map_err(|_| MathError::Overflow)
}

fn sorted(sqrt_a: U256, sqrt_b: U256) -> (U256, U256) {
    if sqrt_a > sqrt_b {
        (sqrt_b, sqrt_a)
    } else {
        (sqrt_a, sqrt_b)
    }
}

fn saturate_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

/// 仅由 token0 数量决定的流动性
///
/// L = amount0 * (sqrtA * sqrtB / Q96) / (sqrtB - sqrtA)
pub fn get_liquidity_for_amount0(sqrt_a: U256, sqrt_b: U256, amount0: U256) -> u128 {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);
    let range = sqrt_b - sqrt_a;
    if range.is_zero() {
        return 0;
    }
    let liquidity = mul_div(sqrt_a, sqrt_b, *Q96)
        .and_then(|intermediate| mul_div(amount0, intermediate, range));
    match liquidity {
        Ok(l) => saturate_u128(l),
        Err(_) => u128::MAX,
    }
}

/// 仅由 token1 数量决定的流动性
///
/// L = amount1 * Q96 / (sqrtB - sqrtA)
pub fn get_liquidity_for_amount1(sqrt_a: U256, sqrt_b: U256, amount1: U256) -> u128 {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);
    let range = sqrt_b - sqrt_a;
    if range.is_zero() {
        return 0;
    }
    match mul_div(amount1, *Q96, range) {
        Ok(l) => saturate_u128(l),
        Err(_) => u128::MAX,
    }
}

/// 给定当前价格与区间上下界，两种代币数量可获得的最大流动性
///
/// - 当前价格 <= 下界：只使用 token0
/// - 当前价格 >= 上界：只使用 token1
/// - 区间内：取两者较小值
pub fn get_liquidity_for_amounts(
    sqrt_price_x96: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    amount0: U256,
    amount1: U256,
) -> u128 {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);

    if sqrt_price_x96 <= sqrt_a {
        get_liquidity_for_amount0(sqrt_a, sqrt_b, amount0)
    } else if sqrt_price_x96 < sqrt_b {
        let liquidity0 = get_liquidity_for_amount0(sqrt_price_x96, sqrt_b, amount0);
        let liquidity1 = get_liquidity_for_amount1(sqrt_a, sqrt_price_x96, amount1);
        liquidity0.min(liquidity1)
    } else {
        get_liquidity_for_amount1(sqrt_a, sqrt_b, amount1)
    }
}

pub fn get_amount0_for_liquidity(sqrt_a: U256, sqrt_b: U256, liquidity: u128) -> U256 {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);
    if sqrt_a.is_zero() {
        return U256::zero();
    }
    mul_div(U256::from(liquidity) << 96, sqrt_b - sqrt_a, sqrt_b)
        .map(|v| v / sqrt_a)
        .unwrap_or_default()
}

pub fn get_amount1_for_liquidity(sqrt_a: U256, sqrt_b: U256, liquidity: u128) -> U256 {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);
    mul_div(U256::from(liquidity), sqrt_b - sqrt_a, *Q96).unwrap_or_default()
}

/// 流动性对应的两种代币数量 (向下取整)
pub fn get_amounts_for_liquidity(
    sqrt_price_x96: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: u128,
) -> (U256, U256) {
    let (sqrt_a, sqrt_b) = sorted(sqrt_a, sqrt_b);

    if sqrt_price_x96 <= sqrt_a {
        (get_amount0_for_liquidity(sqrt_a, sqrt_b, liquidity), U256::zero())
    } else if sqrt_price_x96 < sqrt_b {
        (
            get_amount0_for_liquidity(sqrt_price_x96, sqrt_b, liquidity),
            get_amount1_for_liquidity(sqrt_a, sqrt_price_x96, liquidity),
        )
    } else {
        (U256::zero(), get_amount1_for_liquidity(sqrt_a, sqrt_b, liquidity))
    }
}

/// 从 sqrtPriceX96 计算 token1/token0 价格 (按精度调整后的人类可读单位)
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> Option<Decimal> {
    // sqrtPriceX96 < 2^160，右移 32 位后可放入 u128
    if sqrt_price_x96 >= U256::one() << 160 {
        return None;
    }
    let sqrt_price = (sqrt_price_x96 >> 32).as_u128() as f64 / 2f64.powi(64);
    let price = sqrt_price * sqrt_price;
    let decimal_adjustment = 10_f64.powi(decimals0 as i32 - decimals1 as i32);
    Decimal::from_f64(price * decimal_adjustment)
}
