use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 判断地址是否为原生币
pub fn is_native(address: Address) -> bool {
    address == Address::zero()
}

/// 单个代币的数量 (链上最小单位)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

impl TokenAmount {
    pub fn new(token: Address, amount: U256) -> Self {
        Self { token, amount }
    }
}

/// 将链上整数数量转换为带精度的 Decimal
///
/// 超出 Decimal 表示范围 (约 7.9e28) 时返回 None
pub fn to_decimal_units(amount: U256, decimals: u8) -> Option<Decimal> {
    if amount > U256::from(i128::MAX as u128) {
        return None;
    }
    let raw = amount.as_u128() as i128;
    if decimals as u32 <= 28 {
        return Decimal::try_from_i128_with_scale(raw, decimals as u32).ok();
    }
    // 精度超过 28 位时先截断多余位
    let shifted = raw / 10i128.checked_pow(decimals as u32 - 28)?;
    Decimal::try_from_i128_with_scale(shifted, 28).ok()
}
