use ethers::abi::{encode, Token};
use ethers::types::{Address, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// V4 PoolKey 用于标识池子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

impl PoolKey {
    pub fn new(
        currency0: Address,
        currency1: Address,
        fee: u32,
        tick_spacing: i32,
        hooks: Address,
    ) -> Self {
        // 确保 currency0 < currency1
        let (c0, c1) = if currency0 < currency1 {
            (currency0, currency1)
        } else {
            (currency1, currency0)
        };

        Self {
            currency0: c0,
            currency1: c1,
            fee,
            tick_spacing,
            hooks,
        }
    }

    /// 计算 Pool ID (keccak256 of encoded PoolKey)
    pub fn pool_id(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::Address(self.currency0),
            Token::Address(self.currency1),
            Token::Uint(self.fee.into()),
            Token::Int(int_to_token_word(self.tick_spacing as i64)),
            Token::Address(self.hooks),
        ]))
    }

    /// 编码为 ABI Token
    pub fn to_abi_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.currency0),
            Token::Address(self.currency1),
            Token::Uint(self.fee.into()),
            Token::Int(int_to_token_word(self.tick_spacing as i64)),
            Token::Address(self.hooks),
        ])
    }

    /// 池子两侧币种
    pub fn currencies(&self) -> [Address; 2] {
        [self.currency0, self.currency1]
    }

    pub fn contains(&self, currency: Address) -> bool {
        self.currency0 == currency || self.currency1 == currency
    }

    /// 返回池子中与 `currency` 配对的另一币种
    pub fn other(&self, currency: Address) -> Option<Address> {
        if self.currency0 == currency {
            Some(self.currency1)
        } else if self.currency1 == currency {
            Some(self.currency0)
        } else {
            None
        }
    }
}

/// 有符号整数的 ABI 字 (二进制补码)
pub fn int_to_token_word(value: i64) -> U256 {
    if value >= 0 {
        U256::from(value as u64)
    } else {
        // two's complement: !(|v| - 1)
        !U256::from(value.unsigned_abs() - 1)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("invalid tick range: lower {lower} must be below upper {upper}")]
    InvalidTickRange { lower: i32, upper: i32 },
}

/// 集中流动性头寸
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// NFT token id
    pub token_id: U256,
    pub pool_key: PoolKey,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
}

impl Position {
    pub fn new(
        token_id: U256,
        pool_key: PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
    ) -> Result<Self, PositionError> {
        if tick_lower >= tick_upper {
            return Err(PositionError::InvalidTickRange {
                lower: tick_lower,
                upper: tick_upper,
            });
        }

        Ok(Self {
            token_id,
            pool_key,
            tick_lower,
            tick_upper,
            liquidity,
        })
    }

    pub fn has_liquidity(&self) -> bool {
        self.liquidity > 0
    }

    /// PositionManager 在 PoolManager 中记录头寸时使用的 salt
    pub fn salt(&self) -> [u8; 32] {
        let mut salt = [0u8; 32];
        self.token_id.to_big_endian(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_pool_key_ordering() {
        let addr1 = Address::from_str("0x0000000000000000000000000000000000000001").unwrap();
        let addr2 = Address::from_str("0x0000000000000000000000000000000000000002").unwrap();

        // 无论输入顺序如何，currency0 总是 < currency1
        let key1 = PoolKey::new(addr1, addr2, 3000, 60, Address::zero());
        let key2 = PoolKey::new(addr2, addr1, 3000, 60, Address::zero());

        assert_eq!(key1, key2);
        assert!(key1.currency0 < key1.currency1);
        assert_eq!(key1.pool_id(), key2.pool_id());
        assert_eq!(key1.other(addr1), Some(addr2));
        assert_eq!(key1.other(Address::repeat_byte(9)), None);
    }

    #[test]
    fn test_negative_int_word() {
        assert_eq!(int_to_token_word(-1), U256::MAX);
        assert_eq!(int_to_token_word(60), U256::from(60));
        assert_eq!(int_to_token_word(-60).overflowing_add(U256::from(60)).0, U256::zero());
    }

    #[test]
    fn test_position_rejects_inverted_range() {
        let key = PoolKey::new(Address::zero(), Address::repeat_byte(1), 3000, 60, Address::zero());
        let err = Position::new(U256::one(), key, 60, -60, 0).unwrap_err();
        assert_eq!(err, PositionError::InvalidTickRange { lower: 60, upper: -60 });
        assert!(Position::new(U256::one(), key, -60, 60, 0).is_ok());
    }
}
