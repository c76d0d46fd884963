use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, U256};

abigen!(
    IPermit2,
    r#"[
        function approve(address token, address spender, uint160 amount, uint48 expiration) external
        function allowance(address user, address token, address spender) external view returns (uint160, uint48, uint48)
    ]"#
);

/// uint48 最大值，作为永不过期的授权期限
pub const MAX_EXPIRATION: u64 = (1 << 48) - 1;

lazy_static::lazy_static! {
    /// uint160 最大值
    pub static ref MAX_AMOUNT: U256 = (U256::one() << 160) - U256::one();
}

/// Permit2 内部授权记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit2Allowance {
    pub amount: U256,
    pub expiration: u64,
    pub nonce: u64,
}

impl Permit2Allowance {
    /// 授权额度足够且在 `now` 之后才过期
    pub fn covers(&self, required: U256, now: u64) -> bool {
        self.amount >= required && self.expiration > now
    }
}

/// 最大额度、永不过期的授权
pub fn approve_max_calldata(token: Address, spender: Address) -> Bytes {
    ApproveCall {
        token,
        spender,
        amount: *MAX_AMOUNT,
        expiration: MAX_EXPIRATION,
    }
    .encode()
    .into()
}

pub fn allowance_calldata(user: Address, token: Address, spender: Address) -> Bytes {
    AllowanceCall { user, token, spender }.encode().into()
}

pub fn decode_allowance(data: &[u8]) -> Option<Permit2Allowance> {
    let (amount, expiration, nonce) = <(U256, u64, u64)>::decode(data).ok()?;
    Some(Permit2Allowance { amount, expiration, nonce })
}
