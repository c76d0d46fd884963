use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, U256};

abigen!(
    IERC20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
    ]"#
);

abigen!(
    IWETH,
    r#"[
        function deposit() external payable
    ]"#
);

pub fn balance_of_calldata(account: Address) -> Bytes {
    BalanceOfCall { account }.encode().into()
}

pub fn allowance_calldata(owner: Address, spender: Address) -> Bytes {
    AllowanceCall { owner, spender }.encode().into()
}

pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    ApproveCall { spender, amount }.encode().into()
}

pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
    TransferCall { to, amount }.encode().into()
}

pub fn decimals_calldata() -> Bytes {
    DecimalsCall.encode().into()
}

pub fn symbol_calldata() -> Bytes {
    SymbolCall.encode().into()
}

/// WETH.deposit()，msg.value 为包装数量
pub fn deposit_calldata() -> Bytes {
    DepositCall.encode().into()
}

/// 解码单个 uint 返回值
pub fn decode_uint(data: &[u8]) -> Option<U256> {
    U256::decode(data).ok()
}

pub fn decode_decimals(data: &[u8]) -> Option<u8> {
    // 部分代币返回 uint256，只取低位
    decode_uint(data).filter(|v| *v <= U256::from(u8::MAX)).map(|v| v.low_u32() as u8)
}

pub fn decode_symbol(data: &[u8]) -> Option<String> {
    String::decode(data).ok()
}
