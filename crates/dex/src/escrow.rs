//! 协议费用托管合约 (按 owner/token 记账，逐个代币领取)

use ethers::abi::AbiEncode;
use ethers::prelude::*;
use ethers::types::{Address, Bytes};

abigen!(
    IFeeEscrow,
    r#"[
        function availableFees(address owner, address token) external view returns (uint256)
        function claim(address owner, address token) external
    ]"#
);

pub fn available_fees_calldata(owner: Address, token: Address) -> Bytes {
    AvailableFeesCall { owner, token }.encode().into()
}

pub fn claim_calldata(owner: Address, token: Address) -> Bytes {
    ClaimCall { owner, token }.encode().into()
}
