use ethers::abi::AbiEncode;
use ethers::prelude::*;
use ethers::types::{Address, Bytes, U256};

// Uniswap V3 SwapRouter02 ABI (无 deadline 字段)
abigen!(
    ISwapRouter02,
    r#"[
        struct ExactInputSingleParams { address tokenIn; address tokenOut; uint24 fee; address recipient; uint256 amountIn; uint256 amountOutMinimum; uint160 sqrtPriceLimitX96; }
        function exactInputSingle(ExactInputSingleParams params) external payable returns (uint256 amountOut)
    ]"#
);

/// V3 常用费率
pub mod fee_tiers {
    pub const LOWEST: u32 = 100;
    pub const LOW: u32 = 500;
    pub const MEDIUM: u32 = 3000;
    pub const HIGH: u32 = 10_000;
}

/// 单跳精确输入兑换
pub fn exact_input_single_calldata(
    token_in: Address,
    token_out: Address,
    fee: u32,
    recipient: Address,
    amount_in: U256,
    amount_out_minimum: U256,
) -> Bytes {
    ExactInputSingleCall {
        params: ExactInputSingleParams {
            token_in,
            token_out,
            fee,
            recipient,
            amount_in,
            amount_out_minimum,
            sqrt_price_limit_x96: U256::zero(), // 0 表示无限制
        },
    }
    .encode()
    .into()
}
