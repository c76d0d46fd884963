use ethers::abi::{encode, AbiDecode, AbiEncode, Token};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, U256};

use super::v4::V4Planner;

abigen!(
    IUniversalRouter,
    r#"[
        function execute(bytes commands, bytes[] inputs, uint256 deadline) external payable
    ]"#
);

/// Universal Router 命令编码
pub mod commands {
    pub const WRAP_ETH: u8 = 0x0b;
    pub const V4_SWAP: u8 = 0x10;
}

lazy_static::lazy_static! {
    /// 使用路由合约当前持有的全部余额
    pub static ref CONTRACT_BALANCE: U256 = U256::one() << 255;
}

/// Universal Router 中的收款人：调用者
pub const MSG_SENDER: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// 单条路由命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterCommand {
    V4Swap(V4Planner),
    /// 将路由合约中的 ETH 包装为 WETH 发给 recipient
    WrapEth { recipient: Address, amount: U256 },
}

impl RouterCommand {
    pub fn code(&self) -> u8 {
        match self {
            RouterCommand::V4Swap(_) => commands::V4_SWAP,
            RouterCommand::WrapEth { .. } => commands::WRAP_ETH,
        }
    }

    fn encode_input(&self) -> Bytes {
        match self {
            RouterCommand::V4Swap(planner) => planner.encode(),
            RouterCommand::WrapEth { recipient, amount } => {
                Bytes::from(encode(&[Token::Address(*recipient), Token::Uint(*amount)]))
            }
        }
    }
}

/// Universal Router.execute 调用数据
pub fn execute_calldata(commands: &[RouterCommand], deadline: U256) -> Bytes {
    ExecuteCall {
        commands: Bytes::from(commands.iter().map(RouterCommand::code).collect::<Vec<u8>>()),
        inputs: commands.iter().map(RouterCommand::encode_input).collect(),
        deadline,
    }
    .encode()
    .into()
}

/// 解析 execute 调用中的 V4_SWAP 输入
pub fn decode_v4_swaps(calldata: &[u8]) -> Option<Vec<V4Planner>> {
    let call = ExecuteCall::decode(calldata).ok()?;
    let mut swaps = Vec::new();
    for (code, input) in call.commands.iter().zip(call.inputs.iter()) {
        if *code == commands::V4_SWAP {
            swaps.push(V4Planner::decode(input)?);
        }
    }
    Some(swaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniswap::v4::V4Action;
    use models::PoolKey;

    #[test]
    fn test_swap_then_wrap() {
        let pool_key = PoolKey::new(Address::zero(), Address::repeat_byte(7), 3000, 60, Address::zero());
        let planner = V4Planner::swap_exact_in_single(pool_key, false, 1_000, 900, true);
        let calldata = execute_calldata(
            &[
                RouterCommand::V4Swap(planner.clone()),
                RouterCommand::WrapEth { recipient: MSG_SENDER, amount: *CONTRACT_BALANCE },
            ],
            U256::from(100),
        );

        assert_eq!(&calldata[..4], &ethers::utils::id("execute(bytes,bytes[],uint256)")[..]);

        let call = ExecuteCall::decode(&calldata).unwrap();
        assert_eq!(call.commands.to_vec(), vec![commands::V4_SWAP, commands::WRAP_ETH]);

        let swaps = decode_v4_swaps(&calldata).unwrap();
        assert_eq!(swaps, vec![planner]);
        assert!(matches!(
            swaps[0].actions()[0],
            V4Action::SwapExactInSingle { amount_in: 1_000, zero_for_one: false, .. }
        ));
    }
}
