use ethers::abi::{decode, encode, AbiDecode, AbiEncode, ParamType, Token};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, U256};
use models::{is_native, PoolKey};

use super::math::mul_div;
use super::universal_router::MSG_SENDER;

// V4 PositionManager (ERC-721 头寸)
abigen!(
    IPositionManager,
    r#"[
        function modifyLiquidities(bytes unlockData, uint256 deadline) external payable
        function getPoolAndPositionInfo(uint256 tokenId) external view returns (address, address, uint24, int24, address, uint256)
        function getPositionLiquidity(uint256 tokenId) external view returns (uint128)
        function ownerOf(uint256 tokenId) external view returns (address)
    ]"#
);

// V4 StateView 用于读取池子状态
abigen!(
    IStateView,
    r#"[
        function getSlot0(bytes32 poolId) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee)
        function getFeeGrowthInside(bytes32 poolId, int24 tickLower, int24 tickUpper) external view returns (uint256 feeGrowthInside0X128, uint256 feeGrowthInside1X128)
        function getPositionInfo(bytes32 poolId, address owner, int24 tickLower, int24 tickUpper, bytes32 salt) external view returns (uint128 liquidity, uint256 feeGrowthInside0LastX128, uint256 feeGrowthInside1LastX128)
    ]"#
);

/// V4 periphery Actions 编码
pub mod actions {
    pub const INCREASE_LIQUIDITY: u8 = 0x00;
    pub const DECREASE_LIQUIDITY: u8 = 0x01;
    pub const SWAP_EXACT_IN_SINGLE: u8 = 0x06;
    pub const SETTLE_ALL: u8 = 0x0c;
    pub const SETTLE_PAIR: u8 = 0x0d;
    pub const TAKE: u8 = 0x0e;
    pub const TAKE_ALL: u8 = 0x0f;
    pub const CLOSE_CURRENCY: u8 = 0x12;
    pub const SWEEP: u8 = 0x14;
}

/// V4Router 中 TAKE 的特殊接收者：路由合约自身
pub const ADDRESS_THIS: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2,
]);

fn pool_key_param_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(24),
        ParamType::Int(24),
        ParamType::Address,
    ])
}

fn token_to_i32(word: U256) -> i32 {
    word.low_u32() as i32
}

/// 单个 V4 动作及其参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V4Action {
    IncreaseLiquidity {
        token_id: U256,
        liquidity: u128,
        amount0_max: u128,
        amount1_max: u128,
    },
    DecreaseLiquidity {
        token_id: U256,
        liquidity: u128,
        amount0_min: u128,
        amount1_min: u128,
    },
    SwapExactInSingle {
        pool_key: PoolKey,
        zero_for_one: bool,
        amount_in: u128,
        amount_out_minimum: u128,
    },
    SettleAll { currency: Address, max_amount: U256 },
    SettlePair { currency0: Address, currency1: Address },
    Take { currency: Address, recipient: Address, amount: U256 },
    TakeAll { currency: Address, min_amount: U256 },
    CloseCurrency { currency: Address },
    /// 将合约中剩余的 currency 全部转给 recipient
    Sweep { currency: Address, recipient: Address },
}

impl V4Action {
    pub fn code(&self) -> u8 {
        match self {
            V4Action::IncreaseLiquidity { .. } => actions::INCREASE_LIQUIDITY,
            V4Action::DecreaseLiquidity { .. } => actions::DECREASE_LIQUIDITY,
            V4Action::SwapExactInSingle { .. } => actions::SWAP_EXACT_IN_SINGLE,
            V4Action::SettleAll { .. } => actions::SETTLE_ALL,
            V4Action::SettlePair { .. } => actions::SETTLE_PAIR,
            V4Action::Take { .. } => actions::TAKE,
            V4Action::TakeAll { .. } => actions::TAKE_ALL,
            V4Action::CloseCurrency { .. } => actions::CLOSE_CURRENCY,
            V4Action::Sweep { .. } => actions::SWEEP,
        }
    }

    /// 编码动作参数 (hookData 均为空)
    pub fn encode_params(&self) -> Vec<u8> {
        match self {
            V4Action::IncreaseLiquidity { token_id, liquidity, amount0_max, amount1_max } => encode(&[
                Token::Uint(*token_id),
                Token::Uint(U256::from(*liquidity)),
                Token::Uint(U256::from(*amount0_max)),
                Token::Uint(U256::from(*amount1_max)),
                Token::Bytes(vec![]),
            ]),
            V4Action::DecreaseLiquidity { token_id, liquidity, amount0_min, amount1_min } => encode(&[
                Token::Uint(*token_id),
                Token::Uint(U256::from(*liquidity)),
                Token::Uint(U256::from(*amount0_min)),
                Token::Uint(U256::from(*amount1_min)),
                Token::Bytes(vec![]),
            ]),
            V4Action::SwapExactInSingle { pool_key, zero_for_one, amount_in, amount_out_minimum } => {
                // ExactInputSingleParams 含动态 bytes，整体作为一个 tuple 编码
                encode(&[Token::Tuple(vec![
                    pool_key.to_abi_token(),
                    Token::Bool(*zero_for_one),
                    Token::Uint(U256::from(*amount_in)),
                    Token::Uint(U256::from(*amount_out_minimum)),
                    Token::Bytes(vec![]),
                ])])
            }
            V4Action::SettleAll { currency, max_amount } => {
                encode(&[Token::Address(*currency), Token::Uint(*max_amount)])
            }
            V4Action::SettlePair { currency0, currency1 } => {
                encode(&[Token::Address(*currency0), Token::Address(*currency1)])
            }
            V4Action::Take { currency, recipient, amount } => encode(&[
                Token::Address(*currency),
                Token::Address(*recipient),
                Token::Uint(*amount),
            ]),
            V4Action::TakeAll { currency, min_amount } => {
                encode(&[Token::Address(*currency), Token::Uint(*min_amount)])
            }
            V4Action::CloseCurrency { currency } => encode(&[Token::Address(*currency)]),
            V4Action::Sweep { currency, recipient } => {
                encode(&[Token::Address(*currency), Token::Address(*recipient)])
            }
        }
    }

    /// 按动作编码解析参数，未知动作或参数不合法返回 None
    pub fn decode(code: u8, params: &[u8]) -> Option<Self> {
        let liquidity_params = [
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(128),
            ParamType::Uint(128),
            ParamType::Bytes,
        ];

        match code {
            actions::INCREASE_LIQUIDITY | actions::DECREASE_LIQUIDITY => {
                let tokens = decode(&liquidity_params, params).ok()?;
                let token_id = tokens[0].clone().into_uint()?;
                let liquidity = tokens[1].clone().into_uint()?.low_u128();
                let amount0 = tokens[2].clone().into_uint()?.low_u128();
                let amount1 = tokens[3].clone().into_uint()?.low_u128();
                Some(if code == actions::INCREASE_LIQUIDITY {
                    V4Action::IncreaseLiquidity { token_id, liquidity, amount0_max: amount0, amount1_max: amount1 }
                } else {
                    V4Action::DecreaseLiquidity { token_id, liquidity, amount0_min: amount0, amount1_min: amount1 }
                })
            }
            actions::SWAP_EXACT_IN_SINGLE => {
                let tokens = decode(
                    &[ParamType::Tuple(vec![
                        pool_key_param_type(),
                        ParamType::Bool,
                        ParamType::Uint(128),
                        ParamType::Uint(128),
                        ParamType::Bytes,
                    ])],
                    params,
                )
                .ok()?;
                let fields = tokens.into_iter().next()?.into_tuple()?;
                let key = fields[0].clone().into_tuple()?;
                let pool_key = PoolKey {
                    currency0: key[0].clone().into_address()?,
                    currency1: key[1].clone().into_address()?,
                    fee: key[2].clone().into_uint()?.low_u32(),
                    tick_spacing: token_to_i32(key[3].clone().into_int()?),
                    hooks: key[4].clone().into_address()?,
                };
                Some(V4Action::SwapExactInSingle {
                    pool_key,
                    zero_for_one: fields[1].clone().into_bool()?,
                    amount_in: fields[2].clone().into_uint()?.low_u128(),
                    amount_out_minimum: fields[3].clone().into_uint()?.low_u128(),
                })
            }
            actions::SETTLE_ALL | actions::TAKE_ALL => {
                let tokens = decode(&[ParamType::Address, ParamType::Uint(256)], params).ok()?;
                let currency = tokens[0].clone().into_address()?;
                let amount = tokens[1].clone().into_uint()?;
                Some(if code == actions::SETTLE_ALL {
                    V4Action::SettleAll { currency, max_amount: amount }
                } else {
                    V4Action::TakeAll { currency, min_amount: amount }
                })
            }
            actions::SETTLE_PAIR | actions::SWEEP => {
                let tokens = decode(&[ParamType::Address, ParamType::Address], params).ok()?;
                let first = tokens[0].clone().into_address()?;
                let second = tokens[1].clone().into_address()?;
                Some(if code == actions::SETTLE_PAIR {
                    V4Action::SettlePair { currency0: first, currency1: second }
                } else {
                    V4Action::Sweep { currency: first, recipient: second }
                })
            }
            actions::TAKE => {
                let tokens =
                    decode(&[ParamType::Address, ParamType::Address, ParamType::Uint(256)], params).ok()?;
                Some(V4Action::Take {
                    currency: tokens[0].clone().into_address()?,
                    recipient: tokens[1].clone().into_address()?,
                    amount: tokens[2].clone().into_uint()?,
                })
            }
            actions::CLOSE_CURRENCY => {
                let tokens = decode(&[ParamType::Address], params).ok()?;
                Some(V4Action::CloseCurrency { currency: tokens[0].clone().into_address()? })
            }
            _ => None,
        }
    }
}

/// V4 动作序列构建器
///
/// 编码结果为 `abi.encode(bytes actions, bytes[] params)`，
/// 同时用于 PositionManager 的 unlockData 和 Universal Router 的 V4_SWAP 输入。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct V4Planner {
    actions: Vec<V4Action>,
}

impl V4Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, action: V4Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(&self) -> &[V4Action] {
        &self.actions
    }

    pub fn encode(&self) -> Bytes {
        let codes: Vec<u8> = self.actions.iter().map(V4Action::code).collect();
        let params: Vec<Token> = self
            .actions
            .iter()
            .map(|a| Token::Bytes(a.encode_params()))
            .collect();
        Bytes::from(encode(&[Token::Bytes(codes), Token::Array(params)]))
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let tokens = decode(
            &[ParamType::Bytes, ParamType::Array(Box::new(ParamType::Bytes))],
            data,
        )
        .ok()?;
        let codes = tokens[0].clone().into_bytes()?;
        let params = tokens[1].clone().into_array()?;
        if codes.len() != params.len() {
            return None;
        }

        let mut planner = Self::new();
        for (code, param) in codes.into_iter().zip(params) {
            planner = planner.add(V4Action::decode(code, &param.into_bytes()?)?);
        }
        Some(planner)
    }

    /// 收取手续费：减少 0 流动性，再分别 close 两种币
    pub fn collect_fees(token_id: U256, currency0: Address, currency1: Address) -> Self {
        Self::new()
            .add(V4Action::DecreaseLiquidity {
                token_id,
                liquidity: 0,
                amount0_min: 0,
                amount1_min: 0,
            })
            .add(V4Action::CloseCurrency { currency: currency0 })
            .add(V4Action::CloseCurrency { currency: currency1 })
    }

    /// 复投：增加流动性并结算两种币
    ///
    /// currency0 为原生 ETH 时追加 SWEEP，把多付的 msg.value 退回调用者
    pub fn increase_liquidity(
        token_id: U256,
        liquidity: u128,
        amount0_max: u128,
        amount1_max: u128,
        currency0: Address,
        currency1: Address,
    ) -> Self {
        let planner = Self::new()
            .add(V4Action::IncreaseLiquidity { token_id, liquidity, amount0_max, amount1_max })
            .add(V4Action::SettlePair { currency0, currency1 });
        if is_native(currency0) {
            planner.add(V4Action::Sweep { currency: currency0, recipient: MSG_SENDER })
        } else {
            planner
        }
    }

    /// 单池精确输入兑换
    ///
    /// 输出为原生 ETH 时只能先 TAKE 到路由合约 (随后由调用方 WRAP_ETH)，否则 TAKE_ALL 给调用者
    pub fn swap_exact_in_single(
        pool_key: PoolKey,
        zero_for_one: bool,
        amount_in: u128,
        amount_out_minimum: u128,
        take_to_router: bool,
    ) -> Self {
        let (currency_in, currency_out) = if zero_for_one {
            (pool_key.currency0, pool_key.currency1)
        } else {
            (pool_key.currency1, pool_key.currency0)
        };

        let planner = Self::new()
            .add(V4Action::SwapExactInSingle { pool_key, zero_for_one, amount_in, amount_out_minimum })
            .add(V4Action::SettleAll { currency: currency_in, max_amount: U256::from(amount_in) });

        if take_to_router {
            // amount = 0 表示 OPEN_DELTA，取走全部应得
            planner.add(V4Action::Take { currency: currency_out, recipient: ADDRESS_THIS, amount: U256::zero() })
        } else {
            planner.add(V4Action::TakeAll { currency: currency_out, min_amount: U256::from(amount_out_minimum) })
        }
    }
}

/// PositionManager.modifyLiquidities 调用数据
pub fn modify_liquidities_calldata(planner: &V4Planner, deadline: U256) -> Bytes {
    ModifyLiquiditiesCall { unlock_data: planner.encode(), deadline }.encode().into()
}

/// 解析 modifyLiquidities 调用数据
pub fn decode_modify_liquidities(calldata: &[u8]) -> Option<(V4Planner, U256)> {
    let call = ModifyLiquiditiesCall::decode(calldata).ok()?;
    Some((V4Planner::decode(&call.unlock_data)?, call.deadline))
}

/// PositionManager 中打包存储的 PositionInfo
///
/// 布局 (低位起)：hasSubscriber(8) | tickLower(24) | tickUpper(24) | poolId(200)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionInfo {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub has_subscriber: bool,
}

fn int24_from(word: U256) -> i32 {
    let raw = (word.low_u32() & 0x00ff_ffff) as i32;
    // 符号扩展
    (raw << 8) >> 8
}

impl PositionInfo {
    pub fn from_packed(info: U256) -> Self {
        Self {
            tick_lower: int24_from(info >> 8),
            tick_upper: int24_from(info >> 32),
            has_subscriber: info.low_u32() & 0xff != 0,
        }
    }
}

pub fn pool_and_position_info_calldata(token_id: U256) -> Bytes {
    GetPoolAndPositionInfoCall { token_id }.encode().into()
}

pub fn decode_pool_and_position_info(data: &[u8]) -> Option<(PoolKey, PositionInfo)> {
    let (currency0, currency1, fee, tick_spacing, hooks, info) =
        <(Address, Address, u32, i32, Address, U256)>::decode(data).ok()?;
    let key = PoolKey { currency0, currency1, fee, tick_spacing, hooks };
    Some((key, PositionInfo::from_packed(info)))
}

pub fn position_liquidity_calldata(token_id: U256) -> Bytes {
    GetPositionLiquidityCall { token_id }.encode().into()
}

pub fn owner_of_calldata(token_id: U256) -> Bytes {
    OwnerOfCall { token_id }.encode().into()
}

/// StateView.getSlot0 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub protocol_fee: u32,
    pub lp_fee: u32,
}

pub fn slot0_calldata(pool_id: [u8; 32]) -> Bytes {
    GetSlot0Call { pool_id }.encode().into()
}

pub fn decode_slot0(data: &[u8]) -> Option<Slot0> {
    let (sqrt_price_x96, tick, protocol_fee, lp_fee) = <(U256, i32, u32, u32)>::decode(data).ok()?;
    Some(Slot0 { sqrt_price_x96, tick, protocol_fee, lp_fee })
}

pub fn fee_growth_inside_calldata(pool_id: [u8; 32], tick_lower: i32, tick_upper: i32) -> Bytes {
    GetFeeGrowthInsideCall { pool_id, tick_lower, tick_upper }.encode().into()
}

/// 头寸在 PoolManager 中的记录 (owner 为 PositionManager，salt 为 tokenId)
pub fn position_state_calldata(
    pool_id: [u8; 32],
    owner: Address,
    tick_lower: i32,
    tick_upper: i32,
    salt: [u8; 32],
) -> Bytes {
    GetPositionInfoCall { pool_id, owner, tick_lower, tick_upper, salt }.encode().into()
}

pub fn decode_position_liquidity(data: &[u8]) -> Option<u128> {
    let liquidity = U256::decode(data).ok()?;
    (liquidity <= U256::from(u128::MAX)).then(|| liquidity.as_u128())
}

pub fn decode_owner(data: &[u8]) -> Option<Address> {
    Address::decode(data).ok()
}

/// (feeGrowthInside0X128, feeGrowthInside1X128)
pub fn decode_fee_growth_inside(data: &[u8]) -> Option<(U256, U256)> {
    <(U256, U256)>::decode(data).ok()
}

/// StateView.getPositionInfo 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionState {
    pub liquidity: u128,
    pub fee_growth_inside0_last_x128: U256,
    pub fee_growth_inside1_last_x128: U256,
}

pub fn decode_position_state(data: &[u8]) -> Option<PositionState> {
    let (liquidity, last0, last1) = <(U256, U256, U256)>::decode(data).ok()?;
    if liquidity > U256::from(u128::MAX) {
        return None;
    }
    Some(PositionState {
        liquidity: liquidity.as_u128(),
        fee_growth_inside0_last_x128: last0,
        fee_growth_inside1_last_x128: last1,
    })
}

/// 待领取手续费 = liquidity * (feeGrowthInside - feeGrowthInsideLast) / 2^128
///
/// fee growth 允许溢出回绕，差值按 wrapping 计算
pub fn fees_owed(liquidity: u128, fee_growth_inside_x128: U256, fee_growth_inside_last_x128: U256) -> U256 {
    let (growth, _) = fee_growth_inside_x128.overflowing_sub(fee_growth_inside_last_x128);
    mul_div(growth, U256::from(liquidity), U256::one() << 128).unwrap_or_default()
}
