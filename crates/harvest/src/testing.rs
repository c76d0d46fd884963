//! 测试用的脚本化链

use async_trait::async_trait;
use config_crate::{ChainContracts, HarvestConfig, IndirectRoute};
use dex::uniswap::math::{get_amounts_for_liquidity, get_sqrt_ratio_at_tick, mul_div};
use dex::uniswap::universal_router::decode_v4_swaps;
use dex::uniswap::v3::{ExactInputSingleCall, ExactInputSingleParams};
use dex::uniswap::v4::{self, IPositionManagerCalls, IStateViewCalls, ADDRESS_THIS};
use dex::{erc20, escrow, permit2, V4Action};
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::types::{Address, Bytes, H256, U256};
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use models::{is_native, PoolKey, Position};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use services::StaticPriceOracle;
use std::collections::{HashMap, HashSet};

lazy_static::lazy_static! {
    pub static ref TARGET: Address = Address::repeat_byte(0x11);
    pub static ref USDC: Address = Address::repeat_byte(0x22);
    pub static ref WETH: Address = Address::repeat_byte(0x33);
    pub static ref VAULT: Address = Address::repeat_byte(0x44);
    pub static ref ESCROW: Address = Address::repeat_byte(0x55);
    pub static ref PERMIT2: Address = Address::repeat_byte(0x66);
    pub static ref POSITION_MANAGER: Address = Address::repeat_byte(0x77);
    pub static ref STATE_VIEW: Address = Address::repeat_byte(0x88);
    pub static ref UNIVERSAL_ROUTER: Address = Address::repeat_byte(0x99);
    pub static ref SWAP_ROUTER: Address = Address::repeat_byte(0xaa);
    pub static ref WALLET: Address = Address::repeat_byte(0xbb);
    pub static ref POSITION_ID: U256 = U256::from(4242);
}

pub const GAS_USED: u64 = 100_000;
pub const GAS_PRICE: u64 = 1_000_000_000;
/// 池子当前 tick，约 4000 TARGET / ETH
pub const POOL_TICK: i32 = 82_940;

/// 可注入 revert 的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Claim,
    Collect,
    Compound,
    Swap,
    Wrap,
    Approve,
    Transfer,
}

struct MockPosition {
    pool_key: PoolKey,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
    owner: Address,
    sqrt_price_x96: U256,
    pending: [U256; 2],
}

struct MockState {
    /// (token, account) -> balance，原生币为零地址
    balances: HashMap<(Address, Address), U256>,
    decimals: HashMap<Address, u8>,
    available: HashMap<Address, U256>,
    claim_extra: U256,
    /// (token, spender)
    erc20_allowances: HashMap<(Address, Address), U256>,
    permit2_allowances: HashMap<(Address, Address), (U256, u64)>,
    position: Option<MockPosition>,
    /// (from, to) -> (num, den)
    rates: HashMap<(Address, Address), (U256, U256)>,
    fail_on: HashSet<MockOp>,
    sent: Vec<TxRequest>,
    v3_swaps: Vec<ExactInputSingleParams>,
    v4_swaps: usize,
    last_increase: [U256; 2],
    timestamp: u64,
    nonce: u64,
}

pub struct MockChain {
    wallet: Address,
    read_only: bool,
    state: Mutex<MockState>,
}

pub fn pool_key() -> PoolKey {
    PoolKey::new(Address::zero(), *TARGET, 10_000, 200, Address::zero())
}

pub fn position_fixture(liquidity: u128) -> Position {
    Position::new(*POSITION_ID, pool_key(), -887_200, 887_200, liquidity).unwrap()
}

pub fn oracle() -> StaticPriceOracle {
    StaticPriceOracle::new()
        .with_price(*TARGET, dec!(0.5))
        .with_price(*WETH, dec!(2000))
        .with_price(Address::zero(), dec!(2000))
        .with_price(*USDC, dec!(1))
}

pub fn harvest_config(compound_pct: u8) -> HarvestConfig {
    HarvestConfig {
        target_token: *TARGET,
        position_id: Some(*POSITION_ID),
        vault_address: Some(*VAULT),
        compound_pct,
        min_usd: dec!(0),
        slippage_pct: dec!(1),
        fee_escrow: Some(*ESCROW),
        skip_claim: false,
        skip_collect: false,
        dry_run: false,
        settlement_token: *USDC,
        base_token: *WETH,
        direct_fee_tier: 500,
        indirect_route: IndirectRoute::Auto,
        deadline_secs: 600,
    }
}

fn revert(reason: impl Into<String>) -> ChainError {
    ChainError::Reverted {
        tx_hash: None,
        reason: reason.into(),
    }
}

impl MockChain {
    pub fn new() -> Self {
        let mut rates = HashMap::new();
        // 4000 TARGET = 1 ETH = 2000 USDC
        rates.insert((*TARGET, *WETH), (U256::one(), U256::from(4_000)));
        rates.insert((*TARGET, Address::zero()), (U256::one(), U256::from(4_000)));
        rates.insert((*WETH, *USDC), (U256::from(2), U256::exp10(9)));

        let mut state = MockState {
            balances: HashMap::new(),
            decimals: HashMap::new(),
            available: HashMap::new(),
            claim_extra: U256::zero(),
            erc20_allowances: HashMap::new(),
            permit2_allowances: HashMap::new(),
            position: None,
            rates,
            fail_on: HashSet::new(),
            sent: Vec::new(),
            v3_swaps: Vec::new(),
            v4_swaps: 0,
            last_increase: [U256::zero(); 2],
            timestamp: 1_700_000_000,
            nonce: 0,
        };
        state.balances.insert((Address::zero(), *WALLET), U256::exp10(18));
        state.decimals.insert(*USDC, 6);

        Self {
            wallet: *WALLET,
            read_only: false,
            state: Mutex::new(state),
        }
    }

    /// 持有 (ETH, TARGET) 全区间头寸，待收手续费 0.1 ETH + 400 TARGET
    pub fn with_position() -> Self {
        let chain = Self::new();
        chain.state.lock().position = Some(MockPosition {
            pool_key: pool_key(),
            tick_lower: -887_200,
            tick_upper: 887_200,
            liquidity: 1u128 << 64,
            owner: *WALLET,
            sqrt_price_x96: get_sqrt_ratio_at_tick(POOL_TICK).unwrap(),
            pending: [U256::exp10(17), U256::from(400) * U256::exp10(18)],
        });
        chain
    }

    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn contracts() -> ChainContracts {
        ChainContracts {
            position_manager: *POSITION_MANAGER,
            state_view: *STATE_VIEW,
            universal_router: *UNIVERSAL_ROUTER,
            swap_router_02: *SWAP_ROUTER,
            permit2: *PERMIT2,
            wrapped_native: *WETH,
            settlement_token: *USDC,
            fee_escrow: Some(*ESCROW),
        }
    }

    pub fn set_balance(&self, token: Address, amount: U256) {
        self.state.lock().balances.insert((token, self.wallet), amount);
    }

    pub fn balance(&self, token: Address) -> U256 {
        self.balance_of_account(token, self.wallet)
    }

    pub fn balance_of_account(&self, token: Address, account: Address) -> U256 {
        self.state.lock().balances.get(&(token, account)).copied().unwrap_or_default()
    }

    pub fn set_available(&self, token: Address, amount: U256) {
        self.state.lock().available.insert(token, amount);
    }

    /// 下一次领取时额外转入的无关数量
    pub fn set_claim_extra(&self, amount: U256) {
        self.state.lock().claim_extra = amount;
    }

    pub fn set_pending(&self, pending: [U256; 2]) {
        if let Some(position) = self.state.lock().position.as_mut() {
            position.pending = pending;
        }
    }

    pub fn pending(&self) -> [U256; 2] {
        self.state.lock().position.as_ref().map(|p| p.pending).unwrap_or_default()
    }

    pub fn set_position_liquidity(&self, liquidity: u128) {
        if let Some(position) = self.state.lock().position.as_mut() {
            position.liquidity = liquidity;
        }
    }

    pub fn position_liquidity(&self) -> u128 {
        self.state.lock().position.as_ref().map(|p| p.liquidity).unwrap_or_default()
    }

    pub fn set_position_owner(&self, owner: Address) {
        if let Some(position) = self.state.lock().position.as_mut() {
            position.owner = owner;
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        pool_key()
    }

    /// 移除 from -> to 的兑换流动性
    pub fn remove_liquidity(&self, from: Address, to: Address) {
        self.state.lock().rates.remove(&(from, to));
    }

    pub fn fail_on(&self, op: MockOp) {
        self.state.lock().fail_on.insert(op);
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.state.lock().sent.clone()
    }

    pub fn v3_swaps(&self) -> Vec<ExactInputSingleParams> {
        self.state.lock().v3_swaps.clone()
    }

    pub fn v4_swaps(&self) -> usize {
        self.state.lock().v4_swaps
    }

    pub fn last_increase_amounts(&self) -> [U256; 2] {
        self.state.lock().last_increase
    }

    /// 已发送的 modifyLiquidities 中的动作
    pub fn sent_position_actions(&self) -> Vec<Vec<V4Action>> {
        self.sent()
            .iter()
            .filter(|tx| tx.to == *POSITION_MANAGER)
            .filter_map(|tx| v4::decode_modify_liquidities(&tx.data))
            .map(|(planner, _)| planner.actions().to_vec())
            .collect()
    }

    fn read(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let state = self.state.lock();

        if to == *ESCROW {
            return match escrow::IFeeEscrowCalls::decode(data) {
                Ok(escrow::IFeeEscrowCalls::AvailableFees(c)) => {
                    Ok(state.available.get(&c.token).copied().unwrap_or_default().encode())
                }
                _ => Err(revert("escrow: unknown call")),
            };
        }

        if to == *POSITION_MANAGER || to == *STATE_VIEW {
            let position = state.position.as_ref().ok_or_else(|| revert("no position"))?;
            if to == *POSITION_MANAGER {
                return match IPositionManagerCalls::decode(data) {
                    Ok(IPositionManagerCalls::GetPoolAndPositionInfo(_)) => {
                        let key = position.pool_key;
                        let packed = (U256::from(position.tick_upper as u32 & 0x00ff_ffff) << 32)
                            | (U256::from(position.tick_lower as u32 & 0x00ff_ffff) << 8);
                        Ok((key.currency0, key.currency1, key.fee, key.tick_spacing, key.hooks, packed).encode())
                    }
                    Ok(IPositionManagerCalls::GetPositionLiquidity(_)) => Ok(U256::from(position.liquidity).encode()),
                    Ok(IPositionManagerCalls::OwnerOf(_)) => Ok(position.owner.encode()),
                    _ => Err(revert("position manager: unknown call")),
                };
            }
            return match IStateViewCalls::decode(data) {
                Ok(IStateViewCalls::GetSlot0(_)) => {
                    Ok((position.sqrt_price_x96, POOL_TICK, 0u32, position.pool_key.fee).encode())
                }
                Ok(IStateViewCalls::GetFeeGrowthInside(_)) => {
                    let growth = |pending: U256| {
                        mul_div(pending, U256::one() << 128, U256::from(position.liquidity)).unwrap_or_default()
                    };
                    Ok((growth(position.pending[0]), growth(position.pending[1])).encode())
                }
                Ok(IStateViewCalls::GetPositionInfo(_)) => {
                    Ok((U256::from(position.liquidity), U256::zero(), U256::zero()).encode())
                }
                _ => Err(revert("state view: unknown call")),
            };
        }

        if to == *PERMIT2 {
            return match permit2::IPermit2Calls::decode(data) {
                Ok(permit2::IPermit2Calls::Allowance(c)) => {
                    let (amount, expiration) = state
                        .permit2_allowances
                        .get(&(c.token, c.spender))
                        .copied()
                        .unwrap_or_default();
                    Ok((amount, expiration, 0u64).encode())
                }
                _ => Err(revert("permit2: unknown call")),
            };
        }

        match erc20::IERC20Calls::decode(data) {
            Ok(erc20::IERC20Calls::BalanceOf(c)) => {
                Ok(state.balances.get(&(to, c.account)).copied().unwrap_or_default().encode())
            }
            Ok(erc20::IERC20Calls::Allowance(c)) => Ok(state
                .erc20_allowances
                .get(&(to, c.spender))
                .copied()
                .unwrap_or_default()
                .encode()),
            Ok(erc20::IERC20Calls::Decimals(_)) => {
                Ok(U256::from(state.decimals.get(&to).copied().unwrap_or(18)).encode())
            }
            Ok(erc20::IERC20Calls::Symbol(_)) => Ok("MOCK".to_string().encode()),
            _ => Err(revert("erc20: unknown call")),
        }
    }

    fn classify(tx: &TxRequest) -> Option<MockOp> {
        if tx.to == *ESCROW {
            return Some(MockOp::Claim);
        }
        if tx.to == *POSITION_MANAGER {
            let (planner, _) = v4::decode_modify_liquidities(&tx.data)?;
            return match planner.actions().first()? {
                V4Action::DecreaseLiquidity { .. } => Some(MockOp::Collect),
                V4Action::IncreaseLiquidity { .. } => Some(MockOp::Compound),
                _ => None,
            };
        }
        if tx.to == *UNIVERSAL_ROUTER || tx.to == *SWAP_ROUTER {
            return Some(MockOp::Swap);
        }
        if tx.to == *WETH && tx.data.as_ref() == erc20::deposit_calldata().as_ref() {
            return Some(MockOp::Wrap);
        }
        if tx.to == *PERMIT2 {
            return Some(MockOp::Approve);
        }
        match erc20::IERC20Calls::decode(&tx.data) {
            Ok(erc20::IERC20Calls::Approve(_)) => Some(MockOp::Approve),
            Ok(erc20::IERC20Calls::Transfer(_)) => Some(MockOp::Transfer),
            _ => None,
        }
    }

    fn send(&self, tx: TxRequest) -> Result<TxReceipt, ChainError> {
        if self.read_only {
            return Err(ChainError::ReadOnly(tx.label));
        }

        let mut state = self.state.lock();
        state.sent.push(tx.clone());
        state.nonce += 1;
        let tx_hash = H256::from_low_u64_be(state.nonce);

        let op = Self::classify(&tx);
        if op.map_or(false, |op| state.fail_on.contains(&op)) {
            return Err(ChainError::Reverted {
                tx_hash: Some(tx_hash),
                reason: format!("mock revert: {}", tx.label),
            });
        }

        apply(&mut state, self.wallet, &tx).map_err(|reason| ChainError::Reverted {
            tx_hash: Some(tx_hash),
            reason,
        })?;

        let gas_cost = U256::from(GAS_USED) * U256::from(GAS_PRICE);
        let native = state.balances.entry((Address::zero(), self.wallet)).or_default();
        *native = native.saturating_sub(gas_cost);

        Ok(TxReceipt {
            tx_hash,
            block_number: state.nonce,
            gas_used: U256::from(GAS_USED),
            effective_gas_price: U256::from(GAS_PRICE),
        })
    }
}

fn debit(state: &mut MockState, token: Address, account: Address, amount: U256) -> Result<(), String> {
    let balance = state.balances.entry((token, account)).or_default();
    if *balance < amount {
        return Err(format!("insufficient balance of {:?}: {} < {}", token, balance, amount));
    }
    *balance -= amount;
    Ok(())
}

fn credit(state: &mut MockState, token: Address, account: Address, amount: U256) {
    let balance = state.balances.entry((token, account)).or_default();
    *balance += amount;
}

fn quote(state: &MockState, from: Address, to: Address, amount: U256) -> Result<U256, String> {
    let (num, den) = state
        .rates
        .get(&(from, to))
        .ok_or_else(|| format!("no liquidity for {:?} -> {:?}", from, to))?;
    Ok(amount * *num / *den)
}

fn check_permit2(state: &MockState, token: Address, spender: Address, amount: U256) -> Result<(), String> {
    if is_native(token) {
        return Ok(());
    }
    let erc20 = state.erc20_allowances.get(&(token, *PERMIT2)).copied().unwrap_or_default();
    let (allowance, expiration) = state.permit2_allowances.get(&(token, spender)).copied().unwrap_or_default();
    if erc20 < amount || allowance < amount || expiration <= state.timestamp {
        return Err(format!("AllowanceExpired / InsufficientAllowance for {:?}", token));
    }
    Ok(())
}

fn apply(state: &mut MockState, wallet: Address, tx: &TxRequest) -> Result<(), String> {
    if tx.to == *ESCROW {
        if let Ok(escrow::IFeeEscrowCalls::Claim(c)) = escrow::IFeeEscrowCalls::decode(&tx.data) {
            let amount = state.available.remove(&c.token).unwrap_or_default();
            let extra = std::mem::take(&mut state.claim_extra);
            credit(state, c.token, wallet, amount + extra);
        }
        return Ok(());
    }

    if tx.to == *POSITION_MANAGER {
        let (planner, _) = v4::decode_modify_liquidities(&tx.data).ok_or("bad unlockData")?;
        let position = state.position.as_ref().ok_or("no position")?;
        let [currency0, currency1] = position.pool_key.currencies();
        match planner.actions().first() {
            Some(V4Action::DecreaseLiquidity { .. }) => {
                let pending = position.pending;
                credit(state, currency0, wallet, pending[0]);
                credit(state, currency1, wallet, pending[1]);
                if let Some(position) = state.position.as_mut() {
                    position.pending = [U256::zero(); 2];
                }
            }
            Some(V4Action::IncreaseLiquidity { liquidity, amount0_max, amount1_max, .. }) => {
                let sqrt_a = get_sqrt_ratio_at_tick(position.tick_lower).map_err(|e| e.to_string())?;
                let sqrt_b = get_sqrt_ratio_at_tick(position.tick_upper).map_err(|e| e.to_string())?;
                let (amount0, amount1) = get_amounts_for_liquidity(position.sqrt_price_x96, sqrt_a, sqrt_b, *liquidity);
                if amount0 > U256::from(*amount0_max) || amount1 > U256::from(*amount1_max) {
                    return Err("MaximumAmountExceeded".to_string());
                }
                if is_native(currency0) && tx.value < amount0 {
                    return Err("CurrencyNotSettled()".to_string());
                }
                check_permit2(state, currency0, *POSITION_MANAGER, amount0)?;
                check_permit2(state, currency1, *POSITION_MANAGER, amount1)?;
                debit(state, currency0, wallet, amount0)?;
                debit(state, currency1, wallet, amount1)?;
                let liquidity = *liquidity;
                if let Some(position) = state.position.as_mut() {
                    position.liquidity += liquidity;
                }
                state.last_increase = [amount0, amount1];
            }
            _ => return Err("unsupported plan".to_string()),
        }
        return Ok(());
    }

    if tx.to == *UNIVERSAL_ROUTER {
        let swaps = decode_v4_swaps(&tx.data).ok_or("bad execute")?;
        for planner in swaps {
            let Some(V4Action::SwapExactInSingle { pool_key, zero_for_one, amount_in, amount_out_minimum }) =
                planner.actions().first().cloned()
            else {
                return Err("unsupported v4 swap".to_string());
            };
            let (currency_in, currency_out) = if zero_for_one {
                (pool_key.currency0, pool_key.currency1)
            } else {
                (pool_key.currency1, pool_key.currency0)
            };
            let amount_in = U256::from(amount_in);
            let out = quote(state, currency_in, currency_out, amount_in)?;
            if out < U256::from(amount_out_minimum) {
                return Err("V4TooLittleReceived".to_string());
            }
            check_permit2(state, currency_in, *UNIVERSAL_ROUTER, amount_in)?;
            debit(state, currency_in, wallet, amount_in)?;

            let taken_by_router = planner
                .actions()
                .iter()
                .any(|a| matches!(a, V4Action::Take { recipient, .. } if *recipient == ADDRESS_THIS));
            // 路由合约收到的 ETH 由 WRAP_ETH 包装后发回
            let received = if taken_by_router && is_native(currency_out) { *WETH } else { currency_out };
            credit(state, received, wallet, out);
            state.v4_swaps += 1;
        }
        return Ok(());
    }

    if tx.to == *SWAP_ROUTER {
        let Ok(call) = ExactInputSingleCall::decode(&tx.data) else {
            return Err("unsupported router call".to_string());
        };
        let params = call.params;
        let allowance = state
            .erc20_allowances
            .get(&(params.token_in, *SWAP_ROUTER))
            .copied()
            .unwrap_or_default();
        if allowance < params.amount_in {
            return Err("STF".to_string());
        }
        let out = quote(state, params.token_in, params.token_out, params.amount_in)?;
        if out < params.amount_out_minimum {
            return Err("Too little received".to_string());
        }
        debit(state, params.token_in, wallet, params.amount_in)?;
        credit(state, params.token_out, params.recipient, out);
        state.v3_swaps.push(params);
        return Ok(());
    }

    if tx.to == *WETH && tx.data.as_ref() == erc20::deposit_calldata().as_ref() {
        debit(state, Address::zero(), wallet, tx.value)?;
        credit(state, *WETH, wallet, tx.value);
        return Ok(());
    }

    if tx.to == *PERMIT2 {
        if let Ok(permit2::IPermit2Calls::Approve(c)) = permit2::IPermit2Calls::decode(&tx.data) {
            state.permit2_allowances.insert((c.token, c.spender), (c.amount, c.expiration));
        }
        return Ok(());
    }

    match erc20::IERC20Calls::decode(&tx.data) {
        Ok(erc20::IERC20Calls::Approve(c)) => {
            state.erc20_allowances.insert((tx.to, c.spender), c.amount);
        }
        Ok(erc20::IERC20Calls::Transfer(c)) => {
            debit(state, tx.to, wallet, c.amount)?;
            credit(state, tx.to, c.to, c.amount);
        }
        _ => {}
    }
    Ok(())
}

#[async_trait]
impl ChainClient for MockChain {
    fn address(&self) -> Address {
        self.wallet
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.read(to, &data).map(Bytes::from)
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        Ok(self.balance_of_account(Address::zero(), owner))
    }

    async fn block_timestamp(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().timestamp)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt, ChainError> {
        self.send(tx)
    }
}
