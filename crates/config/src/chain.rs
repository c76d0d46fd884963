use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// 支持的区块链枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum SupportedChain {
    Ethereum = 1,
    Base = 8453,
}

impl SupportedChain {
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 => Some(SupportedChain::Ethereum),
            8453 => Some(SupportedChain::Base),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SupportedChain::Ethereum => "Ethereum",
            SupportedChain::Base => "Base",
        }
    }
}

/// 链上合约地址配置
#[derive(Debug, Clone, Deserialize)]
pub struct ChainContracts {
    /// Uniswap V4 PositionManager
    pub position_manager: Address,
    /// Uniswap V4 StateView - 读取池子状态
    pub state_view: Address,
    /// Universal Router (支持 V4_SWAP)
    pub universal_router: Address,
    /// Uniswap V3 SwapRouter02
    pub swap_router_02: Address,
    /// Permit2
    pub permit2: Address,
    /// Wrapped Native Token 地址 (WETH)
    pub wrapped_native: Address,
    /// 结算稳定币 (USDC)
    pub settlement_token: Address,
    /// 协议费用托管合约 (各部署不同，无默认值)
    pub fee_escrow: Option<Address>,
}

fn addr(s: &str) -> Address {
    // 仅用于下面的常量表
    Address::from_str(s).unwrap_or_default()
}

impl ChainContracts {
    /// 获取以太坊主网合约地址
    pub fn ethereum() -> Self {
        Self {
            position_manager: addr("0xbD216513d74C8cf14cf4747E6AaA6420FF64ee9e"),
            state_view: addr("0x7fFE42C4a5DEeA5b0feC41C94C136Cf115597227"),
            universal_router: addr("0x66a9893cC07D91D95644AEDD05D03f95e1dBA8Af"),
            swap_router_02: addr("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
            permit2: addr("0x000000000022D473030F116dDEE9F6B43aC78BA3"),
            wrapped_native: addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            settlement_token: addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            fee_escrow: None,
        }
    }

    /// 获取 Base 主网合约地址
    pub fn base() -> Self {
        Self {
            position_manager: addr("0x7C5f5A4bBd8fD63184577525326123B519429bDc"),
            state_view: addr("0xA3c0c9b65baD0b08107Aa264b0f3dB444b867A71"),
            universal_router: addr("0x6fF5693b99212Da76ad316178A184AB56D299b43"),
            swap_router_02: addr("0x2626664c2603336E57B271c5C0b26F421741e481"),
            permit2: addr("0x000000000022D473030F116dDEE9F6B43aC78BA3"),
            wrapped_native: addr("0x4200000000000000000000000000000000000006"),
            settlement_token: addr("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            fee_escrow: None,
        }
    }

    /// 根据 chain_id 获取合约地址
    pub fn for_chain(chain_id: u64) -> Option<Self> {
        match SupportedChain::from_chain_id(chain_id)? {
            SupportedChain::Ethereum => Some(Self::ethereum()),
            SupportedChain::Base => Some(Self::base()),
        }
    }
}

/// 链与交易发送配置
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// 私钥 (dry-run 时可为空)
    pub private_key: Option<String>,
    pub contracts: ChainContracts,
    /// 交易确认超时 (秒)
    pub confirmation_timeout_secs: u64,
    /// 需要的确认数
    pub confirmations: usize,
    /// Gas 价格倍数
    pub gas_price_multiplier: f64,
    /// 临时性 RPC 错误的最大重试次数
    pub max_retries: u32,
    /// 首次重试等待 (毫秒)
    pub retry_base_delay_ms: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_address(key: &str) -> Result<Option<Address>> {
    match env::var(key).ok().filter(|s| !s.trim().is_empty()) {
        Some(value) => Address::from_str(value.trim())
            .map(Some)
            .with_context(|| format!("Invalid address in {}", key)),
        None => Ok(None),
    }
}

impl ChainConfig {
    /// 从环境变量 (及 .env 文件) 加载
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let chain_id: u64 = env::var("CHAIN_ID")
            .unwrap_or_else(|_| "8453".to_string())
            .parse()
            .context("Invalid CHAIN_ID")?;
        let chain = SupportedChain::from_chain_id(chain_id)
            .ok_or_else(|| anyhow!("Unsupported CHAIN_ID {}", chain_id))?;

        let rpc_url = env::var("RPC_URL").context("RPC_URL not set")?;

        let mut contracts = ChainContracts::for_chain(chain_id)
            .ok_or_else(|| anyhow!("No contract table for chain {}", chain_id))?;

        // 允许逐项覆盖合约地址
        if let Some(a) = env_address("POSITION_MANAGER_ADDRESS")? {
            contracts.position_manager = a;
        }
        if let Some(a) = env_address("STATE_VIEW_ADDRESS")? {
            contracts.state_view = a;
        }
        if let Some(a) = env_address("UNIVERSAL_ROUTER_ADDRESS")? {
            contracts.universal_router = a;
        }
        if let Some(a) = env_address("SWAP_ROUTER_ADDRESS")? {
            contracts.swap_router_02 = a;
        }
        if let Some(a) = env_address("SETTLEMENT_TOKEN_ADDRESS")? {
            contracts.settlement_token = a;
        }
        contracts.fee_escrow = env_address("FEE_ESCROW_ADDRESS")?;

        Ok(Self {
            chain_id,
            name: chain.name().to_string(),
            rpc_url,
            private_key: env::var("PRIVATE_KEY").ok().filter(|s| !s.is_empty()),
            contracts,
            confirmation_timeout_secs: env_or("CONFIRMATION_TIMEOUT_SECS", 120),
            confirmations: env_or("CONFIRMATIONS", 1),
            gas_price_multiplier: env_or("GAS_PRICE_MULTIPLIER", 1.1),
            max_retries: env_or("RPC_MAX_RETRIES", 4),
            retry_base_delay_ms: env_or("RPC_RETRY_BASE_DELAY_MS", 500),
        })
    }
}
