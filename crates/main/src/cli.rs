use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config_crate::{parse_u256, ChainContracts, HarvestConfig, HarvestConfigFile, IndirectRoute};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "fee_harvester")]
#[command(about = "Uniswap v4 手续费领取 / 复投 / 收获工具")]
pub struct Cli {
    /// JSON 配置文件，提供时忽略下面的流水线参数 (--dry-run 除外)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 目标代币地址
    #[arg(long, required_unless_present = "config")]
    pub target_token: Option<Address>,

    /// v4 头寸 id (十进制或 0x 十六进制)
    #[arg(long, value_parser = parse_u256)]
    pub position_id: Option<U256>,

    /// 收获资金转入的金库地址
    #[arg(long)]
    pub vault: Option<Address>,

    /// 复投比例 0-100，其余部分收获
    #[arg(long, default_value = "0")]
    pub compound_pct: u32,

    /// 最低 USD 阈值，0 表示总是执行
    #[arg(long, default_value = "0")]
    pub min_usd: Decimal,

    /// 滑点百分比
    #[arg(long, default_value = "1")]
    pub slippage: Decimal,

    /// 手续费托管合约，覆盖链默认值
    #[arg(long)]
    pub fee_escrow: Option<Address>,

    #[arg(long)]
    pub skip_claim: bool,

    #[arg(long)]
    pub skip_collect: bool,

    /// 只读运行，不发送任何交易
    #[arg(long)]
    pub dry_run: bool,

    /// 结算资产，默认取链配置
    #[arg(long)]
    pub settlement_token: Option<Address>,

    /// 基础资产，默认取链上的 wrapped native
    #[arg(long)]
    pub base_token: Option<Address>,

    /// 基础资产 -> 结算资产 的 V3 费率
    #[arg(long, default_value = "500")]
    pub direct_fee_tier: u32,

    /// 目标代币 -> 基础资产 的路由: auto | v4 | v3:<fee>
    #[arg(long, default_value = "auto", value_parser = parse_indirect_route)]
    pub indirect_route: IndirectRoute,

    /// 交易截止时间 (秒)
    #[arg(long, default_value = "600")]
    pub deadline_secs: u64,

    /// 没有私钥时用于只读查询的钱包地址
    #[arg(long)]
    pub wallet: Option<Address>,

    /// 固定价格覆盖，格式 <address>=<usd>，可重复
    #[arg(long = "price", value_parser = parse_price_override)]
    pub prices: Vec<(Address, Decimal)>,

    /// 币安 symbol 映射，格式 <address>=<SYMBOL>，可重复
    #[arg(long = "symbol", value_parser = parse_symbol_mapping)]
    pub symbols: Vec<(Address, String)>,

    /// 以 JSON 输出运行结果
    #[arg(long)]
    pub json: bool,

    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// 生成流水线配置，校验失败时返回错误
    pub fn harvest_config(&self, contracts: &ChainContracts) -> Result<HarvestConfig> {
        if let Some(path) = &self.config {
            let mut config = HarvestConfig::from_json_file(path, contracts)?;
            config.dry_run |= self.dry_run;
            return Ok(config);
        }

        let target_token = self
            .target_token
            .ok_or_else(|| anyhow!("--target-token is required without --config"))?;
        let file = HarvestConfigFile {
            target_token,
            position_id: self.position_id,
            vault_address: self.vault,
            compound_pct: self.compound_pct,
            min_usd: self.min_usd,
            slippage_pct: self.slippage,
            fee_escrow: self.fee_escrow,
            skip_claim: self.skip_claim,
            skip_collect: self.skip_collect,
            dry_run: self.dry_run,
            settlement_token: self.settlement_token,
            base_token: self.base_token,
            direct_fee_tier: self.direct_fee_tier,
            indirect_route: self.indirect_route,
            deadline_secs: self.deadline_secs,
        };
        file.into_config(contracts).context("Invalid harvest parameters")
    }
}

pub fn parse_indirect_route(s: &str) -> Result<IndirectRoute, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(IndirectRoute::Auto),
        "v4" | "v4-position" => Ok(IndirectRoute::V4Position),
        other => {
            let fee = other
                .strip_prefix("v3:")
                .ok_or_else(|| format!("unknown route '{}', expected auto | v4 | v3:<fee>", s))?;
            fee.parse()
                .map(|fee| IndirectRoute::V3 { fee })
                .map_err(|e| format!("invalid v3 fee '{}': {}", fee, e))
        }
    }
}

fn split_pair(s: &str) -> Result<(Address, &str), String> {
    let (address, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <address>=<value>, got '{}'", s))?;
    let address = Address::from_str(address.trim()).map_err(|e| format!("invalid address '{}': {}", address, e))?;
    Ok((address, value.trim()))
}

pub fn parse_price_override(s: &str) -> Result<(Address, Decimal), String> {
    let (address, price) = split_pair(s)?;
    let price = Decimal::from_str(price).map_err(|e| format!("invalid price '{}': {}", price, e))?;
    if price.is_sign_negative() {
        return Err(format!("price must not be negative: {}", price));
    }
    Ok((address, price))
}

pub fn parse_symbol_mapping(s: &str) -> Result<(Address, String), String> {
    let (address, symbol) = split_pair(s)?;
    if symbol.is_empty() {
        return Err("symbol must not be empty".to_string());
    }
    Ok((address, symbol.to_ascii_uppercase()))
}
