use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use thiserror::Error;

use crate::ChainContracts;

/// 配置校验错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("compound percentage must be within 0..=100, got {0}")]
    CompoundPctOutOfRange(u32),

    #[error("slippage percentage must be within 0..=50, got {0}")]
    SlippageOutOfRange(Decimal),

    #[error("minimum USD threshold must not be negative, got {0}")]
    NegativeThreshold(Decimal),

    #[error("target token must not be the zero address")]
    MissingTargetToken,
}

/// 目标代币兑换到基础资产 (WETH) 时使用的间接路由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndirectRoute {
    /// 头寸所在池子包含基础资产时走 V4，否则走 V3 1% 费率
    #[default]
    Auto,
    /// 通过头寸所在的 V4 池子
    V4Position,
    /// 通过指定费率的 V3 池子
    V3 { fee: u32 },
}

/// 单次收获流水线的不可变配置
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    pub target_token: Address,
    pub position_id: Option<U256>,
    pub vault_address: Option<Address>,
    /// 复投比例 0..=100，收获比例 = 100 - compound_pct
    pub compound_pct: u8,
    /// 最低 USD 阈值，0 表示总是执行
    pub min_usd: Decimal,
    pub slippage_pct: Decimal,
    pub fee_escrow: Option<Address>,
    pub skip_claim: bool,
    pub skip_collect: bool,
    pub dry_run: bool,
    /// 结算资产 (USDC)
    pub settlement_token: Address,
    /// 基础资产 (WETH)
    pub base_token: Address,
    /// WETH -> 结算资产 的 V3 费率
    pub direct_fee_tier: u32,
    pub indirect_route: IndirectRoute,
    /// 交易截止时间 (秒)
    pub deadline_secs: u64,
}

impl HarvestConfig {
    pub fn harvest_pct(&self) -> u8 {
        100 - self.compound_pct
    }

    /// 从 JSON 文件加载，链上默认地址取自 `contracts`
    pub fn from_json_file(path: impl AsRef<Path>, contracts: &ChainContracts) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read harvest config {}", path.display()))?;
        let raw: HarvestConfigFile = serde_json::from_str(&text)
            .with_context(|| format!("Invalid harvest config {}", path.display()))?;
        Ok(raw.into_config(contracts)?)
    }
}

/// JSON 配置文件结构 (与 CLI 参数一一对应)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestConfigFile {
    pub target_token: Address,
    #[serde(default, deserialize_with = "deserialize_opt_u256")]
    pub position_id: Option<U256>,
    #[serde(default)]
    pub vault_address: Option<Address>,
    #[serde(default)]
    pub compound_pct: u32,
    #[serde(default)]
    pub min_usd: Decimal,
    #[serde(default = "default_slippage")]
    pub slippage_pct: Decimal,
    #[serde(default)]
    pub fee_escrow: Option<Address>,
    #[serde(default)]
    pub skip_claim: bool,
    #[serde(default)]
    pub skip_collect: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub settlement_token: Option<Address>,
    #[serde(default)]
    pub base_token: Option<Address>,
    #[serde(default = "default_direct_fee_tier")]
    pub direct_fee_tier: u32,
    #[serde(default)]
    pub indirect_route: IndirectRoute,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

pub fn default_slippage() -> Decimal {
    Decimal::new(1, 0)
}

pub fn default_direct_fee_tier() -> u32 {
    500 // WETH/USDC 0.05%
}

pub fn default_deadline_secs() -> u64 {
    600
}

impl HarvestConfigFile {
    /// 校验并生成 `HarvestConfig`
    pub fn into_config(self, contracts: &ChainContracts) -> Result<HarvestConfig, ConfigError> {
        if self.target_token == Address::zero() {
            return Err(ConfigError::MissingTargetToken);
        }
        if self.compound_pct > 100 {
            return Err(ConfigError::CompoundPctOutOfRange(self.compound_pct));
        }
        if self.slippage_pct < Decimal::ZERO || self.slippage_pct > Decimal::from(50) {
            return Err(ConfigError::SlippageOutOfRange(self.slippage_pct));
        }
        if self.min_usd < Decimal::ZERO {
            return Err(ConfigError::NegativeThreshold(self.min_usd));
        }

        Ok(HarvestConfig {
            target_token: self.target_token,
            position_id: self.position_id,
            vault_address: self.vault_address,
            compound_pct: self.compound_pct as u8,
            min_usd: self.min_usd,
            slippage_pct: self.slippage_pct,
            fee_escrow: self.fee_escrow.or(contracts.fee_escrow),
            skip_claim: self.skip_claim,
            skip_collect: self.skip_collect,
            dry_run: self.dry_run,
            settlement_token: self.settlement_token.unwrap_or(contracts.settlement_token),
            base_token: self.base_token.unwrap_or(contracts.wrapped_native),
            direct_fee_tier: self.direct_fee_tier,
            indirect_route: self.indirect_route,
            deadline_secs: self.deadline_secs,
        })
    }
}

/// 接受十进制数字、十进制字符串或 0x 十六进制字符串
fn deserialize_opt_u256<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(U256::from(n))),
        Some(NumOrStr::Str(s)) => parse_u256(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// 解析头寸 id
pub fn parse_u256(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        U256::from_str_radix(hex, 16).map_err(|e| format!("invalid hex number {}: {}", s, e))
    } else {
        U256::from_dec_str(s).map_err(|e| format!("invalid number {}: {}", s, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn file(json: &str) -> HarvestConfigFile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_json_defaults() {
        let contracts = ChainContracts::base();
        let config = file(r#"{"targetToken":"0x1111111111111111111111111111111111111111","positionId":"123456"}"#)
            .into_config(&contracts)
            .unwrap();

        assert_eq!(config.position_id, Some(U256::from(123456u64)));
        assert_eq!(config.compound_pct, 0);
        assert_eq!(config.harvest_pct(), 100);
        assert_eq!(config.slippage_pct, dec!(1));
        assert_eq!(config.min_usd, Decimal::ZERO);
        assert_eq!(config.settlement_token, contracts.settlement_token);
        assert_eq!(config.base_token, contracts.wrapped_native);
        assert_eq!(config.indirect_route, IndirectRoute::Auto);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_json_full() {
        let contracts = ChainContracts::base();
        let config = file(
            r#"{
                "targetToken": "0x1111111111111111111111111111111111111111",
                "positionId": 42,
                "vaultAddress": "0x2222222222222222222222222222222222222222",
                "compoundPct": 50,
                "minUsd": "10",
                "slippagePct": "2.5",
                "skipClaim": true,
                "dryRun": true,
                "indirectRoute": {"kind": "v3", "fee": 3000}
            }"#,
        )
        .into_config(&contracts)
        .unwrap();

        assert_eq!(config.position_id, Some(U256::from(42)));
        assert_eq!(config.compound_pct, 50);
        assert_eq!(config.min_usd, dec!(10));
        assert_eq!(config.slippage_pct, dec!(2.5));
        assert!(config.skip_claim && config.dry_run && !config.skip_collect);
        assert_eq!(config.indirect_route, IndirectRoute::V3 { fee: 3000 });
    }

    #[test]
    fn test_validation_errors() {
        let contracts = ChainContracts::base();
        let err = file(r#"{"targetToken":"0x1111111111111111111111111111111111111111","compoundPct":101}"#)
            .into_config(&contracts)
            .unwrap_err();
        assert_eq!(err, ConfigError::CompoundPctOutOfRange(101));

        let err = file(r#"{"targetToken":"0x1111111111111111111111111111111111111111","slippagePct":"75"}"#)
            .into_config(&contracts)
            .unwrap_err();
        assert_eq!(err, ConfigError::SlippageOutOfRange(dec!(75)));

        let err = file(r#"{"targetToken":"0x0000000000000000000000000000000000000000"}"#)
            .into_config(&contracts)
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingTargetToken);
    }

    #[test]
    fn test_parse_u256() {
        assert_eq!(parse_u256("0x10").unwrap(), U256::from(16));
        assert_eq!(parse_u256(" 77 ").unwrap(), U256::from(77));
        assert!(parse_u256("abc").is_err());
    }
}
