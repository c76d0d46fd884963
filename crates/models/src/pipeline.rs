use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TokenAmount;

/// 流水线阶段 (按执行顺序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Claim,
    Collect,
    AggregateThreshold,
    Split,
    Compound,
    Swap,
    Transfer,
    Summarize,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Claim => "claim",
            PipelineStage::Collect => "collect",
            PipelineStage::AggregateThreshold => "aggregate",
            PipelineStage::Split => "split",
            PipelineStage::Compound => "compound",
            PipelineStage::Swap => "swap",
            PipelineStage::Transfer => "transfer",
            PipelineStage::Summarize => "summarize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 单个步骤的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Succeeded { detail: String },
    Skipped { reason: String },
    Failed { reason: String, retryable: bool },
}

impl StepResult {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        StepResult::Succeeded { detail: detail.into() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepResult::Skipped { reason: reason.into() }
    }

    pub fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        StepResult::Failed { reason: reason.into(), retryable }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepResult::Failed { .. })
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepResult::Succeeded { .. })
    }
}

/// 流水线中的一条步骤记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stage: PipelineStage,
    /// 细分标识，例如代币地址；整段步骤为空
    pub subject: Option<Address>,
    pub result: StepResult,
}

/// 按代币累计的数量，保持插入顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenLedger(Vec<TokenAmount>);

impl TokenLedger {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, token: Address, amount: U256) {
        if let Some(entry) = self.0.iter_mut().find(|e| e.token == token) {
            entry.amount = entry.amount.saturating_add(amount);
        } else {
            self.0.push(TokenAmount::new(token, amount));
        }
    }

    /// 覆盖写入
    pub fn set(&mut self, token: Address, amount: U256) {
        if let Some(entry) = self.0.iter_mut().find(|e| e.token == token) {
            entry.amount = amount;
        } else {
            self.0.push(TokenAmount::new(token, amount));
        }
    }

    pub fn get(&self, token: Address) -> U256 {
        self.0
            .iter()
            .find(|e| e.token == token)
            .map(|e| e.amount)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenAmount> {
        self.0.iter()
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.0.iter().map(|e| e.token).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|e| e.amount.is_zero())
    }

    /// 两个账本逐币种相加
    pub fn merged(&self, other: &TokenLedger) -> TokenLedger {
        let mut merged = self.clone();
        for entry in other.iter() {
            merged.add(entry.token, entry.amount);
        }
        merged
    }
}

/// 一次流水线运行的结果汇总，仅存在于本次运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// 实际生效的复投比例
    pub compound_pct: u8,
    pub compound_disabled_reason: Option<String>,
    pub total_usd: Decimal,
    pub claimed: TokenLedger,
    pub collected: TokenLedger,
    /// 拆分阶段分配给复投的数量
    pub compound_allocation: TokenLedger,
    /// 拆分阶段分配给收获的数量
    pub harvest_allocation: TokenLedger,
    /// 复投计划的流动性增量
    pub compound_liquidity: Option<u128>,
    pub compounded: TokenLedger,
    pub harvested: TokenLedger,
    pub settlement_received: U256,
    pub transferred: U256,
    pub below_threshold: bool,
    pub steps: Vec<StepRecord>,
    pub tx_hashes: Vec<H256>,
}

impl PipelineResult {
    pub fn new(dry_run: bool, compound_pct: u8) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            compound_pct,
            compound_disabled_reason: None,
            total_usd: Decimal::ZERO,
            claimed: TokenLedger::new(),
            collected: TokenLedger::new(),
            compound_allocation: TokenLedger::new(),
            harvest_allocation: TokenLedger::new(),
            compound_liquidity: None,
            compounded: TokenLedger::new(),
            harvested: TokenLedger::new(),
            settlement_received: U256::zero(),
            transferred: U256::zero(),
            below_threshold: false,
            steps: Vec::new(),
            tx_hashes: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: PipelineStage, subject: Option<Address>, result: StepResult) {
        self.steps.push(StepRecord { stage, subject, result });
    }

    pub fn steps_for(&self, stage: PipelineStage) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |s| s.stage == stage)
    }

    /// 某阶段是否有成功步骤
    pub fn stage_succeeded(&self, stage: PipelineStage) -> bool {
        self.steps_for(stage).any(|s| s.result.is_succeeded())
    }

    pub fn stage_failed(&self, stage: PipelineStage) -> bool {
        self.steps_for(stage).any(|s| s.result.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.result.is_failed())
    }

    /// 本次运行的总额 (领取 + 收集)
    pub fn total_fees(&self) -> TokenLedger {
        self.claimed.merged(&self.collected)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_accumulates_per_token() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let mut ledger = TokenLedger::new();
        ledger.add(a, U256::from(5));
        ledger.add(b, U256::from(7));
        ledger.add(a, U256::from(3));

        assert_eq!(ledger.get(a), U256::from(8));
        assert_eq!(ledger.get(b), U256::from(7));
        assert_eq!(ledger.get(Address::zero()), U256::zero());
        assert_eq!(ledger.tokens(), vec![a, b]);
    }

    #[test]
    fn test_result_failure_tracking() {
        let mut result = PipelineResult::new(false, 50);
        result.record(PipelineStage::Claim, None, StepResult::skipped("nothing available"));
        assert!(!result.has_failures());

        result.record(PipelineStage::Swap, Some(Address::repeat_byte(3)), StepResult::failed("reverted", false));
        assert!(result.has_failures());
        assert!(result.stage_failed(PipelineStage::Swap));
        assert!(!result.stage_succeeded(PipelineStage::Claim));
    }

    #[test]
    fn test_step_result_serializes_with_status_tag() {
        let json = serde_json::to_string(&StepResult::skipped("below threshold")).unwrap();
        assert_eq!(json, r#"{"status":"skipped","reason":"below threshold"}"#);
    }
}
