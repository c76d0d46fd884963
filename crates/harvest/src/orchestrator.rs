//! 收益编排器
//!
//! 状态顺序：领取 → 收集 → 汇总与阈值 → 拆分 → 复投 → 兑换 → 转账 → 总结。
//! 每个步骤把结果记录为 `StepResult`，总结只依赖这些记录。
//! 单个代币或单个步骤的失败不会中止流水线，只有前置条件错误和收集失败例外。

use config_crate::{ChainContracts, HarvestConfig};
use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError};
use models::{PipelineResult, PipelineStage, PoolKey, Position, StepResult, TokenLedger};
use services::PriceOracle;
use tracing::{error, info, warn};

use crate::collector::PositionCollector;
use crate::compound::{slippage_bps, CompoundExecutor};
use crate::error::{HarvestError, Result};
use crate::fee_source::FeeSourceAdapter;
use crate::pricing::UsdPricer;
use crate::split::split_ledger;
use crate::summary::log_summary;
use crate::swap_router::SwapRouterAdapter;
use crate::vault::VaultTransfer;

/// 前置条件检查后的运行上下文
struct RunContext {
    wallet: Address,
    position: Option<Position>,
    /// 实际生效的复投比例
    compound_pct: u8,
}

impl RunContext {
    fn pool(&self) -> Option<PoolKey> {
        self.position.as_ref().map(|p| p.pool_key)
    }
}

/// 执行前的只读预估
#[derive(Default)]
struct Projection {
    available: Vec<(Address, std::result::Result<U256, ChainError>)>,
    pending: Option<[U256; 2]>,
}

impl Projection {
    fn ledger(&self, position: Option<&Position>) -> TokenLedger {
        let mut ledger = TokenLedger::new();
        for (token, available) in &self.available {
            if let Ok(amount) = available {
                ledger.add(*token, *amount);
            }
        }
        if let (Some(position), Some(pending)) = (position, self.pending) {
            for (currency, amount) in position.pool_key.currencies().into_iter().zip(pending) {
                ledger.add(currency, amount);
            }
        }
        ledger
    }
}

pub struct HarvestOrchestrator<'a> {
    config: &'a HarvestConfig,
    contracts: &'a ChainContracts,
    chain: &'a dyn ChainClient,
    oracle: &'a dyn PriceOracle,
}

impl<'a> HarvestOrchestrator<'a> {
    pub fn new(
        config: &'a HarvestConfig,
        contracts: &'a ChainContracts,
        chain: &'a dyn ChainClient,
        oracle: &'a dyn PriceOracle,
    ) -> Self {
        Self {
            config,
            contracts,
            chain,
            oracle,
        }
    }

    fn collector(&self) -> PositionCollector<'a> {
        PositionCollector::new(self.chain, self.contracts, self.config.deadline_secs, self.config.dry_run)
    }

    /// 运行一次完整流水线
    ///
    /// 只有前置条件失败返回 Err；其余失败记录在结果的步骤中
    pub async fn run(&self) -> Result<PipelineResult> {
        let config = self.config;
        let mut result = PipelineResult::new(config.dry_run, config.compound_pct);

        info!(
            target: "harvest",
            "🌾 收益流水线启动 | 目标 {:?} | 复投 {}% | 阈值 ${} | 滑点 {}%{}",
            config.target_token,
            config.compound_pct,
            config.min_usd,
            config.slippage_pct,
            if config.dry_run { " | DRY-RUN" } else { "" }
        );

        let ctx = self.check_preconditions(&mut result).await?;
        let pool = ctx.pool();
        let pricer = UsdPricer::new(self.chain, self.oracle, self.contracts.state_view);

        let projection = self.project(&ctx).await;
        if !config.min_usd.is_zero() {
            let projected_usd = pricer
                .value_usd(&projection.ledger(ctx.position.as_ref()), pool.as_ref())
                .await;
            if projected_usd < config.min_usd {
                info!(
                    target: "harvest",
                    "⏸️ 预估总价值 ${} 低于阈值 ${}，不执行任何交易",
                    projected_usd.round_dp(2),
                    config.min_usd
                );
                result.total_usd = projected_usd;
                result.below_threshold = true;
                result.record(
                    PipelineStage::AggregateThreshold,
                    None,
                    StepResult::skipped(format!(
                        "projected ${} below minimum ${}",
                        projected_usd.round_dp(2),
                        config.min_usd
                    )),
                );
                return Ok(self.summarize(result));
            }
        }

        self.claim(&ctx, &projection, &mut result).await;
        if !self.collect(&ctx, &projection, &mut result).await {
            error!(target: "harvest", "❌ 收集失败，停止在拆分之前，已领取的资金留在钱包");
            return Ok(self.summarize(result));
        }

        let totals = result.total_fees();
        result.total_usd = pricer.value_usd(&totals, pool.as_ref()).await;
        if totals.is_empty() {
            result.record(
                PipelineStage::AggregateThreshold,
                None,
                StepResult::skipped("no fees claimed or collected"),
            );
            return Ok(self.summarize(result));
        }
        // 预估通过但实际到账不足 (例如领取失败)，已到账的资金留在钱包
        if !config.min_usd.is_zero() && result.total_usd < config.min_usd {
            info!(
                target: "harvest",
                "⏸️ 实际总价值 ${} 低于阈值 ${}，跳过复投 / 兑换 / 转账",
                result.total_usd.round_dp(2),
                config.min_usd
            );
            result.below_threshold = true;
            result.record(
                PipelineStage::AggregateThreshold,
                None,
                StepResult::skipped(format!(
                    "actual ${} below minimum ${}; funds stay in wallet",
                    result.total_usd.round_dp(2),
                    config.min_usd
                )),
            );
            return Ok(self.summarize(result));
        }
        result.record(
            PipelineStage::AggregateThreshold,
            None,
            StepResult::succeeded(format!("total ${}", result.total_usd.round_dp(2))),
        );

        let compound_pct = ctx.compound_pct;
        let (compound_allocation, harvest_allocation) = split_ledger(&totals, compound_pct, |token| {
            compound_pct > 0 && pool.map_or(false, |p| p.contains(token))
        });
        result.compound_allocation = compound_allocation;
        result.harvest_allocation = harvest_allocation;
        // 复投失败或未消耗的部分默认归入收获
        result.harvested = totals.clone();
        result.record(
            PipelineStage::Split,
            None,
            StepResult::succeeded(format!("compound {}% / harvest {}%", compound_pct, 100 - compound_pct)),
        );

        self.compound(&ctx, &totals, &mut result).await;
        self.swap(&ctx, &pricer, &mut result).await;
        self.transfer(&mut result).await;

        Ok(self.summarize(result))
    }

    async fn check_preconditions(&self, result: &mut PipelineResult) -> Result<RunContext> {
        let config = self.config;
        let wallet = self.chain.address();

        let mut compound_pct = config.compound_pct;
        if compound_pct > 0 && config.position_id.is_none() {
            let reason = format!("compound {}% requested without a position id", compound_pct);
            warn!(target: "harvest", "⚠️ {}，复投已禁用，全部收获", reason);
            result.compound_disabled_reason = Some(reason);
            compound_pct = 0;
        }
        result.compound_pct = compound_pct;

        if compound_pct < 100 && config.vault_address.is_none() {
            return Err(HarvestError::Precondition(format!(
                "vault address is required when harvest percentage is {}%",
                100 - compound_pct
            )));
        }
        if !config.dry_run && self.chain.is_read_only() {
            return Err(HarvestError::Precondition(
                "no signing key configured; use dry-run for a read-only run".to_string(),
            ));
        }

        let position = match config.position_id {
            Some(token_id) => {
                let collector = self.collector();
                let owner = collector.owner_of(token_id).await?;
                if owner != wallet {
                    return Err(HarvestError::Precondition(format!(
                        "position #{} is owned by {:?}, not wallet {:?}",
                        token_id, owner, wallet
                    )));
                }
                Some(collector.load_position(token_id).await?)
            }
            None => None,
        };

        Ok(RunContext {
            wallet,
            position,
            compound_pct,
        })
    }

    /// 可能产生费用的代币：目标代币与头寸两侧币种，无头寸时加上基础资产
    fn fee_tokens(&self, ctx: &RunContext) -> Vec<Address> {
        let mut tokens = vec![self.config.target_token];
        match &ctx.position {
            Some(position) => tokens.extend(position.pool_key.currencies()),
            None => tokens.push(self.config.base_token),
        }
        let mut unique = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !unique.contains(&token) {
                unique.push(token);
            }
        }
        unique
    }

    async fn project(&self, ctx: &RunContext) -> Projection {
        let mut projection = Projection::default();

        if let (false, Some(escrow)) = (self.config.skip_claim, self.config.fee_escrow) {
            projection.available = FeeSourceAdapter::new(self.chain, escrow)
                .check_available(ctx.wallet, &self.fee_tokens(ctx))
                .await;
        }

        if let Some(position) = ctx.position.as_ref().filter(|p| p.has_liquidity()) {
            if !self.config.skip_collect {
                match self.collector().pending_fees(position).await {
                    Ok(pending) => projection.pending = Some(pending),
                    Err(e) => warn!(target: "harvest", "⚠️ 读取待收手续费失败: {}", e),
                }
            }
        }
        projection
    }

    async fn claim(&self, ctx: &RunContext, projection: &Projection, result: &mut PipelineResult) {
        if self.config.skip_claim {
            result.record(PipelineStage::Claim, None, StepResult::skipped("skip-claim set"));
            return;
        }
        let Some(escrow) = self.config.fee_escrow else {
            result.record(PipelineStage::Claim, None, StepResult::skipped("no fee escrow configured"));
            return;
        };

        let source = FeeSourceAdapter::new(self.chain, escrow);
        for (token, available) in &projection.available {
            let token = *token;
            let available = match available {
                Ok(amount) => *amount,
                Err(e) => {
                    warn!(target: "harvest", "⚠️ 查询 {:?} 可领取数量失败: {}", token, e);
                    result.record(
                        PipelineStage::Claim,
                        Some(token),
                        StepResult::failed(format!("availableFees: {}", e), e.is_retryable()),
                    );
                    continue;
                }
            };

            if available.is_zero() {
                result.record(PipelineStage::Claim, Some(token), StepResult::skipped("nothing available"));
                continue;
            }
            if self.config.dry_run {
                info!(target: "harvest", "[dry-run] 将领取 {:?}: {}", token, available);
                result.claimed.add(token, available);
                result.record(
                    PipelineStage::Claim,
                    Some(token),
                    StepResult::skipped(format!("dry-run: would claim {}", available)),
                );
                continue;
            }

            match source.claim(ctx.wallet, token, available).await {
                Ok(outcome) => {
                    result.claimed.add(token, outcome.credited);
                    result.tx_hashes.push(outcome.receipt.tx_hash);
                    result.record(
                        PipelineStage::Claim,
                        Some(token),
                        StepResult::succeeded(format!("claimed {} (tx {:?})", outcome.credited, outcome.receipt.tx_hash)),
                    );
                }
                Err(e) => {
                    error!(target: "harvest", "❌ 领取 {:?} 失败: {}", token, e);
                    result.record(
                        PipelineStage::Claim,
                        Some(token),
                        StepResult::failed(format!("claim {:?}: {}", token, e), e.is_retryable()),
                    );
                }
            }
        }
    }

    /// 返回 false 表示收集失败，流水线需在拆分前停止
    async fn collect(&self, ctx: &RunContext, projection: &Projection, result: &mut PipelineResult) -> bool {
        if self.config.skip_collect {
            result.record(PipelineStage::Collect, None, StepResult::skipped("skip-collect set"));
            return true;
        }
        let Some(position) = &ctx.position else {
            result.record(PipelineStage::Collect, None, StepResult::skipped("no position configured"));
            return true;
        };
        if !position.has_liquidity() {
            result.record(PipelineStage::Collect, None, StepResult::skipped("position has no liquidity"));
            return true;
        }

        let [currency0, currency1] = position.pool_key.currencies();
        if self.config.dry_run {
            let reason = match projection.pending {
                Some(pending) => {
                    result.collected.add(currency0, pending[0]);
                    result.collected.add(currency1, pending[1]);
                    format!("dry-run: would collect {} / {}", pending[0], pending[1])
                }
                None => "dry-run: pending fees unavailable".to_string(),
            };
            result.record(PipelineStage::Collect, None, StepResult::skipped(reason));
            return true;
        }

        match self.collector().collect(position, projection.pending).await {
            Ok(Some(outcome)) => {
                result.collected.add(currency0, outcome.credited[0]);
                result.collected.add(currency1, outcome.credited[1]);
                result.tx_hashes.push(outcome.receipt.tx_hash);
                result.record(
                    PipelineStage::Collect,
                    None,
                    StepResult::succeeded(format!(
                        "collected {} / {} (tx {:?})",
                        outcome.credited[0], outcome.credited[1], outcome.receipt.tx_hash
                    )),
                );
                true
            }
            Ok(None) => {
                result.record(PipelineStage::Collect, None, StepResult::skipped("position has no liquidity"));
                true
            }
            Err(e) => {
                result.record(
                    PipelineStage::Collect,
                    None,
                    StepResult::failed(format!("collect #{}: {}", position.token_id, e), e.is_retryable()),
                );
                false
            }
        }
    }

    async fn compound(&self, ctx: &RunContext, totals: &TokenLedger, result: &mut PipelineResult) {
        let Some(position) = ctx.position.as_ref().filter(|_| ctx.compound_pct > 0) else {
            let reason = result
                .compound_disabled_reason
                .clone()
                .unwrap_or_else(|| "compound percentage is 0".to_string());
            result.record(PipelineStage::Compound, None, StepResult::skipped(reason));
            return;
        };

        let [currency0, currency1] = position.pool_key.currencies();
        let amounts = [
            result.compound_allocation.get(currency0),
            result.compound_allocation.get(currency1),
        ];
        if amounts.iter().all(|a| a.is_zero()) {
            result.record(PipelineStage::Compound, None, StepResult::skipped("nothing allocated to compound"));
            return;
        }

        let executor = CompoundExecutor::new(
            self.chain,
            self.contracts,
            slippage_bps(self.config.slippage_pct),
            self.config.deadline_secs,
        );
        let plan = match executor.prepare(position, amounts).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                info!(target: "harvest", "流动性增量为 0，复投分配归入收获");
                result.record(
                    PipelineStage::Compound,
                    None,
                    StepResult::skipped("nothing to compound: liquidity delta is 0"),
                );
                return;
            }
            Err(e) => {
                result.record(
                    PipelineStage::Compound,
                    None,
                    StepResult::failed(format!("compound plan: {}", e), e.is_retryable()),
                );
                return;
            }
        };
        result.compound_liquidity = Some(plan.liquidity);

        if self.config.dry_run {
            settle_compound(position, [plan.expected0, plan.expected1], totals, result);
            result.record(
                PipelineStage::Compound,
                None,
                StepResult::skipped(format!(
                    "dry-run: would add liquidity {} using {} / {}",
                    plan.liquidity, plan.expected0, plan.expected1
                )),
            );
            return;
        }

        let required = [U256::from(plan.amount0_max), U256::from(plan.amount1_max)];
        match self.collector().ensure_approvals(position, required).await {
            Ok(receipts) => result.tx_hashes.extend(receipts.iter().map(|r| r.tx_hash)),
            Err(e) => {
                error!(target: "harvest", "❌ 复投授权失败: {}", e);
                result.record(
                    PipelineStage::Compound,
                    None,
                    StepResult::failed(format!("compound approvals: {}", e), e.is_retryable()),
                );
                return;
            }
        }

        match executor.execute(position, &plan).await {
            Ok(outcome) => {
                result.tx_hashes.push(outcome.receipt.tx_hash);
                settle_compound(position, outcome.consumed, totals, result);
                result.record(
                    PipelineStage::Compound,
                    None,
                    StepResult::succeeded(format!(
                        "added liquidity {} using {} / {} (tx {:?})",
                        plan.liquidity, outcome.consumed[0], outcome.consumed[1], outcome.receipt.tx_hash
                    )),
                );
            }
            Err(e) => {
                error!(target: "harvest", "❌ 复投失败，分配归入收获: {}", e);
                result.record(
                    PipelineStage::Compound,
                    None,
                    StepResult::failed(format!("compound #{}: {}", position.token_id, e), e.is_retryable()),
                );
            }
        }
    }

    async fn swap(&self, ctx: &RunContext, pricer: &UsdPricer<'_>, result: &mut PipelineResult) {
        if self.config.vault_address.is_none() {
            result.record(
                PipelineStage::Swap,
                None,
                StepResult::skipped("no vault configured; harvest amounts stay in wallet"),
            );
            return;
        }

        let pending: Vec<(Address, U256)> = result
            .harvested
            .iter()
            .filter(|e| !e.amount.is_zero())
            .map(|e| (e.token, e.amount))
            .collect();
        if pending.is_empty() {
            result.record(PipelineStage::Swap, None, StepResult::skipped("nothing to harvest"));
            return;
        }

        let pool = ctx.pool();
        let router = SwapRouterAdapter::new(self.chain, self.contracts, self.config, pricer);
        for (token, amount) in pending {
            if self.config.dry_run {
                let estimate = router.estimate(token, amount, pool.as_ref()).await.unwrap_or_default();
                result.settlement_received = result.settlement_received.saturating_add(estimate);
                result.record(
                    PipelineStage::Swap,
                    Some(token),
                    StepResult::skipped(format!("dry-run: would swap {} (≈ {} settlement)", amount, estimate)),
                );
                continue;
            }

            match router.to_settlement(token, amount, pool.as_ref()).await {
                Ok(outcome) => {
                    result.settlement_received = result.settlement_received.saturating_add(outcome.settlement_received);
                    result.tx_hashes.extend(outcome.receipts.iter().map(|r| r.tx_hash));
                    let detail = if token == self.config.settlement_token {
                        format!("{} already in settlement asset", amount)
                    } else {
                        format!("swapped {} → {} settlement", amount, outcome.settlement_received)
                    };
                    result.record(PipelineStage::Swap, Some(token), StepResult::succeeded(detail));
                }
                Err(failure) => {
                    error!(target: "harvest", "❌ 兑换 {:?} 失败: {}", token, failure);
                    result.tx_hashes.extend(failure.receipts.iter().map(|r| r.tx_hash));
                    result.record(
                        PipelineStage::Swap,
                        Some(token),
                        StepResult::failed(format!("swap {:?}: {}", token, failure), failure.is_retryable()),
                    );
                }
            }
        }
    }

    async fn transfer(&self, result: &mut PipelineResult) {
        let Some(vault) = self.config.vault_address else {
            result.record(PipelineStage::Transfer, None, StepResult::skipped("no vault configured"));
            return;
        };
        let amount = result.settlement_received;
        if amount.is_zero() {
            result.record(PipelineStage::Transfer, None, StepResult::skipped("nothing to transfer"));
            return;
        }
        if self.config.dry_run {
            result.record(
                PipelineStage::Transfer,
                None,
                StepResult::skipped(format!("dry-run: would transfer {} to {:?}", amount, vault)),
            );
            return;
        }

        let transfer = VaultTransfer::new(self.chain, vault, self.config.settlement_token);
        match transfer.transfer(amount).await {
            Ok(Some(receipt)) => {
                result.transferred = amount;
                result.tx_hashes.push(receipt.tx_hash);
                result.record(
                    PipelineStage::Transfer,
                    None,
                    StepResult::succeeded(format!("transferred {} to {:?} (tx {:?})", amount, vault, receipt.tx_hash)),
                );
            }
            Ok(None) => result.record(PipelineStage::Transfer, None, StepResult::skipped("nothing to transfer")),
            Err(e) => {
                error!(target: "harvest", "❌ 转账到金库失败，资金留在钱包: {}", e);
                result.record(
                    PipelineStage::Transfer,
                    None,
                    StepResult::failed(format!("transfer {} to {:?}: {}", amount, vault, e), e.is_retryable()),
                );
            }
        }
    }

    fn summarize(&self, mut result: PipelineResult) -> PipelineResult {
        result.finish();
        let detail = if result.has_failures() {
            "completed with failures"
        } else if result.below_threshold {
            "below threshold"
        } else {
            "completed"
        };
        result.record(PipelineStage::Summarize, None, StepResult::succeeded(detail));
        log_summary(&result);
        result
    }
}

/// 按实际消耗记账：compounded + harvested == total
///
/// 消耗超过分配 (滑点缓冲内) 时从收获中扣除，最多扣到 0
fn settle_compound(position: &Position, consumed: [U256; 2], totals: &TokenLedger, result: &mut PipelineResult) {
    for (currency, consumed) in position.pool_key.currencies().into_iter().zip(consumed) {
        let total = totals.get(currency);
        let compounded = consumed.min(total);
        if consumed > result.compound_allocation.get(currency) {
            warn!(
                target: "harvest",
                "复投消耗 {:?} {} 超过分配 {}，差额从收获中扣除",
                currency,
                consumed,
                result.compound_allocation.get(currency)
            );
        }
        result.compounded.set(currency, compounded);
        result.harvested.set(currency, total - compounded);
    }
}
