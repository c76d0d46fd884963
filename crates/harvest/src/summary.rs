use models::{PipelineResult, StepResult, TokenLedger};
use std::fmt::Write;
use tracing::{info, warn};

fn ledger_line(ledger: &TokenLedger) -> String {
    let parts: Vec<String> = ledger
        .iter()
        .filter(|e| !e.amount.is_zero())
        .map(|e| format!("{:?}={}", e.token, e.amount))
        .collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

/// 生成人类可读的运行报告
pub fn render_summary(result: &PipelineResult) -> String {
    let mut out = String::new();
    let mode = if result.dry_run { " [DRY-RUN]" } else { "" };
    let _ = writeln!(out, "╔══════════════════ 收益流水线报告{} ══════════════════", mode);
    let _ = writeln!(out, "║ 总价值:     ${}", result.total_usd.round_dp(2));
    let _ = writeln!(
        out,
        "║ 复投比例:   {}% / 收获 {}%",
        result.compound_pct,
        100 - result.compound_pct.min(100)
    );
    if let Some(reason) = &result.compound_disabled_reason {
        let _ = writeln!(out, "║ 复投禁用:   {}", reason);
    }
    if result.below_threshold {
        let _ = writeln!(out, "║ 低于阈值，未执行任何交易");
    }
    let _ = writeln!(out, "║ 领取:       {}", ledger_line(&result.claimed));
    let _ = writeln!(out, "║ 收集:       {}", ledger_line(&result.collected));
    let _ = writeln!(out, "║ 复投:       {}", ledger_line(&result.compounded));
    if let Some(liquidity) = result.compound_liquidity {
        let _ = writeln!(out, "║ 流动性增量: {}", liquidity);
    }
    let _ = writeln!(out, "║ 收获:       {}", ledger_line(&result.harvested));
    let _ = writeln!(out, "║ 结算收入:   {}", result.settlement_received);
    let _ = writeln!(out, "║ 转入金库:   {}", result.transferred);
    let _ = writeln!(out, "╠══════════════════════════════════════════════════════");
    for step in &result.steps {
        let subject = step.subject.map(|s| format!(" {:?}", s)).unwrap_or_default();
        let (icon, text) = match &step.result {
            StepResult::Succeeded { detail } => ("✅", detail.clone()),
            StepResult::Skipped { reason } => ("⏭️", reason.clone()),
            StepResult::Failed { reason, retryable } => {
                ("❌", format!("{}{}", reason, if *retryable { " (可重试)" } else { "" }))
            }
        };
        let _ = writeln!(out, "║ {} {}{}: {}", icon, step.stage.name(), subject, text);
    }
    if !result.tx_hashes.is_empty() {
        let _ = writeln!(out, "╠══════════════════════════════════════════════════════");
        for hash in &result.tx_hashes {
            let _ = writeln!(out, "║ tx {:?}", hash);
        }
    }
    let _ = write!(out, "╚══════════════════════════════════════════════════════");
    out
}

/// 以结构化字段输出运行总结
pub fn log_summary(result: &PipelineResult) {
    let failures = result.steps.iter().filter(|s| s.result.is_failed()).count();
    info!(
        target: "harvest",
        dry_run = result.dry_run,
        compound_pct = result.compound_pct,
        total_usd = %result.total_usd.round_dp(2),
        below_threshold = result.below_threshold,
        settlement_received = %result.settlement_received,
        transferred = %result.transferred,
        txs = result.tx_hashes.len(),
        failures,
        "收益流水线完成"
    );
    for step in result.steps.iter().filter(|s| s.result.is_failed()) {
        warn!(target: "harvest", stage = step.stage.name(), subject = ?step.subject, "步骤失败: {:?}", step.result);
    }
}
