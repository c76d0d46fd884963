use std::fs;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, fmt, Layer};
use tracing_subscriber::filter::{LevelFilter, FilterFn};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_appender::{non_blocking, rolling};
use time::macros::offset;

/// 只写入专用文件、不进入 app.log 的 target
const DEDICATED_TARGETS: [&str; 3] = ["rpc_stats", "harvest", "trade_executor"];

/// 日志管理器 - 基于target分类的日志系统
pub struct LoggerManager {
    _guards: Vec<non_blocking::WorkerGuard>,
}

impl LoggerManager {
    /// 初始化日志系统
    ///
    /// 日志分类：
    /// - app.log: 通用应用日志
    /// - harvest.log: 流水线各阶段的决策与结果 (target = "harvest")
    /// - trade.log: 交易发送与确认 (target = "trade_executor")
    /// - rpc_stats.log: RPC 请求统计
    pub fn init(log_dir: impl AsRef<Path>, verbose: bool) -> Self {
        let log_dir = log_dir.as_ref();
        let mut guards = Vec::new();

        fs::create_dir_all(log_dir).ok();

        // 配置时区为东八区 (UTC+8 上海时间)
        let timer = OffsetTime::new(
            offset!(+8),
            time::format_description::well_known::Rfc3339,
        );

        let console_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

        // 1. 控制台输出，rpc_stats 只输出汇总
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(console_level)
            .with_filter(FilterFn::new(|metadata| {
                metadata.target() != "rpc_stats" || metadata.level() <= &tracing::Level::INFO
            }));

        // 2. 通用应用日志 (app.log)
        let (app_writer, app_guard) = non_blocking(rolling::daily(log_dir, "app.log"));
        guards.push(app_guard);

        let app_layer = fmt::layer()
            .compact()
            .with_writer(app_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(LevelFilter::INFO)
            .with_filter(FilterFn::new(|metadata| {
                !DEDICATED_TARGETS.contains(&metadata.target())
            }));

        // 3. 流水线日志 (harvest.log)
        let (harvest_writer, harvest_guard) = non_blocking(rolling::daily(log_dir, "harvest.log"));
        guards.push(harvest_guard);

        let harvest_layer = fmt::layer()
            .compact()
            .with_writer(harvest_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| {
                metadata.target() == "harvest"
            }));

        // 4. 交易执行日志 (trade.log)
        let (trade_writer, trade_guard) = non_blocking(rolling::daily(log_dir, "trade.log"));
        guards.push(trade_guard);

        let trade_layer = fmt::layer()
            .compact()
            .with_writer(trade_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| {
                metadata.target() == "trade_executor"
            }));

        // 5. RPC 统计日志 (rpc_stats.log)
        let (rpc_stats_writer, rpc_stats_guard) = non_blocking(rolling::daily(log_dir, "rpc_stats.log"));
        guards.push(rpc_stats_guard);

        let rpc_stats_layer = fmt::layer()
            .compact()
            .with_writer(rpc_stats_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer)
            .with_filter(FilterFn::new(|metadata| {
                metadata.target() == "rpc_stats"
            }));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(app_layer)
            .with(harvest_layer)
            .with(trade_layer)
            .with(rpc_stats_layer)
            .init();

        Self { _guards: guards }
    }
}
