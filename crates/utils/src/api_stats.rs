//! API 请求统计模块
//!
//! 统计 RPC 请求、重试次数与发送的交易

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// 时间窗口统计器
struct TimeWindowCounter {
    /// 时间戳队列
    timestamps: RwLock<VecDeque<Instant>>,
    /// 总计数
    total: AtomicU64,
}

impl TimeWindowCounter {
    fn new() -> Self {
        Self {
            timestamps: RwLock::new(VecDeque::with_capacity(10000)),
            total: AtomicU64::new(0),
        }
    }

    /// 记录一次事件
    fn record(&self) {
        let now = Instant::now();
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut timestamps = self.timestamps.write();
        timestamps.push_back(now);

        // 清理超过1小时的旧时间戳
        let one_hour_ago = now - Duration::from_secs(3600);
        while let Some(front) = timestamps.front() {
            if *front < one_hour_ago {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// 获取统计
    fn get_counts(&self) -> (u64, u64, u64, u64) {
        let now = Instant::now();
        let timestamps = self.timestamps.read();

        let one_second_ago = now - Duration::from_secs(1);
        let one_minute_ago = now - Duration::from_secs(60);
        let one_hour_ago = now - Duration::from_secs(3600);

        let mut last_1s = 0u64;
        let mut last_1m = 0u64;
        let mut last_1h = 0u64;

        for ts in timestamps.iter().rev() {
            if *ts >= one_second_ago {
                last_1s += 1;
                last_1m += 1;
                last_1h += 1;
            } else if *ts >= one_minute_ago {
                last_1m += 1;
                last_1h += 1;
            } else if *ts >= one_hour_ago {
                last_1h += 1;
            } else {
                break;
            }
        }

        (last_1s, last_1m, last_1h, self.total.load(Ordering::Relaxed))
    }
}

/// API 统计器
///
/// 统计 RPC 请求、临时错误重试与上链交易
pub struct ApiStats {
    /// 启动时间
    start_time: Instant,
    /// RPC 请求统计
    rpc: TimeWindowCounter,
    /// 临时性错误重试统计
    retries: TimeWindowCounter,
    /// 已发送交易统计
    txs: TimeWindowCounter,
}

impl ApiStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rpc: TimeWindowCounter::new(),
            retries: TimeWindowCounter::new(),
            txs: TimeWindowCounter::new(),
        }
    }

    /// 记录 RPC 请求
    pub fn record_rpc(&self) {
        self.rpc.record();
    }

    /// 记录一次重试
    pub fn record_retry(&self) {
        self.retries.record();
    }

    /// 记录一笔已广播的交易
    pub fn record_tx(&self) {
        self.txs.record();
    }

    /// 获取统计快照
    pub fn get_stats(&self) -> ApiStatsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();

        ApiStatsSnapshot {
            uptime_seconds: uptime,
            rpc: Self::snapshot(&self.rpc, uptime),
            retries: Self::snapshot(&self.retries, uptime),
            txs: Self::snapshot(&self.txs, uptime),
        }
    }

    fn snapshot(counter: &TimeWindowCounter, uptime: u64) -> CounterSnapshot {
        let (last_1s, last_1m, last_1h, total) = counter.get_counts();
        let avg_per_sec = if uptime > 0 { total as f64 / uptime as f64 } else { 0.0 };
        CounterSnapshot {
            last_1s,
            last_1m,
            last_1h,
            total,
            avg_per_sec,
        }
    }

    /// 输出统计日志
    pub fn log_stats(&self) {
        let s = self.get_stats();

        info!(
            target: "rpc_stats",
            uptime_secs = s.uptime_seconds,
            rpc_1m = s.rpc.last_1m,
            rpc_total = s.rpc.total,
            rpc_avg = format!("{:.2}", s.rpc.avg_per_sec),
            retry_total = s.retries.total,
            tx_total = s.txs.total,
            "RPC统计"
        );
    }
}

impl Default for ApiStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 单项计数器快照
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    pub last_1s: u64,
    pub last_1m: u64,
    pub last_1h: u64,
    pub total: u64,
    pub avg_per_sec: f64,
}

/// API 统计快照
#[derive(Debug, Clone)]
pub struct ApiStatsSnapshot {
    pub uptime_seconds: u64,
    pub rpc: CounterSnapshot,
    pub retries: CounterSnapshot,
    pub txs: CounterSnapshot,
}

impl std::fmt::Display for ApiStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "运行{}s | RPC: {}次(avg {:.2}/s) | 重试: {}次 | 交易: {}笔",
            self.uptime_seconds,
            self.rpc.total,
            self.rpc.avg_per_sec,
            self.retries.total,
            self.txs.total,
        )
    }
}

/// 全局 API 统计实例
pub static API_STATS: Lazy<ApiStats> = Lazy::new(ApiStats::new);

/// 记录 RPC 请求
pub fn record_rpc_request() {
    API_STATS.record_rpc();
}

/// 记录临时性错误重试
pub fn record_rpc_retry() {
    API_STATS.record_retry();
}

/// 记录已广播交易
pub fn record_tx_sent() {
    API_STATS.record_tx();
}

/// 获取统计快照
pub fn get_api_stats() -> ApiStatsSnapshot {
    API_STATS.get_stats()
}

/// 输出统计日志
pub fn log_api_stats() {
    API_STATS.log_stats();
}
