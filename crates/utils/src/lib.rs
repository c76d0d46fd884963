mod logger;
mod api_stats;
mod stats_provider;

pub use logger::LoggerManager;
pub use api_stats::{
    record_rpc_request, record_rpc_retry, record_tx_sent,
    get_api_stats, log_api_stats, ApiStatsSnapshot, CounterSnapshot,
};
pub use stats_provider::{RpcStatsProvider, StatsHttp};
