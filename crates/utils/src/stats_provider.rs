use ethers::providers::{Http, JsonRpcClient, Provider, ProviderError};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::api_stats::{log_api_stats, record_rpc_request, record_tx_sent};

/// 带统计功能的 HTTP 传输层
#[derive(Debug, Clone)]
pub struct StatsHttp {
    inner: Http,
}

impl StatsHttp {
    pub fn new(url: &str) -> Result<Self, ProviderError> {
        let parsed_url: Url = url.parse().map_err(|e| {
            ProviderError::CustomError(format!("Invalid URL: {}", e))
        })?;
        Ok(Self { inner: Http::new(parsed_url) })
    }
}

#[async_trait::async_trait]
impl JsonRpcClient for StatsHttp {
    type Error = <Http as JsonRpcClient>::Error;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        record_rpc_request();
        if method == "eth_sendRawTransaction" || method == "eth_sendTransaction" {
            record_tx_sent();
        }
        JsonRpcClient::request(&self.inner, method, params).await
    }
}

/// RPC 统计 Provider
///
/// 单次运行结束时调用 [`RpcStatsProvider::finish`] 输出汇总
pub struct RpcStatsProvider {
    provider: Arc<Provider<StatsHttp>>,
}

impl RpcStatsProvider {
    /// - `url`: RPC 节点 URL
    /// - `poll_interval`: 等待交易回执时的轮询间隔
    pub fn new(url: &str, poll_interval: Duration) -> Result<Self, ProviderError> {
        let stats_http = StatsHttp::new(url)?;
        let provider = Provider::new(stats_http).interval(poll_interval);
        Ok(Self { provider: Arc::new(provider) })
    }

    /// 获取 Provider 引用
    pub fn provider(&self) -> Arc<Provider<StatsHttp>> {
        self.provider.clone()
    }

    /// 输出最终统计
    pub fn finish(&self) {
        log_api_stats();
    }
}
