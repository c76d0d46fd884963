use std::future::Future;
use std::time::Duration;
use tracing::warn;
use utils::record_rpc_retry;

use crate::types::ChainError;

/// 临时性 RPC 错误的指数退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// 第 `attempt` 次重试 (从 0 开始) 前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 执行 `op`，遇到可重试错误时按策略退避重试
///
/// 只用于只读调用和发送前的准备步骤；已广播的交易绝不能经由此函数重发
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} 临时错误: {} | {}ms 后第 {}/{} 次重试",
                    what,
                    e,
                    delay.as_millis(),
                    attempt + 1,
                    policy.max_retries
                );
                record_rpc_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
