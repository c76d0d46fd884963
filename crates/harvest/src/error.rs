use config_crate::ConfigError;
use dex::MathError;
use executor::ChainError;
use thiserror::Error;

/// 收益流水线错误
///
/// 只有前置条件错误会中止整个流水线，其余错误在各步骤内转换为 `StepResult::Failed`
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Liquidity math error: {0}")]
    Math(#[from] MathError),
}

impl HarvestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::Chain(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
