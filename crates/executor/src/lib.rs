//! 链上执行模块
//!
//! 为收益编排器提供统一的链上读写接口
//!
//! ## 模块结构
//!
//! - `client`: [`ChainClient`] 抽象，编排器只依赖此 trait
//! - `executor`: 基于 ethers 的实现，负责签名、广播与确认
//! - `retry`: 临时性 RPC 错误的退避重试
//! - `revert_decoder`: 解析合约 revert 数据
//! - `types`: 错误与交易类型

mod client;
mod executor;
mod retry;
mod types;
pub mod revert_decoder;

pub use client::ChainClient;
pub use executor::{map_middleware_error, EthersChainClient, ExecutorConfig};
pub use retry::{with_retry, RetryPolicy};
pub use revert_decoder::{DecodedRevertError, RevertDecoder, RevertErrorType};
pub use types::{ChainError, TxReceipt, TxRequest};
