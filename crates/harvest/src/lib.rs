//! Uniswap v4 手续费收获 / 复投流水线
//!
//! 从托管合约领取手续费、收集头寸累积的手续费，按比例拆分为复投与收获两部分：
//! 复投部分加回同一头寸，收获部分兑换为结算资产后转入金库。

pub mod approvals;
pub mod collector;
pub mod compound;
pub mod error;
pub mod fee_source;
pub mod meter;
pub mod orchestrator;
pub mod pricing;
pub mod split;
pub mod summary;
pub mod swap_router;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::PositionCollector;
pub use compound::{CompoundExecutor, CompoundPlan};
pub use error::{HarvestError, Result};
pub use fee_source::FeeSourceAdapter;
pub use meter::BalanceMeter;
pub use orchestrator::HarvestOrchestrator;
pub use pricing::UsdPricer;
pub use split::{split_amount, split_ledger, SplitAmounts};
pub use summary::{log_summary, render_summary};
pub use swap_router::{IndirectVenue, SwapFailure, SwapRouterAdapter};
pub use vault::VaultTransfer;
