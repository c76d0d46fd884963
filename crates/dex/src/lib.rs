pub mod erc20;
pub mod escrow;
pub mod permit2;
pub mod uniswap;

pub use uniswap::{MathError, PositionInfo, PositionState, RouterCommand, Slot0, V4Action, V4Planner};
