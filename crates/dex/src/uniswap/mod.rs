pub mod math;
pub mod universal_router;
pub mod v3;
pub mod v4;

pub use math::MathError;
pub use universal_router::RouterCommand;
pub use v4::{PositionInfo, PositionState, Slot0, V4Action, V4Planner};
