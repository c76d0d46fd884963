mod chain;
mod harvest;

pub use chain::*;
pub use harvest::*;
