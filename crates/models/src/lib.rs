mod token;
mod pool;
mod snapshot;
mod pipeline;

pub use token::*;
pub use pool::*;
pub use snapshot::*;
pub use pipeline::*;
