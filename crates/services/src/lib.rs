mod price_fetcher;
mod price_service;

pub use price_fetcher::*;
pub use price_service::*;
