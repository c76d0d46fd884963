use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// USD 价格来源
///
/// 没有价格时返回 None，由调用方决定按 $0 计还是改用池子价格推导
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_usd(&self, token: Address) -> Option<Decimal>;
}

/// Token 价格缓存
pub struct PriceCache {
    /// token address -> USD price
    prices: DashMap<Address, Decimal>,
    /// 最后更新时间
    last_updated: DashMap<Address, chrono::DateTime<chrono::Utc>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
            last_updated: DashMap::new(),
        }
    }

    pub fn get_price(&self, token: &Address) -> Option<Decimal> {
        self.prices.get(token).map(|p| *p)
    }

    /// 未过期时返回缓存价格
    pub fn get_fresh(&self, token: &Address, max_age_seconds: i64) -> Option<Decimal> {
        if self.is_stale(token, max_age_seconds) {
            return None;
        }
        self.get_price(token)
    }

    pub fn set_price(&self, token: Address, price: Decimal) {
        self.prices.insert(token, price);
        self.last_updated.insert(token, chrono::Utc::now());
    }

    pub fn is_stale(&self, token: &Address, max_age_seconds: i64) -> bool {
        if let Some(updated) = self.last_updated.get(token) {
            let age = chrono::Utc::now() - *updated;
            age.num_seconds() > max_age_seconds
        } else {
            true
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 固定价格表，用于 `--price` 覆盖和离线运行
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<Address, Decimal>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, token: Address, price: Decimal) -> Self {
        self.prices.insert(token, price);
        self
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_usd(&self, token: Address) -> Option<Decimal> {
        self.prices.get(&token).copied()
    }
}

/// 覆盖价格优先，其余交给后备来源
pub struct LayeredPriceOracle<F: PriceOracle> {
    overrides: StaticPriceOracle,
    fallback: F,
}

impl<F: PriceOracle> LayeredPriceOracle<F> {
    pub fn new(overrides: StaticPriceOracle, fallback: F) -> Self {
        Self { overrides, fallback }
    }
}

#[async_trait]
impl<F: PriceOracle> PriceOracle for LayeredPriceOracle<F> {
    async fn price_usd(&self, token: Address) -> Option<Decimal> {
        match self.overrides.price_usd(token).await {
            Some(price) => Some(price),
            None => self.fallback.price_usd(token).await,
        }
    }
}

#[async_trait]
impl<T: PriceOracle + ?Sized> PriceOracle for std::sync::Arc<T> {
    async fn price_usd(&self, token: Address) -> Option<Decimal> {
        (**self).price_usd(token).await
    }
}
