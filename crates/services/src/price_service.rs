use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::price_fetcher::{PriceCache, PriceOracle};

/// 价格服务配置
#[derive(Debug, Clone)]
pub struct PriceServiceConfig {
    /// 币安 API 基础 URL
    pub binance_api_url: String,
    /// 缓存有效期 (秒)
    pub max_age_secs: i64,
    pub request_timeout_secs: u64,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            binance_api_url: "https://api.binance.com".to_string(),
            max_age_secs: 60,
            request_timeout_secs: 10,
        }
    }
}

/// 币安价格响应
#[derive(Debug, serde::Deserialize)]
struct BinanceTickerPrice {
    price: String,
}

/// 稳定币固定价格
const STABLECOINS: [&str; 4] = ["USDT", "USDC", "USDbC", "DAI"];

/// address -> 币安 symbol
const TOKEN_SYMBOLS: [(&str, &str); 11] = [
    // 原生币
    ("0x0000000000000000000000000000000000000000", "ETH"),
    // Ethereum Mainnet
    ("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "ETH"),
    ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT"),
    ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC"),
    ("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI"),
    ("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "BTC"),
    ("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", "UNI"),
    // Base
    ("0x4200000000000000000000000000000000000006", "ETH"),
    ("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", "USDC"),
    ("0xd9aAEc86B65D86f6A7B5B1b0c42FFA531710b6CA", "USDbC"),
    ("0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf", "BTC"),
];

/// 实时价格服务 (币安现货 API)
///
/// 按需拉取，结果缓存 `max_age_secs` 秒
pub struct PriceService {
    config: PriceServiceConfig,
    http_client: reqwest::Client,
    cache: PriceCache,
    /// address -> symbol 映射
    address_to_symbol: DashMap<Address, String>,
}

impl PriceService {
    pub fn new(config: PriceServiceConfig) -> Self {
        let service = Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
            cache: PriceCache::new(),
            address_to_symbol: DashMap::new(),
        };
        service.init_token_mappings();
        service
    }

    /// 初始化常见代币地址映射
    fn init_token_mappings(&self) {
        for (address, symbol) in TOKEN_SYMBOLS {
            if let Ok(address) = Address::from_str(address) {
                self.address_to_symbol.insert(address, symbol.to_string());
            }
        }
        debug!("初始化了 {} 个代币地址映射", self.address_to_symbol.len());
    }

    /// 添加自定义代币映射，例如目标代币在币安上的 symbol
    pub fn add_token_mapping(&self, address: Address, symbol: impl Into<String>) {
        self.address_to_symbol.insert(address, symbol.into());
    }

    pub fn symbol_of(&self, address: &Address) -> Option<String> {
        self.address_to_symbol.get(address).map(|s| s.clone())
    }

    /// 从币安获取单个交易对价格
    async fn fetch_binance_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}USDT",
            self.config.binance_api_url, symbol
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request {}", url))?
            .error_for_status()?;
        let ticker: BinanceTickerPrice = response.json().await?;

        let price = Decimal::from_str(&ticker.price)
            .with_context(|| format!("invalid price '{}' for {}", ticker.price, symbol))?;
        Ok(price)
    }

    /// 获取代币价格 (通过 symbol)
    pub async fn get_price_by_symbol(&self, symbol: &str) -> Option<Decimal> {
        if STABLECOINS.contains(&symbol) {
            return Some(Decimal::ONE);
        }
        match self.fetch_binance_price(symbol).await {
            Ok(price) => {
                info!("{}: ${}", symbol, price);
                Some(price)
            }
            Err(e) => {
                warn!("获取 {} 价格失败: {:#}", symbol, e);
                None
            }
        }
    }
}

#[async_trait]
impl PriceOracle for PriceService {
    async fn price_usd(&self, token: Address) -> Option<Decimal> {
        if let Some(price) = self.cache.get_fresh(&token, self.config.max_age_secs) {
            return Some(price);
        }

        let symbol = self.symbol_of(&token)?;
        let price = self.get_price_by_symbol(&symbol).await?;
        self.cache.set_price(token, price);
        Some(price)
    }
}

/// 可共享的价格服务
pub type SharedPriceService = Arc<PriceService>;

/// 创建共享的价格服务
pub fn create_price_service(config: PriceServiceConfig) -> SharedPriceService {
    Arc::new(PriceService::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_service() -> PriceService {
        // 不可达地址，任何网络请求都会失败
        PriceService::new(PriceServiceConfig {
            binance_api_url: "http://127.0.0.1:9".to_string(),
            max_age_secs: 60,
            request_timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn test_stablecoins_need_no_request() {
        let service = offline_service();
        let usdc = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        assert_eq!(service.price_usd(usdc).await, Some(Decimal::ONE));
        assert_eq!(service.symbol_of(&Address::zero()).as_deref(), Some("ETH"));
    }

    #[tokio::test]
    async fn test_unknown_token_has_no_price() {
        let service = offline_service();
        assert_eq!(service.price_usd(Address::repeat_byte(0x77)).await, None);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_none() {
        let service = offline_service();
        let token = Address::repeat_byte(0x55);
        service.add_token_mapping(token, "FOO");
        assert_eq!(service.price_usd(token).await, None);
    }

    #[tokio::test]
    async fn test_custom_stable_mapping() {
        let service = offline_service();
        let token = Address::repeat_byte(0x66);
        service.add_token_mapping(token, "DAI");
        assert_eq!(service.price_usd(token).await, Some(Decimal::ONE));
    }
}
