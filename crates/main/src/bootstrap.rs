use anyhow::{Context, Result};
use config_crate::{ChainConfig, HarvestConfig};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use executor::{ChainClient, EthersChainClient, ExecutorConfig};
use harvest::HarvestOrchestrator;
use models::PipelineResult;
use services::{create_price_service, LayeredPriceOracle, PriceServiceConfig, SharedPriceService, StaticPriceOracle};
use std::time::Duration;
use tracing::{error, info, warn};
use utils::{RpcStatsProvider, StatsHttp};

use crate::cli::Cli;

type Client = EthersChainClient<ethers::providers::Provider<StatsHttp>>;

/// 单次运行所需的全部组件
pub struct Application {
    chain: ChainConfig,
    harvest: HarvestConfig,
    rpc_stats_provider: RpcStatsProvider,
    client: Client,
    oracle: LayeredPriceOracle<SharedPriceService>,
}

impl Application {
    pub async fn start(cli: &Cli) -> Result<Self> {
        let chain = ChainConfig::load()?;
        let harvest = cli.harvest_config(&chain.contracts)?;
        Self::log_config(&chain, &harvest);

        info!("初始化以太坊 Provider（带 RPC 统计）...");
        let rpc_stats_provider = RpcStatsProvider::new(&chain.rpc_url, Duration::from_secs(2))
            .with_context(|| format!("Invalid RPC_URL {}", chain.rpc_url))?;
        let client = Self::init_client(&chain, &harvest, cli.wallet, &rpc_stats_provider)?;

        let price_service = create_price_service(PriceServiceConfig::default());
        for (address, symbol) in &cli.symbols {
            price_service.add_token_mapping(*address, symbol.clone());
        }
        let overrides = cli
            .prices
            .iter()
            .fold(StaticPriceOracle::new(), |oracle, (address, price)| oracle.with_price(*address, *price));
        if !cli.prices.is_empty() {
            info!("价格覆盖: {} 个代币", cli.prices.len());
        }

        Ok(Self {
            chain,
            harvest,
            rpc_stats_provider,
            client,
            oracle: LayeredPriceOracle::new(overrides, price_service),
        })
    }

    /// 运行流水线；前置条件失败返回 Err
    pub async fn run(&self) -> Result<PipelineResult> {
        let orchestrator = HarvestOrchestrator::new(&self.harvest, &self.chain.contracts, &self.client, &self.oracle);
        let result = orchestrator.run().await;
        self.rpc_stats_provider.finish();
        match result {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(target: "harvest", "❌ 流水线未启动: {}", e);
                Err(e.into())
            }
        }
    }

    fn log_config(chain: &ChainConfig, harvest: &HarvestConfig) {
        info!("配置加载成功");
        info!("========================================");
        info!("链: {} (chain_id={})", chain.name, chain.chain_id);
        info!("RPC: {}", chain.rpc_url);
        info!("目标代币: {:?}", harvest.target_token);
        match harvest.position_id {
            Some(id) => info!("头寸: #{}", id),
            None => info!("头寸: 未配置"),
        }
        info!("复投 / 收获: {}% / {}%", harvest.compound_pct, harvest.harvest_pct());
        info!("最低阈值: ${} | 滑点: {}%", harvest.min_usd, harvest.slippage_pct);
        match harvest.fee_escrow {
            Some(escrow) => info!("手续费托管: {:?}", escrow),
            None => warn!("⚠️  手续费托管未配置 - 跳过领取"),
        }
        if harvest.dry_run {
            warn!("⚠️  DRY-RUN 模式 - 不会发送任何交易");
        }
        info!("========================================");
    }

    fn init_client(
        chain: &ChainConfig,
        harvest: &HarvestConfig,
        wallet: Option<Address>,
        stats: &RpcStatsProvider,
    ) -> Result<Client> {
        let config = ExecutorConfig::from(chain);
        let provider = stats.provider();

        match (&chain.private_key, harvest.dry_run) {
            (Some(key), false) => {
                let client = EthersChainClient::new(config, provider, key)?;
                info!("✅ 钱包私钥已配置: {:?}", client.address());
                Ok(client)
            }
            (Some(key), true) => {
                let address = key
                    .trim()
                    .parse::<LocalWallet>()
                    .map(|w| w.address())
                    .context("Invalid PRIVATE_KEY")?;
                Ok(EthersChainClient::read_only(config, provider, wallet.unwrap_or(address)))
            }
            (None, _) => {
                let address = wallet.unwrap_or_else(|| {
                    warn!("⚠️  未配置私钥与 --wallet，使用零地址查询");
                    Address::zero()
                });
                warn!("⚠️  钱包私钥未配置 - 以只读模式运行");
                Ok(EthersChainClient::read_only(config, provider, address))
            }
        }
    }
}

/// 设置全局 panic hook
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("========================================");
        error!("!!! 系统发生 PANIC !!!");
        error!("========================================");
        error!("Panic 信息: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            error!("发生位置: {}:{}:{}", location.file(), location.line(), location.column());
        }
        error!("========================================");
    }));
}
