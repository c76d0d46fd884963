//! 兑换为结算资产
//!
//! - 结算资产本身：不兑换
//! - 原生 ETH：先包装为 WETH，再走直接路径
//! - 基础资产 (WETH)：V3 单跳直接兑换为结算资产
//! - 其他代币：先经间接路径兑换为基础资产，按余额差得到的数量再走直接路径

use config_crate::{ChainContracts, HarvestConfig, IndirectRoute};
use dex::uniswap::universal_router::{self, RouterCommand, CONTRACT_BALANCE, MSG_SENDER};
use dex::uniswap::v3;
use dex::{erc20, V4Planner};
use ethers::types::{Address, U256};
use executor::{ChainClient, TxReceipt, TxRequest};
use models::{is_native, PoolKey};
use tracing::{info, warn};

use crate::approvals::Approvals;
use crate::compound::{slippage_bps, NATIVE_GAS_RESERVE};
use crate::error::{HarvestError, Result};
use crate::meter::BalanceMeter;
use crate::pricing::UsdPricer;

/// Auto 路由在池子不含基础资产时使用的 V3 费率
pub const FALLBACK_V3_FEE: u32 = v3::fee_tiers::HIGH;

/// 间接兑换所用的场所
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectVenue {
    V4 { pool_key: PoolKey },
    V3 { fee: u32 },
}

/// 单个代币的兑换结果
#[derive(Debug, Clone, Default)]
pub struct SwapOutcome {
    pub settlement_received: U256,
    pub receipts: Vec<TxReceipt>,
}

/// 兑换中途失败
///
/// `receipts` 保留失败前已确认的交易，`stranded` 为第一跳已换出、留在钱包中的基础资产
#[derive(Debug)]
pub struct SwapFailure {
    pub error: HarvestError,
    pub receipts: Vec<TxReceipt>,
    pub stranded: Option<(Address, U256)>,
}

impl SwapFailure {
    fn new(error: HarvestError, receipts: Vec<TxReceipt>) -> Self {
        Self {
            error,
            receipts,
            stranded: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl std::fmt::Display for SwapFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some((token, amount)) = self.stranded {
            write!(f, "; {} of {:?} left in wallet from the first hop", amount, token)?;
        }
        Ok(())
    }
}

pub struct SwapRouterAdapter<'a> {
    chain: &'a dyn ChainClient,
    contracts: &'a ChainContracts,
    config: &'a HarvestConfig,
    pricer: &'a UsdPricer<'a>,
}

impl<'a> SwapRouterAdapter<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        contracts: &'a ChainContracts,
        config: &'a HarvestConfig,
        pricer: &'a UsdPricer<'a>,
    ) -> Self {
        Self {
            chain,
            contracts,
            config,
            pricer,
        }
    }

    fn approvals(&self) -> Approvals<'a> {
        Approvals::new(self.chain, self.contracts.permit2, self.config.dry_run)
    }

    /// 选择间接兑换场所
    pub fn resolve_venue(&self, token: Address, pool: Option<&PoolKey>) -> Result<IndirectVenue> {
        let base = self.config.base_token;
        let pool_reaches_base = pool.filter(|p| {
            p.contains(token) && p.other(token).map_or(false, |other| other == base || is_native(other))
        });

        match self.config.indirect_route {
            IndirectRoute::Auto => Ok(match pool_reaches_base {
                Some(pool_key) => IndirectVenue::V4 { pool_key: *pool_key },
                None => IndirectVenue::V3 { fee: FALLBACK_V3_FEE },
            }),
            IndirectRoute::V4Position => pool_reaches_base
                .map(|pool_key| IndirectVenue::V4 { pool_key: *pool_key })
                .ok_or_else(|| {
                    HarvestError::Precondition(format!(
                        "v4 route requested but no position pool pairs {:?} with the base asset",
                        token
                    ))
                }),
            IndirectRoute::V3 { fee } => Ok(IndirectVenue::V3 { fee }),
        }
    }

    /// 将 `amount` 的 `token` 兑换为结算资产
    ///
    /// 失败时返回已确认的交易与第一跳留下的基础资产，便于手动重试
    pub async fn to_settlement(
        &self,
        token: Address,
        amount: U256,
        pool: Option<&PoolKey>,
    ) -> std::result::Result<SwapOutcome, SwapFailure> {
        let settlement = self.config.settlement_token;
        let base = self.config.base_token;

        if amount.is_zero() {
            return Ok(SwapOutcome::default());
        }
        if token == settlement {
            return Ok(SwapOutcome {
                settlement_received: amount,
                receipts: Vec::new(),
            });
        }

        let mut receipts = Vec::new();
        let base_amount = match self.to_base(token, amount, pool, &mut receipts).await {
            Ok(base_amount) => base_amount,
            Err(error) => return Err(SwapFailure::new(error, receipts)),
        };

        if base_amount.is_zero() {
            warn!(target: "harvest", "{:?} 兑换为基础资产后数量为 0", token);
            return Ok(SwapOutcome {
                settlement_received: U256::zero(),
                receipts,
            });
        }

        match self.direct(base, base_amount, &mut receipts).await {
            Ok(settlement_received) => Ok(SwapOutcome {
                settlement_received,
                receipts,
            }),
            Err(error) => {
                let mut failure = SwapFailure::new(error, receipts);
                if token != base {
                    warn!(
                        target: "harvest",
                        "⚠️ {:?} 第一跳已完成，{} {:?} 留在钱包中",
                        token, base_amount, base
                    );
                    failure.stranded = Some((base, base_amount));
                }
                Err(failure)
            }
        }
    }

    /// 第一跳：原生币包装，其他代币经间接路径兑换为基础资产
    async fn to_base(
        &self,
        token: Address,
        amount: U256,
        pool: Option<&PoolKey>,
        receipts: &mut Vec<TxReceipt>,
    ) -> Result<U256> {
        if is_native(token) {
            let amount = self.wrappable(amount).await?;
            if amount.is_zero() {
                return Ok(U256::zero());
            }
            self.wrap(amount, receipts).await
        } else if token == self.config.base_token {
            Ok(amount)
        } else {
            let venue = self.resolve_venue(token, pool)?;
            self.indirect(token, amount, venue, pool, receipts).await
        }
    }

    /// 可包装的原生币数量，余额中保留 gas 预留
    async fn wrappable(&self, amount: U256) -> Result<U256> {
        let balance = self.chain.native_balance(self.chain.address()).await?;
        let cap = balance.saturating_sub(U256::from(NATIVE_GAS_RESERVE));
        if amount > cap {
            warn!(
                target: "harvest",
                "⚠️ 原生币余额 {} 不足以包装 {} 并保留 gas，只包装 {}",
                balance, amount, cap
            );
        }
        Ok(amount.min(cap))
    }

    /// 最小输出 = 预期输出 × (1 - 滑点)，无价格时为 0
    async fn min_out(&self, token_in: Address, amount_in: U256, token_out: Address, pool: Option<&PoolKey>) -> U256 {
        match self.pricer.expected_output(token_in, amount_in, token_out, pool).await {
            Some(expected) => {
                let bps = slippage_bps(self.config.slippage_pct).min(10_000);
                expected * U256::from(10_000 - bps) / U256::from(10_000u64)
            }
            None => {
                warn!(
                    target: "harvest",
                    "⚠️ {:?} → {:?} 无价格，amountOutMinimum 设为 0",
                    token_in, token_out
                );
                U256::zero()
            }
        }
    }

    async fn wrap(&self, amount: U256, receipts: &mut Vec<TxReceipt>) -> Result<U256> {
        let base = self.config.base_token;
        let request = TxRequest::new(base, erc20::deposit_calldata(), format!("wrap {} wei", amount)).with_value(amount);
        let measurement = BalanceMeter::new(self.chain)
            .measure(&[base], || self.chain.send_transaction(request))
            .await?;
        receipts.push(measurement.receipt);
        Ok(measurement.delta(base))
    }

    /// 基础资产 → 结算资产 (V3 单跳)
    async fn direct(&self, token_in: Address, amount: U256, receipts: &mut Vec<TxReceipt>) -> Result<U256> {
        let settlement = self.config.settlement_token;
        let router = self.contracts.swap_router_02;
        if let Some(receipt) = self.approvals().ensure_erc20(token_in, router, amount).await? {
            receipts.push(receipt);
        }

        let min_out = self.min_out(token_in, amount, settlement, None).await;
        let request = TxRequest::new(
            router,
            v3::exact_input_single_calldata(
                token_in,
                settlement,
                self.config.direct_fee_tier,
                self.chain.address(),
                amount,
                min_out,
            ),
            format!("swap {:?} → settlement", token_in),
        );
        let measurement = BalanceMeter::new(self.chain)
            .measure(&[settlement], || self.chain.send_transaction(request))
            .await?;
        receipts.push(measurement.receipt);

        let received = measurement.delta(settlement);
        info!(target: "harvest", "🔄 直接兑换 {} {:?} → {} 结算资产 (min {})", amount, token_in, received, min_out);
        Ok(received)
    }

    /// 代币 → 基础资产，返回按余额差得到的基础资产数量
    async fn indirect(
        &self,
        token: Address,
        amount: U256,
        venue: IndirectVenue,
        pool: Option<&PoolKey>,
        receipts: &mut Vec<TxReceipt>,
    ) -> Result<U256> {
        let base = self.config.base_token;
        let min_out = self.min_out(token, amount, base, pool).await;

        let request = match venue {
            IndirectVenue::V4 { pool_key } => {
                let router = self.contracts.universal_router;
                receipts.extend(self.approvals().ensure_permit2(token, router, amount).await?);

                let amount_in = u128_amount(amount)?;
                let min_out = u128_amount(min_out)?;
                let zero_for_one = token == pool_key.currency0;
                let output_native = pool_key.other(token).map_or(false, is_native);

                let mut commands = vec![RouterCommand::V4Swap(V4Planner::swap_exact_in_single(
                    pool_key,
                    zero_for_one,
                    amount_in,
                    min_out,
                    output_native,
                ))];
                if output_native {
                    // 路由合约收到的 ETH 全部包装为 WETH 发回钱包
                    commands.push(RouterCommand::WrapEth {
                        recipient: MSG_SENDER,
                        amount: *CONTRACT_BALANCE,
                    });
                }
                let deadline = self.chain.deadline(self.config.deadline_secs).await?;
                TxRequest::new(
                    router,
                    universal_router::execute_calldata(&commands, deadline),
                    format!("v4 swap {:?} → base", token),
                )
            }
            IndirectVenue::V3 { fee } => {
                let router = self.contracts.swap_router_02;
                if let Some(receipt) = self.approvals().ensure_erc20(token, router, amount).await? {
                    receipts.push(receipt);
                }
                TxRequest::new(
                    router,
                    v3::exact_input_single_calldata(token, base, fee, self.chain.address(), amount, min_out),
                    format!("v3 swap {:?} → base", token),
                )
            }
        };

        let measurement = BalanceMeter::new(self.chain)
            .measure(&[base], || self.chain.send_transaction(request))
            .await?;
        receipts.push(measurement.receipt);

        let received = measurement.delta(base);
        info!(
            target: "harvest",
            "🔄 间接兑换 ({:?}) {} {:?} → {} 基础资产 (min {})",
            venue, amount, token, received, min_out
        );
        Ok(received)
    }

    /// dry-run 下估算结算资产数量
    pub async fn estimate(&self, token: Address, amount: U256, pool: Option<&PoolKey>) -> Option<U256> {
        if token == self.config.settlement_token {
            return Some(amount);
        }
        let expected = self
            .pricer
            .expected_output(token, amount, self.config.settlement_token, pool)
            .await?;
        let bps = slippage_bps(self.config.slippage_pct).min(10_000);
        Some(expected * U256::from(10_000 - bps) / U256::from(10_000u64))
    }
}

fn u128_amount(amount: U256) -> Result<u128> {
    if amount > U256::from(u128::MAX) {
        return Err(HarvestError::Precondition(format!("amount {} exceeds uint128", amount)));
    }
    Ok(amount.as_u128())
}
