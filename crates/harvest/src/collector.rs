use config_crate::ChainContracts;
use dex::uniswap::v4;
use dex::V4Planner;
use ethers::types::{Address, U256};
use executor::{ChainClient, ChainError, TxReceipt, TxRequest};
use models::{FeeBalanceSnapshot, Position};
use tracing::{debug, info};

use crate::approvals::Approvals;
use crate::error::{HarvestError, Result};
use crate::meter::{credit, BalanceMeter};

/// 收集结果，两种币按 pool key 顺序排列
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub snapshots: [FeeBalanceSnapshot; 2],
    pub credited: [U256; 2],
    pub receipt: TxReceipt,
}

/// V4 头寸手续费收集
pub struct PositionCollector<'a> {
    chain: &'a dyn ChainClient,
    contracts: &'a ChainContracts,
    deadline_secs: u64,
    dry_run: bool,
}

impl<'a> PositionCollector<'a> {
    pub fn new(chain: &'a dyn ChainClient, contracts: &'a ChainContracts, deadline_secs: u64, dry_run: bool) -> Self {
        Self {
            chain,
            contracts,
            deadline_secs,
            dry_run,
        }
    }

    /// 读取头寸的池子、区间与流动性
    pub async fn load_position(&self, token_id: U256) -> Result<Position> {
        let manager = self.contracts.position_manager;
        let info = self
            .chain
            .call(manager, v4::pool_and_position_info_calldata(token_id))
            .await?;
        let (pool_key, info) = v4::decode_pool_and_position_info(&info)
            .ok_or_else(|| ChainError::Decode(format!("getPoolAndPositionInfo({})", token_id)))?;

        let liquidity = self
            .chain
            .call(manager, v4::position_liquidity_calldata(token_id))
            .await?;
        let liquidity = v4::decode_position_liquidity(&liquidity)
            .ok_or_else(|| ChainError::Decode(format!("getPositionLiquidity({})", token_id)))?;

        let position = Position::new(token_id, pool_key, info.tick_lower, info.tick_upper, liquidity)
            .map_err(|e| HarvestError::Precondition(format!("position {}: {}", token_id, e)))?;
        debug!(
            target: "harvest",
            "头寸 #{}: {:?}/{:?} fee={} ticks=[{}, {}] L={}",
            token_id,
            pool_key.currency0,
            pool_key.currency1,
            pool_key.fee,
            position.tick_lower,
            position.tick_upper,
            liquidity
        );
        Ok(position)
    }

    pub async fn owner_of(&self, token_id: U256) -> Result<Address> {
        let data = self
            .chain
            .call(self.contracts.position_manager, v4::owner_of_calldata(token_id))
            .await?;
        Ok(v4::decode_owner(&data).ok_or_else(|| ChainError::Decode(format!("ownerOf({})", token_id)))?)
    }

    /// 复投前的 Permit2 授权，spender 为 PositionManager
    pub async fn ensure_approvals(&self, position: &Position, required: [U256; 2]) -> Result<Vec<TxReceipt>> {
        let approvals = Approvals::new(self.chain, self.contracts.permit2, self.dry_run);
        let mut receipts = Vec::new();
        for (currency, required) in position.pool_key.currencies().into_iter().zip(required) {
            receipts.extend(
                approvals
                    .ensure_permit2(currency, self.contracts.position_manager, required)
                    .await?,
            );
        }
        Ok(receipts)
    }

    /// 未收取手续费估算 (只读)
    ///
    /// 用于 dry-run 预估以及收集时的到账校验
    pub async fn pending_fees(&self, position: &Position) -> Result<[U256; 2]> {
        let pool_id = position.pool_key.pool_id();
        let growth = self
            .chain
            .call(
                self.contracts.state_view,
                v4::fee_growth_inside_calldata(pool_id, position.tick_lower, position.tick_upper),
            )
            .await?;
        let (inside0, inside1) =
            v4::decode_fee_growth_inside(&growth).ok_or_else(|| ChainError::Decode("getFeeGrowthInside".to_string()))?;

        let state = self
            .chain
            .call(
                self.contracts.state_view,
                v4::position_state_calldata(
                    pool_id,
                    self.contracts.position_manager,
                    position.tick_lower,
                    position.tick_upper,
                    position.salt(),
                ),
            )
            .await?;
        let state = v4::decode_position_state(&state).ok_or_else(|| ChainError::Decode("getPositionInfo".to_string()))?;

        Ok([
            v4::fees_owed(state.liquidity, inside0, state.fee_growth_inside0_last_x128),
            v4::fees_owed(state.liquidity, inside1, state.fee_growth_inside1_last_x128),
        ])
    }

    /// 收取手续费：减少 0 流动性并 close 两种币
    ///
    /// 流动性为 0 时不发送交易，返回 None
    pub async fn collect(&self, position: &Position, expected: Option<[U256; 2]>) -> Result<Option<CollectOutcome>> {
        if !position.has_liquidity() {
            info!(target: "harvest", "头寸 #{} 无流动性，跳过收集", position.token_id);
            return Ok(None);
        }

        let [currency0, currency1] = position.pool_key.currencies();
        let planner = V4Planner::collect_fees(position.token_id, currency0, currency1);
        let deadline = self.chain.deadline(self.deadline_secs).await?;
        let request = TxRequest::new(
            self.contracts.position_manager,
            v4::modify_liquidities_calldata(&planner, deadline),
            format!("collect #{}", position.token_id),
        );

        let meter = BalanceMeter::new(self.chain);
        let measurement = meter
            .measure(&[currency0, currency1], || self.chain.send_transaction(request))
            .await?;

        let snapshots = [measurement.snapshots[0], measurement.snapshots[1]];
        let credited = [
            credit(&snapshots[0], expected.map(|e| e[0]), "collect"),
            credit(&snapshots[1], expected.map(|e| e[1]), "collect"),
        ];
        info!(
            target: "harvest",
            "🧺 收集头寸 #{}: {:?}={} {:?}={}",
            position.token_id, currency0, credited[0], currency1, credited[1]
        );

        Ok(Some(CollectOutcome {
            snapshots,
            credited,
            receipt: measurement.receipt,
        }))
    }
}
