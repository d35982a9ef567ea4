use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ledger_store::{Asset, LedgerStore, Token};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::error::{MarketError, MarketResult};
use crate::services::payout::{Payout, PayoutDispatcher, PayoutSummary};
use crate::store::runtime::RuntimeLedger;

#[derive(Debug)]
pub struct SettlementReport {
    pub event_id: Uuid,
    pub winning_token: Token,
    pub winning_total: u64,
    pub losing_total: u64,
    pub payouts: Vec<Payout>,
    pub skipped: usize,
    pub payout_task: JoinHandle<PayoutSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    pub winning_total: u64,
    pub losing_total: u64,
    pub payouts: Vec<Payout>,
    pub skipped: usize,
}

/// Splits the losing pool across winners pro rata to their stake. Profit is
/// rounded down; a payout that does not cover `fee` is skipped.
pub fn compute_payouts(
    event_id: Uuid,
    assets: &[Asset],
    winning: Token,
    fee: u64,
) -> MarketResult<PayoutPlan> {
    let pool = |token: Token| -> u128 {
        assets
            .iter()
            .filter(|a| a.token == token)
            .map(|a| a.collateral_staked as u128)
            .sum()
    };
    let winning_total = pool(winning);
    let losing_total = pool(winning.complement());

    let mut payouts = Vec::new();
    let mut skipped = 0;
    for asset in assets.iter().filter(|a| a.token == winning) {
        let stake = asset.collateral_staked as u128;
        let profit = if winning_total == 0 {
            0
        } else {
            stake * losing_total / winning_total
        };
        let gross = stake + profit;
        if gross <= fee as u128 {
            warn!(
                "Skipping payout below fee: event_id={}, address={}, gross={}",
                event_id, asset.user_raw_address, gross
            );
            skipped += 1;
            continue;
        }
        let amount = u64::try_from(gross - fee as u128).map_err(|_| MarketError::Overflow(event_id))?;
        payouts.push(Payout {
            address: asset.user_raw_address.clone(),
            amount,
        });
    }

    Ok(PayoutPlan {
        winning_total: u64::try_from(winning_total).map_err(|_| MarketError::Overflow(event_id))?,
        losing_total: u64::try_from(losing_total).map_err(|_| MarketError::Overflow(event_id))?,
        payouts,
        skipped,
    })
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    runtime: RuntimeLedger,
    dispatcher: PayoutDispatcher,
    config: SettlementConfig,
    cancel: CancellationToken,
    closing: Arc<Mutex<HashSet<Uuid>>>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        runtime: RuntimeLedger,
        dispatcher: PayoutDispatcher,
        config: SettlementConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            runtime,
            dispatcher,
            config,
            cancel,
            closing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Closes the event and settles it. An event that was deactivated by an
    /// interrupted close is settled again; a close already in flight wins.
    pub async fn close_event(&self, event_id: Uuid, winning: Token) -> MarketResult<SettlementReport> {
        {
            let mut closing = self.closing.lock().map_err(|_| MarketError::Poisoned)?;
            if !closing.insert(event_id) {
                return Err(MarketError::ClosedEvent(event_id));
            }
        }

        let result = self.settle(event_id, winning).await;

        if let Ok(mut closing) = self.closing.lock() {
            closing.remove(&event_id);
        }
        result
    }

    async fn settle(&self, event_id: Uuid, winning: Token) -> MarketResult<SettlementReport> {
        let event = self.store.get_event_copy(event_id).await?;
        if event.active {
            self.store.deactivate_event(event_id).await?;
        } else {
            info!("Resuming settlement of closed event: event_id={}", event_id);
        }
        if let Err(e) = self.runtime.close(event_id) {
            warn!("Runtime close failed for event {}: {}", event_id, e);
        }
        info!(
            "Event closed, waiting for in-flight deposits: event_id={}, winner={}, grace={:?}",
            event_id, winning, self.config.close_grace
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(MarketError::Cancelled),
            _ = sleep(self.config.close_grace) => {}
        }

        let assets = self.store.get_event_assets(event_id).await?;
        let plan = compute_payouts(event_id, &assets, winning, self.config.fee)?;
        info!(
            "Settlement computed: event_id={}, winning_total={}, losing_total={}, payouts={}, skipped={}",
            event_id,
            plan.winning_total,
            plan.losing_total,
            plan.payouts.len(),
            plan.skipped
        );

        // Nothing is sent until the event is deleted. Assets stay behind for audit.
        self.store.delete_event(event_id).await?;
        if let Err(e) = self.runtime.remove(event_id) {
            warn!("Runtime entry already gone for event {}: {}", event_id, e);
        }
        info!("Event settled: event_id={}", event_id);

        let payout_task = self.dispatcher.dispatch(event_id, plan.payouts.clone());

        Ok(SettlementReport {
            event_id,
            winning_token: winning,
            winning_total: plan.winning_total,
            losing_total: plan.losing_total,
            payouts: plan.payouts,
            skipped: plan.skipped,
            payout_task,
        })
    }
}
