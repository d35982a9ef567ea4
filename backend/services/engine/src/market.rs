use std::sync::{Arc, Mutex};

use ledger_store::{Deal, DealStatus, LedgerStore, StoreError};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use crate::chain::{LedgerClient, TransferSender};
use crate::config::EngineConfig;
use crate::error::{MarketError, MarketResult};
use crate::services::notifier::{AlertSink, NotificationSink};
use crate::services::payout::PayoutDispatcher;
use crate::services::reconciler::{spawn_reconciler, ReconcilerDeps, ReconcilerHandle};
use crate::services::settlement::{SettlementEngine, SettlementReport};
use crate::store::runtime::RuntimeLedger;
use crate::store::snapshot::Snapshotter;
use crate::types::event_types::{AssetDto, EventDto, EventPage, Portfolio};
use crate::types::request_types::{
    CloseEventRequest, DepositConfirmation, DepositInstruction, DepositIntent, DepositStatus,
    EventPageQuery, NewEvent, UserAssetsQuery,
};
use crate::types::units::{format_units, to_smallest_units};

/// External collaborators the market is wired with.
pub struct MarketDeps {
    pub store: Arc<dyn LedgerStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub sender: Arc<dyn TransferSender>,
    pub notifier: Arc<dyn NotificationSink>,
    pub alerts: Arc<dyn AlertSink>,
}

#[derive(Clone)]
pub struct Market {
    bank_address: String,
    store: Arc<dyn LedgerStore>,
    ledger: Arc<dyn LedgerClient>,
    runtime: RuntimeLedger,
    snapshotter: Snapshotter,
    reconciler: ReconcilerHandle,
    settlement: SettlementEngine,
    cancel: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Market {
    /// Rebuilds runtime state from the store and starts the background workers.
    pub async fn start(config: EngineConfig, deps: MarketDeps) -> MarketResult<Self> {
        let cancel = CancellationToken::new();
        let runtime = RuntimeLedger::new();
        restore_runtime(deps.store.as_ref(), &runtime).await?;

        let snapshotter = Snapshotter::new(runtime.clone(), deps.store.clone(), config.snapshot.page_size);
        if let Err(e) = snapshotter.refresh().await {
            error!("Initial snapshot failed: {}", e);
        }
        let snapshot_worker = snapshotter.spawn(config.snapshot.interval, cancel.child_token());

        let (reconciler, reconciler_worker) = spawn_reconciler(
            ReconcilerDeps {
                store: deps.store.clone(),
                runtime: runtime.clone(),
                snapshotter: snapshotter.clone(),
                ledger: deps.ledger.clone(),
                notifier: deps.notifier.clone(),
                alerts: deps.alerts.clone(),
            },
            config.reconciler.clone(),
            cancel.child_token(),
        );

        let dispatcher = PayoutDispatcher::new(
            deps.sender.clone(),
            deps.ledger.clone(),
            deps.alerts.clone(),
            config.settlement.payout.clone(),
            config.settlement.poll,
            config.settlement.transaction_limit,
            cancel.child_token(),
        );
        let settlement = SettlementEngine::new(
            deps.store.clone(),
            runtime.clone(),
            dispatcher,
            config.settlement.clone(),
            cancel.child_token(),
        );

        info!("Market started: events={}, bank={}", runtime.len(), config.bank_address);

        Ok(Self {
            bank_address: config.bank_address,
            store: deps.store,
            ledger: deps.ledger,
            runtime,
            snapshotter,
            reconciler,
            settlement,
            cancel,
            workers: Arc::new(Mutex::new(vec![snapshot_worker, reconciler_worker])),
        })
    }

    pub fn runtime(&self) -> &RuntimeLedger {
        &self.runtime
    }

    pub fn snapshotter(&self) -> &Snapshotter {
        &self.snapshotter
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn create_event(&self, request: NewEvent) -> MarketResult<EventDto> {
        request.validate()?;
        let event = request
            .into_event()
            .ok_or_else(|| MarketError::Validation("an event needs one TokenA and one TokenB bet and a concrete tag".into()))?;

        self.store.save_event(&event).await?;
        self.runtime.create_event(event.id)?;
        info!("Event created: event_id={}, title={}", event.id, event.title);

        let state = self.runtime.get_state(event.id)?;
        Ok(EventDto::assemble(&event, &state)?)
    }

    pub fn events_page(&self, query: &EventPageQuery) -> MarketResult<EventPage> {
        self.snapshotter.read_page(query.tag, query.page)
    }

    pub async fn event(&self, event_id: Uuid) -> MarketResult<EventDto> {
        self.snapshotter.live_event(event_id).await
    }

    /// Positions in events that are still open or awaiting settlement.
    pub async fn user_assets(&self, query: &UserAssetsQuery) -> MarketResult<Portfolio> {
        query.validate()?;
        let account = self.ledger.parse_address(&query.address)?;
        let assets = self.store.get_user_assets(account.as_str()).await?;

        let mut lines = Vec::with_capacity(assets.len());
        let mut total: u64 = 0;
        for asset in &assets {
            let event = match self.store.get_event_copy(asset.event_id).await {
                Ok(event) => event,
                Err(StoreError::EventNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            total = total.saturating_add(asset.collateral_staked);
            lines.push(AssetDto::new(asset, &event));
        }

        Ok(Portfolio {
            assets: lines,
            total_in_market: format_units(total),
        })
    }

    pub async fn create_deposit(&self, intent: DepositIntent) -> MarketResult<DepositInstruction> {
        intent.validate()?;
        let amount = to_smallest_units(intent.collateral)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| MarketError::Validation(format!("collateral {} is not payable", intent.collateral)))?;
        let account = self.ledger.parse_address(&intent.address)?;

        if !self.runtime.is_active(intent.event_id)? {
            return Err(MarketError::ClosedEvent(intent.event_id));
        }

        let deal = Deal::new(intent.event_id, account.as_str(), intent.token, amount);
        self.store.save_deal_unchecked(&deal).await?;
        info!(
            "Deal created: deal_id={}, event_id={}, token={}, collateral={}",
            deal.id, deal.event_id, deal.token, deal.collateral
        );

        Ok(DepositInstruction {
            address: self.bank_address.clone(),
            amount: amount.to_string(),
            memo: deal.id.to_string(),
            deposit_id: deal.id,
        })
    }

    pub async fn confirm_deposit(&self, confirmation: DepositConfirmation) -> MarketResult<()> {
        let deal = self.store.get_deal(confirmation.deposit_id).await?;
        if deal.status.is_final() {
            info!("Confirmation for settled deal ignored: deal_id={}, status={:?}", deal.id, deal.status);
            return Ok(());
        }

        if confirmation.deposit_status == DepositStatus::Ok && deal.status == DealStatus::Unchecked {
            self.store.mark_pending(deal.id).await?;
        }
        self.reconciler.submit(deal.id, confirmation.deposit_status).await
    }

    pub async fn close_event(&self, request: CloseEventRequest) -> MarketResult<SettlementReport> {
        self.settlement.close_event(request.event_id, request.winning_token).await
    }

    /// Registers a worker so `shutdown` waits for it.
    pub fn track(&self, worker: JoinHandle<()>) {
        match self.workers.lock() {
            Ok(mut workers) => {
                workers.retain(|w| !w.is_finished());
                workers.push(worker);
            }
            Err(_) => warn!("Worker registry poisoned, worker left untracked"),
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down market");
        self.cancel.cancel();
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker ended abnormally: {}", e);
            }
        }
        info!("Market stopped");
    }
}

async fn restore_runtime(store: &dyn LedgerStore, runtime: &RuntimeLedger) -> MarketResult<()> {
    for event in store.list_events().await? {
        let mut collateral = [0u64; 2];
        for asset in store.get_event_assets(event.id).await? {
            let slot = &mut collateral[asset.token.index()];
            *slot = slot
                .checked_add(asset.collateral_staked)
                .ok_or(MarketError::Overflow(event.id))?;
        }
        if !event.active {
            warn!("Event closed but not settled: event_id={}", event.id);
        }
        runtime.restore_event(event.id, event.active, collateral)?;
    }
    Ok(())
}
