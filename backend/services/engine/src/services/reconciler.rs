use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use ledger_store::{Deal, DealStatus, LedgerStore, StoreError};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use uuid::Uuid;

use crate::chain::poll::{confirm_memo, Confirmation};
use crate::chain::{ChainError, Direction, LedgerClient};
use crate::config::ReconcilerConfig;
use crate::error::{MarketError, MarketResult};
use crate::services::notifier::{Alert, AlertSink, NotificationSink};
use crate::store::runtime::RuntimeLedger;
use crate::store::snapshot::Snapshotter;
use crate::types::request_types::DepositStatus;

#[derive(Debug, Clone, Copy)]
pub struct DepositRequest {
    pub deal_id: Uuid,
    pub status: DepositStatus,
    pub not_before: Instant,
}

#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<DepositRequest>,
    delay: Duration,
}

impl ReconcilerHandle {
    /// Queues a confirmation; the chain is not consulted before the
    /// configured delay has elapsed.
    pub async fn submit(&self, deal_id: Uuid, status: DepositStatus) -> MarketResult<()> {
        self.submit_request(DepositRequest {
            deal_id,
            status,
            not_before: Instant::now() + self.delay,
        })
        .await
    }

    pub async fn submit_request(&self, request: DepositRequest) -> MarketResult<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| MarketError::QueueClosed)?;
        info!("Deposit request registered: deal_id={}, status={:?}", request.deal_id, request.status);
        Ok(())
    }
}

pub struct ReconcilerDeps {
    pub store: Arc<dyn LedgerStore>,
    pub runtime: RuntimeLedger,
    pub snapshotter: Snapshotter,
    pub ledger: Arc<dyn LedgerClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub alerts: Arc<dyn AlertSink>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Verified,
    Dropped,
    Deleted,
    Requeued,
    Abandoned,
}

struct Reconciler {
    deps: ReconcilerDeps,
    config: ReconcilerConfig,
    cancel: CancellationToken,
    queue: DelayQueue<Uuid>,
    queued: HashSet<Uuid>,
}

pub fn spawn_reconciler(
    deps: ReconcilerDeps,
    config: ReconcilerConfig,
    cancel: CancellationToken,
) -> (ReconcilerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handle = ReconcilerHandle {
        tx,
        delay: config.confirmation_delay,
    };
    let worker = Reconciler {
        deps,
        config,
        cancel,
        queue: DelayQueue::new(),
        queued: HashSet::new(),
    };
    (handle, tokio::spawn(worker.run(rx)))
}

impl Reconciler {
    async fn run(mut self, mut rx: mpsc::Receiver<DepositRequest>) {
        info!(
            "Starting deposit reconciler: delay={:?}, max_attempts={}",
            self.config.confirmation_delay, self.config.max_attempts
        );
        let every = self.config.recovery_interval;
        let mut recovery = interval_at(Instant::now() + every, every);
        recovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(request) = rx.recv() => self.accept(request).await,
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let deal_id = expired.into_inner();
                    self.queued.remove(&deal_id);
                    let outcome = self.process(deal_id).await;
                    debug!("Deposit processed: deal_id={}, outcome={:?}", deal_id, outcome);
                }
                _ = recovery.tick() => self.recover().await,
            }
        }
        info!("Deposit reconciler stopped: {} deals left queued", self.queued.len());
    }

    fn park(&mut self, deal_id: Uuid, due: Instant) {
        if self.queued.insert(deal_id) {
            self.queue.insert_at(deal_id, due);
        } else {
            debug!("Deposit already queued: deal_id={}", deal_id);
        }
    }

    async fn accept(&mut self, request: DepositRequest) {
        match request.status {
            DepositStatus::Error => match self.deps.store.decline_deal(request.deal_id).await {
                Ok(()) => info!("Deal declined on wallet error: deal_id={}", request.deal_id),
                Err(e) => warn!("Failed to decline deal {}: {}", request.deal_id, e),
            },
            DepositStatus::Ok => self.park(request.deal_id, request.not_before),
        }
    }

    /// Requeues every confirmed deal still waiting for the chain, keeping the
    /// not-before time relative to when the deal was created.
    async fn recover(&mut self) {
        let deals = match self.deps.store.pending_deals().await {
            Ok(deals) => deals,
            Err(e) => {
                error!("Recovery sweep failed to load pending deals: {}", e);
                return;
            }
        };

        let mut requeued = 0;
        for deal in deals {
            if self.queued.contains(&deal.id) {
                continue;
            }
            let elapsed = (Utc::now() - deal.created_at).to_std().unwrap_or_default();
            let remaining = self.config.confirmation_delay.saturating_sub(elapsed);
            self.park(deal.id, Instant::now() + remaining);
            requeued += 1;
        }
        if requeued > 0 {
            info!("Recovery sweep requeued {} pending deals", requeued);
        }
    }

    async fn process(&mut self, deal_id: Uuid) -> Outcome {
        let deal = match self.deps.store.get_deal(deal_id).await {
            Ok(deal) => deal,
            Err(StoreError::DealNotFound(_)) => {
                warn!("Deposit for unknown deal dropped: deal_id={}", deal_id);
                return Outcome::Dropped;
            }
            Err(e) => {
                error!("Failed to load deal {}: {}", deal_id, e);
                return self.requeue(deal_id);
            }
        };

        if deal.status.is_final() {
            debug!("Deal already final: deal_id={}, status={:?}", deal_id, deal.status);
            return Outcome::Dropped;
        }
        if deal.status == DealStatus::Unchecked {
            debug!("Deal not confirmed by its owner yet: deal_id={}", deal_id);
            return Outcome::Dropped;
        }

        let account = match self.deps.ledger.parse_address(&deal.user_raw_addr) {
            Ok(account) => account,
            Err(e) => {
                warn!("Deleting deal with unusable address: deal_id={}, error={}", deal_id, e);
                if let Err(e) = self.deps.store.delete_deal(deal_id).await {
                    error!("Failed to delete deal {}: {}", deal_id, e);
                }
                return Outcome::Deleted;
            }
        };

        info!("Looking up deposit transaction: deal_id={}, address={}", deal_id, account);
        let memo = deal_id.to_string();
        let lookup = confirm_memo(
            self.deps.ledger.as_ref(),
            &account,
            Direction::Outgoing,
            &memo,
            self.config.transaction_limit,
            &self.config.poll,
            &self.cancel,
        )
        .await;

        match lookup {
            Ok(Confirmation::Confirmed(hash)) => {
                info!("Deposit transaction found: deal_id={}, tx={}", deal_id, hash);
                self.promote(deal_id).await
            }
            Ok(Confirmation::NotYetConfirmed) => self.retry_or_abandon(&deal).await,
            Err(ChainError::ExternalUnavailable(reason)) => {
                warn!("Ledger unavailable for deal {}: {}", deal_id, reason);
                self.retry_or_abandon(&deal).await
            }
            Err(ChainError::Cancelled) => Outcome::Dropped,
            Err(e @ ChainError::InvalidAddress(_)) => {
                error!("Ledger rejected address for deal {}: {}", deal_id, e);
                self.retry_or_abandon(&deal).await
            }
        }
    }

    async fn promote(&mut self, deal_id: Uuid) -> Outcome {
        let deal = match self.deps.store.promote_deal(deal_id).await {
            Ok(deal) => deal,
            Err(StoreError::DealAlreadyProcessed { id, status }) => {
                info!("Deal already processed: deal_id={}, status={:?}", id, status);
                return Outcome::Dropped;
            }
            Err(e) if e.is_retryable() => {
                warn!("Deal verification will be retried: deal_id={}, error={}", deal_id, e);
                return self.requeue(deal_id);
            }
            Err(e) => {
                error!("Failed to verify deal {}: {}", deal_id, e);
                return self.requeue(deal_id);
            }
        };

        info!(
            "Deal verified: deal_id={}, event_id={}, token={}, collateral={}",
            deal.id, deal.event_id, deal.token, deal.collateral
        );

        if let Err(e) = self.deps.runtime.deposit(deal.event_id, deal.token, deal.collateral) {
            error!("Runtime deposit failed for deal {}: {}", deal.id, e);
            return Outcome::Verified;
        }

        match self.deps.snapshotter.live_event(deal.event_id).await {
            Ok(dto) => {
                if let Err(e) = self.deps.notifier.publish(&dto).await {
                    warn!("Failed to publish event update {}: {}", deal.event_id, e);
                }
            }
            Err(e) => warn!("Could not build event update {}: {}", deal.event_id, e),
        }
        Outcome::Verified
    }

    async fn retry_or_abandon(&mut self, deal: &Deal) -> Outcome {
        let attempts = match self.deps.store.increment_attempt(deal.id).await {
            Ok(attempts) => attempts,
            Err(e) => {
                error!("Failed to count attempt for deal {}: {}", deal.id, e);
                return self.requeue(deal.id);
            }
        };

        if attempts <= self.config.max_attempts {
            info!("Deposit not confirmed yet: deal_id={}, attempts={}", deal.id, attempts);
            return self.requeue(deal.id);
        }

        warn!("Abandoning deposit: deal_id={}, attempts={}", deal.id, attempts);
        if let Err(e) = self.deps.store.decline_deal(deal.id).await {
            error!("Failed to decline abandoned deal {}: {}", deal.id, e);
        }
        let alert = Alert::DepositAbandoned {
            deal_id: deal.id,
            event_id: deal.event_id,
            address: deal.user_raw_addr.clone(),
            amount: deal.collateral,
            attempts,
        };
        if let Err(e) = self.deps.alerts.raise(alert).await {
            error!("Failed to raise alert for deal {}: {}", deal.id, e);
        }
        Outcome::Abandoned
    }

    fn requeue(&mut self, deal_id: Uuid) -> Outcome {
        self.park(deal_id, Instant::now() + self.config.confirmation_delay);
        Outcome::Requeued
    }
}
