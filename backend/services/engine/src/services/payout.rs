use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::poll::{confirm_memo, Confirmation, PollPolicy};
use crate::chain::{AccountId, ChainError, Direction, LedgerClient, TransferSender};
use crate::config::PayoutConfig;
use crate::services::notifier::{Alert, AlertSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayoutSummary {
    pub confirmed: usize,
    pub abandoned: usize,
    pub unresolved: usize,
}

pub fn payout_memo(event_id: Uuid) -> String {
    format!("profit: {}", event_id)
}

struct PendingPayout {
    payout: Payout,
    account: AccountId,
    attempts: u32,
    last_sent: Instant,
}

/// Sends winnings and keeps resending until each transfer shows up on the
/// recipient's account.
#[derive(Clone)]
pub struct PayoutDispatcher {
    sender: Arc<dyn TransferSender>,
    ledger: Arc<dyn LedgerClient>,
    alerts: Arc<dyn AlertSink>,
    config: PayoutConfig,
    poll: PollPolicy,
    transaction_limit: usize,
    cancel: CancellationToken,
}

impl PayoutDispatcher {
    pub fn new(
        sender: Arc<dyn TransferSender>,
        ledger: Arc<dyn LedgerClient>,
        alerts: Arc<dyn AlertSink>,
        config: PayoutConfig,
        poll: PollPolicy,
        transaction_limit: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            ledger,
            alerts,
            config,
            poll,
            transaction_limit,
            cancel,
        }
    }

    pub fn dispatch(&self, event_id: Uuid, payouts: Vec<Payout>) -> JoinHandle<PayoutSummary> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run(event_id, payouts).await })
    }

    async fn send(&self, pending: &mut PendingPayout, memo: &str) {
        pending.attempts += 1;
        pending.last_sent = Instant::now();
        match self
            .sender
            .send(&pending.payout.address, pending.payout.amount, memo)
            .await
        {
            Ok(()) => info!(
                "Payout sent: address={}, amount={}, attempt={}",
                pending.payout.address, pending.payout.amount, pending.attempts
            ),
            Err(e) => error!("Payout send failed for {}: {}", pending.payout.address, e),
        }
    }

    async fn abandon(&self, event_id: Uuid, pending: PendingPayout) {
        warn!(
            "Abandoning payout: event_id={}, address={}, attempts={}",
            event_id, pending.payout.address, pending.attempts
        );
        let alert = Alert::PayoutAbandoned {
            event_id,
            address: pending.payout.address,
            amount: pending.payout.amount,
            attempts: pending.attempts,
        };
        if let Err(e) = self.alerts.raise(alert).await {
            error!("Failed to raise payout alert for event {}: {}", event_id, e);
        }
    }

    async fn run(self, event_id: Uuid, payouts: Vec<Payout>) -> PayoutSummary {
        let memo = payout_memo(event_id);
        let mut summary = PayoutSummary::default();
        let mut pending = Vec::with_capacity(payouts.len());

        for payout in payouts {
            let account = match self.ledger.parse_address(&payout.address) {
                Ok(account) => account,
                Err(e) => {
                    error!("Cannot pay {}: {}", payout.address, e);
                    let unsendable = PendingPayout {
                        payout,
                        account: AccountId::new(""),
                        attempts: 0,
                        last_sent: Instant::now(),
                    };
                    self.abandon(event_id, unsendable).await;
                    summary.abandoned += 1;
                    continue;
                }
            };
            let mut entry = PendingPayout {
                payout,
                account,
                attempts: 0,
                last_sent: Instant::now(),
            };
            self.send(&mut entry, &memo).await;
            pending.push(entry);
        }

        info!("Payout dispatch started: event_id={}, recipients={}", event_id, pending.len());

        while !pending.is_empty() {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }

            let mut still_pending = Vec::with_capacity(pending.len());
            for mut entry in pending {
                let lookup = confirm_memo(
                    self.ledger.as_ref(),
                    &entry.account,
                    Direction::Incoming,
                    &memo,
                    self.transaction_limit,
                    &self.poll,
                    &self.cancel,
                )
                .await;

                match lookup {
                    Ok(Confirmation::Confirmed(hash)) => {
                        info!(
                            "Payout confirmed: event_id={}, address={}, tx={}",
                            event_id, entry.payout.address, hash
                        );
                        summary.confirmed += 1;
                        continue;
                    }
                    Ok(Confirmation::NotYetConfirmed) => {}
                    Err(ChainError::Cancelled) => {
                        still_pending.push(entry);
                        continue;
                    }
                    Err(e) => warn!("Payout lookup failed for {}: {}", entry.payout.address, e),
                }

                if entry.last_sent.elapsed() < self.config.retry_interval {
                    still_pending.push(entry);
                    continue;
                }

                match self.config.max_attempts {
                    Some(max) if entry.attempts >= max => {
                        self.abandon(event_id, entry).await;
                        summary.abandoned += 1;
                    }
                    _ => {
                        self.send(&mut entry, &memo).await;
                        still_pending.push(entry);
                    }
                }
            }
            pending = still_pending;
        }

        summary.unresolved = pending.len();
        info!(
            "Payout dispatch finished: event_id={}, confirmed={}, abandoned={}, unresolved={}",
            event_id, summary.confirmed, summary.abandoned, summary.unresolved
        );
        summary
    }
}
