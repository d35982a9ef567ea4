use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ledger_store::memory::MemoryLedgerStore;
use ledger_store::{Asset, Bet, Deal, Event, LedgerStore, StoreError, StoreResult, Tag, Token};
use uuid::Uuid;

use crate::chain::{
    AccountId, ChainError, ChainMessage, ChainTransaction, Direction, LedgerClient, MessageBody, TransferSender,
};
use crate::error::MarketResult;
use crate::services::notifier::{Alert, AlertSink, NotificationSink};
use crate::types::event_types::EventDto;

pub fn sample_event(tag: Tag, title: &str) -> Event {
    Event::new(
        tag,
        title.to_string(),
        String::new(),
        [
            Bet { token: Token::A, title: "Yes".into(), logo_link: String::new() },
            Bet { token: Token::B, title: "No".into(), logo_link: String::new() },
        ],
    )
}

pub fn comment_tx(hash: &str, direction: Direction, text: &str) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        messages: vec![ChainMessage { direction, body: MessageBody::Comment(text.to_string()) }],
    }
}

pub fn malformed_tx(hash: &str) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        messages: vec![
            ChainMessage { direction: Direction::Incoming, body: MessageBody::Malformed },
            ChainMessage { direction: Direction::Outgoing, body: MessageBody::Malformed },
        ],
    }
}

/// In-memory ledger. Addresses containing "invalid" fail to parse.
#[derive(Default)]
pub struct MockLedgerClient {
    transactions: Mutex<HashMap<String, Vec<ChainTransaction>>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transactions(&self, account: &str, transactions: Vec<ChainTransaction>) {
        self.transactions.lock().unwrap().insert(account.to_string(), transactions);
    }

    /// The next `count` lookups report the service as unavailable.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    fn parse_address(&self, raw: &str) -> Result<AccountId, ChainError> {
        if raw.is_empty() || raw.contains("invalid") {
            return Err(ChainError::InvalidAddress(raw.to_string()));
        }
        Ok(AccountId::new(raw))
    }

    async fn list_recent_transactions(
        &self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::ExternalUnavailable("mock outage".into()));
        }
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions
            .get(account.as_str())
            .map(|txs| txs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, u64, String)>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, u64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferSender for RecordingSender {
    async fn send(&self, destination: &str, amount: u64, memo: &str) -> Result<(), ChainError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), amount, memo.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<EventDto>>,
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<EventDto> {
        self.published.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: &EventDto) -> MarketResult<()> {
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn raise(&self, alert: Alert) -> MarketResult<()> {
        self.alerts.lock().unwrap().push(alert);
        Ok(())
    }
}

/// Memory store with injectable failures for the calls settlement and the
/// snapshotter depend on.
pub struct FlakyStore {
    inner: MemoryLedgerStore,
    delete_event_failures: AtomicUsize,
    unreadable_events: Mutex<HashSet<Uuid>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            delete_event_failures: AtomicUsize::new(0),
            unreadable_events: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &MemoryLedgerStore {
        &self.inner
    }

    pub fn fail_delete_event(&self, count: usize) {
        self.delete_event_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads_of(&self, id: Uuid) {
        self.unreadable_events.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        self.inner.save_event(event).await
    }

    async fn get_event_copy(&self, id: Uuid) -> StoreResult<Event> {
        if self.unreadable_events.lock().unwrap().contains(&id) {
            return Err(StoreError::ConcurrentUpdate { op: "get event" });
        }
        self.inner.get_event_copy(id).await
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        self.inner.list_events().await
    }

    async fn deactivate_event(&self, id: Uuid) -> StoreResult<()> {
        self.inner.deactivate_event(id).await
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<()> {
        let failing = self
            .delete_event_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::ConcurrentUpdate { op: "delete event" });
        }
        self.inner.delete_event(id).await
    }

    async fn save_deal_unchecked(&self, deal: &Deal) -> StoreResult<()> {
        self.inner.save_deal_unchecked(deal).await
    }

    async fn get_deal(&self, id: Uuid) -> StoreResult<Deal> {
        self.inner.get_deal(id).await
    }

    async fn mark_pending(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.mark_pending(id).await
    }

    async fn promote_deal(&self, id: Uuid) -> StoreResult<Deal> {
        self.inner.promote_deal(id).await
    }

    async fn decline_deal(&self, id: Uuid) -> StoreResult<()> {
        self.inner.decline_deal(id).await
    }

    async fn delete_deal(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_deal(id).await
    }

    async fn increment_attempt(&self, id: Uuid) -> StoreResult<i32> {
        self.inner.increment_attempt(id).await
    }

    async fn pending_deals(&self) -> StoreResult<Vec<Deal>> {
        self.inner.pending_deals().await
    }

    async fn get_user_assets(&self, address: &str) -> StoreResult<Vec<Asset>> {
        self.inner.get_user_assets(address).await
    }

    async fn get_event_assets(&self, event_id: Uuid) -> StoreResult<Vec<Asset>> {
        self.inner.get_event_assets(event_id).await
    }

    async fn delete_event_assets(&self, event_id: Uuid) -> StoreResult<u64> {
        self.inner.delete_event_assets(event_id).await
    }
}
