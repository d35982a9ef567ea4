use std::sync::{Arc, RwLock};
use std::time::Duration;

use ledger_store::{LedgerStore, StoreError, Tag};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::store::runtime::RuntimeLedger;
use crate::types::event_types::{EventDto, EventPage};

/// Periodically published, sorted view of the active events.
#[derive(Clone)]
pub struct Snapshotter {
    runtime: RuntimeLedger,
    store: Arc<dyn LedgerStore>,
    page_size: usize,
    published: Arc<RwLock<Arc<Vec<EventDto>>>>,
}

impl Snapshotter {
    pub fn new(runtime: RuntimeLedger, store: Arc<dyn LedgerStore>, page_size: usize) -> Self {
        Self {
            runtime,
            store,
            page_size: page_size.max(1),
            published: Arc::new(RwLock::new(Arc::new(Vec::new()))),
        }
    }

    /// Current projection of one event, built from the store and the runtime.
    pub async fn live_event(&self, id: Uuid) -> MarketResult<EventDto> {
        let state = self.runtime.get_state(id)?;
        let event = self.store.get_event_copy(id).await?;
        Ok(EventDto::assemble(&event, &state)?)
    }

    /// Rebuilds the projection and swaps it in.
    pub async fn refresh(&self) -> MarketResult<usize> {
        let states = self.runtime.snapshot_all()?;
        let mut items = Vec::with_capacity(states.len());

        for state in states.into_iter().filter(|s| s.active) {
            let event = match self.store.get_event_copy(state.id).await {
                Ok(event) => event,
                Err(StoreError::EventNotFound(id)) => {
                    warn!("Snapshot skipped event without metadata: event_id={}", id);
                    continue;
                }
                Err(e) => {
                    error!("Snapshot skipped unreadable event {}: {}", state.id, e);
                    continue;
                }
            };
            match EventDto::assemble(&event, &state) {
                Ok(dto) => items.push(dto),
                Err(e) => error!("Snapshot skipped event {}: {}", state.id, e),
            }
        }

        items.sort_by(|a, b| b.collateral_units.cmp(&a.collateral_units));
        let count = items.len();

        let mut guard = self.published.write().map_err(|_| MarketError::Poisoned)?;
        *guard = Arc::new(items);
        Ok(count)
    }

    pub fn published(&self) -> MarketResult<Arc<Vec<EventDto>>> {
        let guard = self.published.read().map_err(|_| MarketError::Poisoned)?;
        Ok(Arc::clone(&guard))
    }

    /// One-based page of the published events matching `tag`.
    pub fn read_page(&self, tag: Tag, page: usize) -> MarketResult<EventPage> {
        let snapshot = self.published()?;
        let filtered: Vec<&EventDto> = snapshot.iter().filter(|e| e.tag.matches(tag)).collect();
        let pages = filtered.len().div_ceil(self.page_size);

        let items = if page == 0 || page > pages {
            Vec::new()
        } else {
            let start = (page - 1) * self.page_size;
            let end = (start + self.page_size).min(filtered.len());
            filtered[start..end].iter().map(|e| (*e).clone()).collect()
        };

        Ok(EventPage { items, pages })
    }

    pub fn spawn(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let snapshotter = self.clone();
        tokio::spawn(async move {
            info!("Starting snapshotter: interval={:?}", every);
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = snapshotter.refresh().await {
                            error!("Snapshot refresh failed: {}", e);
                        }
                    }
                }
            }
            info!("Snapshotter stopped");
        })
    }
}
