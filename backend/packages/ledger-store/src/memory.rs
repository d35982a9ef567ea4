//! In-process `LedgerStore` used by tests and local runs without Postgres.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Asset, Deal, DealStatus, Event, Token};
use crate::store::LedgerStore;

type AssetKey = (String, Uuid, Token);

#[derive(Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    event_order: Vec<Uuid>,
    deals: HashMap<Uuid, Deal>,
    user_deals: Vec<(String, Uuid)>,
    assets: BTreeMap<AssetKey, Asset>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn user_deal_ids(&self, address: &str) -> Vec<Uuid> {
        self.lock()
            .user_deals
            .iter()
            .filter(|(addr, _)| addr == address)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Inserts or overwrites an asset directly, bypassing deal promotion.
    pub fn put_asset(&self, asset: Asset) {
        let key = (asset.user_raw_address.clone(), asset.event_id, asset.token);
        self.lock().assets.insert(key, asset);
    }

    fn open_transition(
        state: &mut MemoryState,
        id: Uuid,
        to: DealStatus,
    ) -> StoreResult<Deal> {
        let deal = state.deals.get_mut(&id).ok_or(StoreError::DealNotFound(id))?;
        if deal.status.is_final() {
            return Err(StoreError::DealAlreadyProcessed {
                id,
                status: deal.status,
            });
        }
        deal.status = to;
        Ok(deal.clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        event.check_outcomes()?;
        let mut state = self.lock();
        if state.events.contains_key(&event.id) {
            return Err(StoreError::EventAlreadyExists(event.id));
        }
        state.events.insert(event.id, event.clone());
        state.event_order.push(event.id);
        Ok(())
    }

    async fn get_event_copy(&self, id: Uuid) -> StoreResult<Event> {
        self.lock()
            .events
            .get(&id)
            .cloned()
            .ok_or(StoreError::EventNotFound(id))
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let state = self.lock();
        Ok(state
            .event_order
            .iter()
            .filter_map(|id| state.events.get(id).cloned())
            .collect())
    }

    async fn deactivate_event(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock();
        let event = state.events.get_mut(&id).ok_or(StoreError::EventNotFound(id))?;
        event.active = false;
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock();
        state.events.remove(&id).ok_or(StoreError::EventNotFound(id))?;
        state.event_order.retain(|e| *e != id);
        Ok(())
    }

    async fn save_deal_unchecked(&self, deal: &Deal) -> StoreResult<()> {
        let mut state = self.lock();
        match state.events.get(&deal.event_id) {
            None => return Err(StoreError::EventNotFound(deal.event_id)),
            Some(event) if !event.active => return Err(StoreError::ClosedEvent(deal.event_id)),
            Some(_) => {}
        }
        if state.deals.contains_key(&deal.id) {
            return Err(StoreError::DealAlreadyExists(deal.id));
        }
        let mut stored = deal.clone();
        stored.status = DealStatus::Unchecked;
        stored.attempts = 0;
        state.deals.insert(deal.id, stored);
        state.user_deals.push((deal.user_raw_addr.clone(), deal.id));
        Ok(())
    }

    async fn get_deal(&self, id: Uuid) -> StoreResult<Deal> {
        self.lock()
            .deals
            .get(&id)
            .cloned()
            .ok_or(StoreError::DealNotFound(id))
    }

    async fn mark_pending(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.lock();
        let deal = state.deals.get_mut(&id).ok_or(StoreError::DealNotFound(id))?;
        if deal.status != DealStatus::Unchecked {
            return Ok(false);
        }
        deal.status = DealStatus::Pending;
        Ok(true)
    }

    async fn promote_deal(&self, id: Uuid) -> StoreResult<Deal> {
        let mut state = self.lock();
        let current = state.deals.get(&id).cloned().ok_or(StoreError::DealNotFound(id))?;
        if current.status.is_final() {
            return Err(StoreError::DealAlreadyProcessed {
                id,
                status: current.status,
            });
        }

        let key = (current.user_raw_addr.clone(), current.event_id, current.token);
        let asset = match state.assets.get(&key) {
            None => Asset::opened_by(&current),
            Some(existing) => {
                let mut asset = existing.clone();
                asset.accumulate(&current)?;
                asset
            }
        };
        state.assets.insert(key, asset);
        Self::open_transition(&mut state, id, DealStatus::Verified)
    }

    async fn decline_deal(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock();
        Self::open_transition(&mut state, id, DealStatus::Declined).map(|_| ())
    }

    async fn delete_deal(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock();
        let deal = state.deals.get(&id).ok_or(StoreError::DealNotFound(id))?;
        if deal.status == DealStatus::Verified {
            return Err(StoreError::DealAlreadyProcessed {
                id,
                status: deal.status,
            });
        }
        state.deals.remove(&id);
        state.user_deals.retain(|(_, deal_id)| *deal_id != id);
        Ok(())
    }

    async fn increment_attempt(&self, id: Uuid) -> StoreResult<i32> {
        let mut state = self.lock();
        let deal = state.deals.get_mut(&id).ok_or(StoreError::DealNotFound(id))?;
        deal.attempts += 1;
        Ok(deal.attempts)
    }

    async fn pending_deals(&self) -> StoreResult<Vec<Deal>> {
        let state = self.lock();
        let mut deals: Vec<Deal> = state
            .deals
            .values()
            .filter(|d| d.status == DealStatus::Pending)
            .cloned()
            .collect();
        deals.sort_by_key(|d| d.created_at);
        Ok(deals)
    }

    async fn get_user_assets(&self, address: &str) -> StoreResult<Vec<Asset>> {
        Ok(self
            .lock()
            .assets
            .values()
            .filter(|a| a.user_raw_address == address)
            .cloned()
            .collect())
    }

    async fn get_event_assets(&self, event_id: Uuid) -> StoreResult<Vec<Asset>> {
        Ok(self
            .lock()
            .assets
            .values()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn delete_event_assets(&self, event_id: Uuid) -> StoreResult<u64> {
        let mut state = self.lock();
        let before = state.assets.len();
        state.assets.retain(|_, a| a.event_id != event_id);
        Ok((before - state.assets.len()) as u64)
    }
}
