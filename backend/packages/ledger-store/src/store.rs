use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Asset, Deal, Event};

/// Durable record of events, deals and assets.
///
/// Every write is a single all-or-nothing transaction. Reads return owned
/// copies; nothing handed out aliases store state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn save_event(&self, event: &Event) -> StoreResult<()>;

    async fn get_event_copy(&self, id: Uuid) -> StoreResult<Event>;

    async fn list_events(&self) -> StoreResult<Vec<Event>>;

    /// Persists the closed flag; later deal creation for the event fails.
    async fn deactivate_event(&self, id: Uuid) -> StoreResult<()>;

    async fn delete_event(&self, id: Uuid) -> StoreResult<()>;

    /// Inserts the deal as `Unchecked` together with its user rows.
    /// Fails with `ClosedEvent` once the event has been deactivated.
    async fn save_deal_unchecked(&self, deal: &Deal) -> StoreResult<()>;

    async fn get_deal(&self, id: Uuid) -> StoreResult<Deal>;

    /// `Unchecked -> Pending`. Returns false when the deal was not unchecked.
    async fn mark_pending(&self, id: Uuid) -> StoreResult<bool>;

    /// Flips the deal to `Verified` and folds its amount into the owner's
    /// asset, in one transaction. A deal that already left
    /// `Unchecked`/`Pending` yields `DealAlreadyProcessed` and changes nothing.
    async fn promote_deal(&self, id: Uuid) -> StoreResult<Deal>;

    async fn decline_deal(&self, id: Uuid) -> StoreResult<()>;

    /// Removes a deal that was never verified.
    async fn delete_deal(&self, id: Uuid) -> StoreResult<()>;

    async fn increment_attempt(&self, id: Uuid) -> StoreResult<i32>;

    /// Deals the user has confirmed that are still waiting for the chain.
    /// `Unchecked` intents stay open until the user confirms them.
    async fn pending_deals(&self) -> StoreResult<Vec<Deal>>;

    async fn get_user_assets(&self, address: &str) -> StoreResult<Vec<Asset>>;

    async fn get_event_assets(&self, event_id: Uuid) -> StoreResult<Vec<Asset>>;

    async fn delete_event_assets(&self, event_id: Uuid) -> StoreResult<u64>;
}
