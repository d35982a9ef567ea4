pub mod error;
pub mod models;
pub mod postgres;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use models::{Asset, Bet, Deal, DealStatus, Event, Tag, Token};
pub use postgres::PgLedgerStore;
pub use store::LedgerStore;
