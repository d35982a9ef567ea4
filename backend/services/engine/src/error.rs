use ledger_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::ChainError;

pub type MarketResult<T> = std::result::Result<T, MarketError>;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),
    #[error("deal {0} not found")]
    DealNotFound(Uuid),
    #[error("event {0} already exists")]
    AlreadyExists(Uuid),
    #[error("event {0} is closed")]
    ClosedEvent(Uuid),
    #[error("collateral overflow on event {0}")]
    Overflow(Uuid),
    #[error("runtime state poisoned")]
    Poisoned,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("deposit queue is closed")]
    QueueClosed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("notification failed: {0}")]
    Notify(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MarketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EventNotFound(id) => MarketError::EventNotFound(id),
            StoreError::DealNotFound(id) => MarketError::DealNotFound(id),
            StoreError::EventAlreadyExists(id) => MarketError::AlreadyExists(id),
            StoreError::ClosedEvent(id) => MarketError::ClosedEvent(id),
            other => MarketError::Store(other),
        }
    }
}

impl From<validator::ValidationErrors> for MarketError {
    fn from(err: validator::ValidationErrors) -> Self {
        MarketError::Validation(err.to_string())
    }
}

impl MarketError {
    /// Status reported on the response stream.
    pub fn status_code(&self) -> i32 {
        match self {
            MarketError::Validation(_) => 400,
            MarketError::EventNotFound(_) | MarketError::DealNotFound(_) => 404,
            MarketError::AlreadyExists(_) | MarketError::ClosedEvent(_) => 409,
            MarketError::Chain(ChainError::InvalidAddress(_)) => 400,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MarketError::EventNotFound(_) | MarketError::DealNotFound(_))
    }
}
