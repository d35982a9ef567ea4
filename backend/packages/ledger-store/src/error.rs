use thiserror::Error;
use uuid::Uuid;

use crate::models::DealStatus;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),
    #[error("deal {0} not found")]
    DealNotFound(Uuid),
    #[error("event {0} already exists")]
    EventAlreadyExists(Uuid),
    #[error("deal {0} already exists")]
    DealAlreadyExists(Uuid),
    #[error("event {0} is closed")]
    ClosedEvent(Uuid),
    #[error("deal {id} already processed with status {status:?}")]
    DealAlreadyProcessed { id: Uuid, status: DealStatus },
    #[error("event {0} must define exactly one bet per token")]
    InvalidOutcomes(Uuid),
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
    #[error("amount overflow while accumulating asset for deal {0}")]
    AmountOverflow(Uuid),
    #[error("invalid token: {0:?}")]
    InvalidToken(String),
    #[error("invalid tag code: {0}")]
    InvalidTag(i16),
    #[error("invalid deal status code: {0}")]
    InvalidDealStatus(i16),
    #[error("{op} failed: concurrent update, retry")]
    ConcurrentUpdate { op: &'static str },
    #[error("{op} failed: transaction failed: {source}")]
    TransactionFailed {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub(crate) fn transaction(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::TransactionFailed { op, source }
    }

    /// Asset writes that lost a race surface as `ConcurrentUpdate`.
    pub(crate) fn asset_write(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| {
            if is_unique_violation(&source) {
                StoreError::ConcurrentUpdate { op }
            } else {
                StoreError::TransactionFailed { op, source }
            }
        }
    }

    /// Failures a caller can retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrentUpdate { .. } | StoreError::TransactionFailed { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::EventNotFound(_) | StoreError::DealNotFound(_))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
