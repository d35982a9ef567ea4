pub mod poll;
pub mod tonapi;
pub mod wallet_stream;

use std::fmt;

use async_trait::async_trait;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("ledger unavailable: {0}")]
    ExternalUnavailable(String),
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("chain call cancelled")]
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoError {
    #[error("transaction {0} has no {1} message")]
    MissingMessage(String, Direction),
    #[error("transaction {hash} carries a non-text body ({op})")]
    NotText { hash: String, op: String },
    #[error("transaction {0} body could not be decoded")]
    Malformed(String),
}

/// Canonical account identifier (`workchain:hex`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => f.write_str("incoming"),
            Direction::Outgoing => f.write_str("outgoing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Empty,
    Comment(String),
    Binary { op_name: String },
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMessage {
    pub direction: Direction,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub messages: Vec<ChainMessage>,
}

impl ChainTransaction {
    /// Text comment of the first message in `direction`. An empty body reads
    /// as no memo; anything that is not a text comment is an error.
    pub fn memo(&self, direction: Direction) -> Result<Option<&str>, MemoError> {
        let message = self
            .messages
            .iter()
            .find(|m| m.direction == direction)
            .ok_or_else(|| MemoError::MissingMessage(self.hash.clone(), direction))?;

        match &message.body {
            MessageBody::Empty => Ok(None),
            MessageBody::Comment(text) => Ok(Some(text.as_str())),
            MessageBody::Binary { op_name } => Err(MemoError::NotText {
                hash: self.hash.clone(),
                op: op_name.clone(),
            }),
            MessageBody::Malformed => Err(MemoError::Malformed(self.hash.clone())),
        }
    }
}

/// Hash of the first transaction whose `direction` memo equals `expected`.
/// Undecodable transactions are logged and skipped.
pub fn find_memo<'a>(
    transactions: &'a [ChainTransaction],
    direction: Direction,
    expected: &str,
) -> Option<&'a str> {
    for tx in transactions {
        match tx.memo(direction) {
            Ok(Some(memo)) if memo == expected => return Some(tx.hash.as_str()),
            Ok(_) => {}
            Err(e) => warn!("Skipping transaction while looking for {:?}: {}", expected, e),
        }
    }
    None
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn parse_address(&self, raw: &str) -> Result<AccountId, ChainError>;

    /// Most recent transactions first.
    async fn list_recent_transactions(
        &self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<ChainTransaction>, ChainError>;
}

#[async_trait]
pub trait TransferSender: Send + Sync {
    async fn send(&self, destination: &str, amount: u64, memo: &str) -> Result<(), ChainError>;
}
