use async_trait::async_trait;
use log::{error, info};
use redis_client::RedisManager;
use serde::Serialize;

use crate::chain::{ChainError, TransferSender};

pub const WALLET_TRANSFERS_STREAM: &str = "wallet_transfers";

/// Transfer request handed to the external signing wallet.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOrder<'a> {
    pub destination: &'a str,
    /// Nanotons, as a decimal string.
    pub amount: String,
    pub comment: &'a str,
    pub bounceable: bool,
}

/// `TransferSender` that appends signed-transfer requests to a Redis stream.
#[derive(Clone)]
pub struct WalletStreamSender {
    redis: RedisManager,
    stream: String,
}

impl WalletStreamSender {
    pub fn new(redis: RedisManager) -> Self {
        Self {
            redis,
            stream: WALLET_TRANSFERS_STREAM.to_string(),
        }
    }
}

#[async_trait]
impl TransferSender for WalletStreamSender {
    async fn send(&self, destination: &str, amount: u64, memo: &str) -> Result<(), ChainError> {
        let order = TransferOrder {
            destination,
            amount: amount.to_string(),
            comment: memo,
            bounceable: true,
        };
        let payload = serde_json::to_string(&order)
            .map_err(|e| ChainError::ExternalUnavailable(format!("failed to serialize transfer: {}", e)))?;

        match self.redis.stream_add(&self.stream, &[("data", &payload)]).await {
            Ok(()) => {
                info!("Transfer queued: destination={}, amount={}, memo={}", destination, amount, memo);
                Ok(())
            }
            Err(e) => {
                error!("Failed to queue transfer to {}: {}", destination, e);
                Err(ChainError::ExternalUnavailable(e.to_string()))
            }
        }
    }
}
