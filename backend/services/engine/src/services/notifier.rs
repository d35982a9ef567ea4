use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use redis_client::RedisManager;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::types::event_types::EventDto;

pub const EVENTS_CHANNEL: &str = "market:events";
pub const ALERTS_STREAM: &str = "market:alerts";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &EventDto) -> MarketResult<()>;
}

/// Conditions an operator has to act on by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    DepositAbandoned {
        deal_id: Uuid,
        event_id: Uuid,
        address: String,
        amount: u64,
        attempts: i32,
    },
    PayoutAbandoned {
        event_id: Uuid,
        address: String,
        amount: u64,
        attempts: u32,
    },
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert) -> MarketResult<()>;
}

/// Publishes event updates on pub/sub and alerts on a dead-letter style stream.
#[derive(Clone)]
pub struct RedisNotifier {
    redis: RedisManager,
}

impl RedisNotifier {
    pub fn new(redis: RedisManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl NotificationSink for RedisNotifier {
    async fn publish(&self, event: &EventDto) -> MarketResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| MarketError::Notify(format!("failed to serialize event: {}", e)))?;
        self.redis
            .publish(EVENTS_CHANNEL, &payload)
            .await
            .map_err(|e| MarketError::Notify(e.to_string()))
    }
}

#[async_trait]
impl AlertSink for RedisNotifier {
    async fn raise(&self, alert: Alert) -> MarketResult<()> {
        warn!("Raising operator alert: {:?}", alert);
        let payload = serde_json::json!({
            "alert": alert,
            "raised_at": Utc::now().to_rfc3339(),
        })
        .to_string();

        match self.redis.stream_add(ALERTS_STREAM, &[("data", &payload)]).await {
            Ok(()) => {
                info!("Alert recorded on {}", ALERTS_STREAM);
                Ok(())
            }
            Err(e) => {
                error!("Failed to record alert: {}", e);
                Err(MarketError::Notify(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_serialize_with_kind_tag() {
        let alert = Alert::PayoutAbandoned {
            event_id: Uuid::nil(),
            address: "0:abc".into(),
            amount: 42,
            attempts: 3,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "payout_abandoned");
        assert_eq!(json["amount"], 42);
    }
}
