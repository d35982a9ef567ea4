use chrono::Utc;
use log::{error, info, warn};
use redis_client::{RedisManager, RedisRequest, RedisResponse, StreamEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::error::MarketError;
use crate::market::Market;
use crate::types::request_types::{
    CloseEventRequest, DepositConfirmation, DepositIntent, EventPageQuery, EventQuery, NewEvent,
    UserAssetsQuery,
};

pub const REQUESTS_STREAM: &str = "market_requests";
pub const RESPONSES_STREAM: &str = "market_responses";

pub fn start_request_consumer(market: Market, redis: RedisManager, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting request consumer for stream: {}", REQUESTS_STREAM);
        // Only requests issued after startup are served.
        let mut last_id = format!("{}-0", Utc::now().timestamp_millis());

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match redis.read_stream(REQUESTS_STREAM, &mut last_id, 10).await {
                Ok(entries) => {
                    for entry in entries {
                        process_entry(&market, &redis, entry).await;
                    }
                }
                Err(e) => {
                    error!("Error reading from stream {}: {}", REQUESTS_STREAM, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(Duration::from_millis(100)) => {}
            }
        }
        info!("Request consumer stopped");
    })
}

async fn process_entry(market: &Market, redis: &RedisManager, entry: StreamEntry) {
    let Some(request_id) = entry.field("request_id").map(str::to_owned) else {
        warn!("Dropping stream entry {} without request_id", entry.id);
        return;
    };

    let response = match entry.field("data") {
        None => RedisResponse::error(400, "Missing data in message"),
        Some(data) => match serde_json::from_str::<RedisRequest<Value>>(data) {
            Ok(request) => {
                info!("Processing request: action={}, request_id={}", request.action, request_id);
                handle_request(market, request).await
            }
            Err(e) => RedisResponse::error(400, format!("Failed to parse request: {}", e)),
        },
    };

    if let Err(e) = send_response(redis, &request_id, &response).await {
        error!("Failed to answer request {}: {}", request_id, e);
    }
}

async fn send_response(
    redis: &RedisManager,
    request_id: &str,
    response: &RedisResponse<Value>,
) -> Result<(), String> {
    let response_json = serde_json::to_string(response)
        .map_err(|e| format!("Failed to serialize response: {}", e))?;

    redis
        .stream_add(RESPONSES_STREAM, &[("request_id", request_id), ("data", &response_json)])
        .await
        .map_err(|e| format!("Failed to send response to stream: {}", e))
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, MarketError> {
    serde_json::from_value(data).map_err(|e| MarketError::Validation(format!("Invalid request data: {}", e)))
}

fn respond<T: Serialize>(result: Result<T, MarketError>, message: &str) -> RedisResponse<Value> {
    match result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| MarketError::Validation(format!("Failed to serialize: {}", e)))
    }) {
        Ok(data) => RedisResponse::ok(message, data),
        Err(e) => {
            if e.status_code() >= 500 {
                error!("{} failed: {}", message, e);
            }
            RedisResponse::error(e.status_code(), e.to_string())
        }
    }
}

pub async fn handle_request(market: &Market, request: RedisRequest<Value>) -> RedisResponse<Value> {
    let data = request.data;
    match request.action.as_str() {
        "get-events" => {
            let result = parse::<EventPageQuery>(data).and_then(|query| market.events_page(&query));
            respond(result, "Events retrieved successfully")
        }
        "get-event" => {
            let result = match parse::<EventQuery>(data) {
                Ok(query) => market.event(query.event_id).await,
                Err(e) => Err(e),
            };
            respond(result, "Event retrieved successfully")
        }
        "get-user-assets" => {
            let result = match parse::<UserAssetsQuery>(data) {
                Ok(query) => market.user_assets(&query).await,
                Err(e) => Err(e),
            };
            respond(result, "User assets retrieved successfully")
        }
        "create-event" => {
            let result = match parse::<NewEvent>(data) {
                Ok(new_event) => market.create_event(new_event).await,
                Err(e) => Err(e),
            };
            respond(result, "Event created successfully")
        }
        "create-deposit" => {
            let result = match parse::<DepositIntent>(data) {
                Ok(intent) => market.create_deposit(intent).await,
                Err(e) => Err(e),
            };
            respond(result, "Deposit created successfully")
        }
        "confirm-deposit" => {
            let result = match parse::<DepositConfirmation>(data) {
                Ok(confirmation) => market.confirm_deposit(confirmation).await,
                Err(e) => Err(e),
            };
            respond(result.map(|_| Value::Null), "Deposit confirmation registered")
        }
        "close-event" => match parse::<CloseEventRequest>(data) {
            Ok(close) => {
                let event_id = close.event_id;
                let closer = market.clone();
                let task = tokio::spawn(async move {
                    match closer.close_event(close).await {
                        Ok(report) => {
                            info!(
                                "Close request finished: event_id={}, payouts={}",
                                report.event_id,
                                report.payouts.len()
                            );
                            match report.payout_task.await {
                                Ok(summary) => info!(
                                    "Payouts finished: event_id={}, confirmed={}, abandoned={}, unresolved={}",
                                    event_id, summary.confirmed, summary.abandoned, summary.unresolved
                                ),
                                Err(e) => error!("Payout task for event {} ended abnormally: {}", event_id, e),
                            }
                        }
                        Err(e) => error!("Close request for event {} failed: {}", event_id, e),
                    }
                });
                market.track(task);
                RedisResponse::new(202, true, "Event close scheduled", json!({ "eventId": event_id }))
            }
            Err(e) => RedisResponse::error(e.status_code(), e.to_string()),
        },
        _ => {
            warn!("Unknown action: {}", request.action);
            RedisResponse::error(400, format!("Unknown action: {}", request.action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::market::MarketDeps;
    use crate::test_utils::{MockLedgerClient, RecordingSender, RecordingSink};
    use ledger_store::memory::MemoryLedgerStore;
    use ledger_store::LedgerStore;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn market() -> Market {
        market_with(Arc::new(MemoryLedgerStore::new())).await
    }

    async fn market_with(store: Arc<MemoryLedgerStore>) -> Market {
        let sink = Arc::new(RecordingSink::new());
        Market::start(
            EngineConfig::new("EQbank"),
            MarketDeps {
                store,
                ledger: Arc::new(MockLedgerClient::new()),
                sender: Arc::new(RecordingSender::new()),
                notifier: sink.clone(),
                alerts: sink,
            },
        )
        .await
        .unwrap()
    }

    fn request(action: &str, data: Value) -> RedisRequest<Value> {
        RedisRequest::new(action, data)
    }

    #[tokio::test(start_paused = true)]
    async fn routes_actions_and_maps_status_codes() {
        let market = market().await;

        let created = handle_request(
            &market,
            request(
                "create-event",
                json!({
                    "tag": 3,
                    "title": "Oscars",
                    "bets": [
                        { "token": "TokenA", "title": "Film A" },
                        { "token": "TokenB", "title": "Film B" }
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(created.status_code, 200);
        let event_id = created.data["id"].as_str().unwrap().to_string();

        let deposit = handle_request(
            &market,
            request(
                "create-deposit",
                json!({ "address": "0:carol", "eventId": event_id, "token": "TokenB", "collateral": 2.0 }),
            ),
        )
        .await;
        assert!(deposit.success);
        assert_eq!(deposit.data["amount"], "2000000000");
        assert_eq!(deposit.data["address"], "EQbank");

        let missing = handle_request(&market, request("get-event", json!({ "eventId": Uuid::new_v4() }))).await;
        assert_eq!(missing.status_code, 404);

        let invalid = handle_request(&market, request("create-event", json!({ "tag": 1, "title": "" , "bets": [] }))).await;
        assert_eq!(invalid.status_code, 400);
        assert!(!invalid.success);

        let malformed = handle_request(&market, request("get-event", json!({ "eventId": "nope" }))).await;
        assert_eq!(malformed.status_code, 400);

        let unknown = handle_request(&market, request("place-order", Value::Null)).await;
        assert_eq!(unknown.status_code, 400);

        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_unknown_deposit_is_not_found() {
        let market = market().await;
        let response = handle_request(
            &market,
            request("confirm-deposit", json!({ "depositID": Uuid::new_v4(), "depositStatus": 0 })),
        )
        .await;
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn close_event_is_accepted_asynchronously() {
        let market = market().await;
        let response = handle_request(
            &market,
            request("close-event", json!({ "eventId": Uuid::new_v4(), "winningToken": "TokenA" })),
        )
        .await;
        assert_eq!(response.status_code, 202);
        assert!(response.success);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_scheduled_close() {
        let store = Arc::new(MemoryLedgerStore::new());
        let market = market_with(store.clone()).await;
        let created = handle_request(
            &market,
            request(
                "create-event",
                json!({
                    "tag": 2,
                    "title": "Rate cut",
                    "bets": [
                        { "token": "TokenA", "title": "Yes" },
                        { "token": "TokenB", "title": "No" }
                    ]
                }),
            ),
        )
        .await;
        let event_id: Uuid = created.data["id"].as_str().unwrap().parse().unwrap();

        let response = handle_request(
            &market,
            request("close-event", json!({ "eventId": event_id, "winningToken": "TokenB" })),
        )
        .await;
        assert_eq!(response.status_code, 202);

        market.shutdown().await;
        // Cancelled during the grace period, so the event is closed but not settled.
        let event = store.get_event_copy(event_id).await.unwrap();
        assert!(!event.active);
    }
}
