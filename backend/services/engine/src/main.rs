use std::sync::Arc;

use dotenvy::dotenv;
use engine::chain::tonapi::TonApiClient;
use engine::chain::wallet_stream::WalletStreamSender;
use engine::services::notifier::RedisNotifier;
use engine::services::request_consumer::start_request_consumer;
use engine::{AppConfig, Market, MarketDeps};
use ledger_store::PgLedgerStore;
use log::{error, info};
use redis_client::RedisManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;

    let store = PgLedgerStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;
    info!("Connected to Postgres Database");

    let redis = RedisManager::new(&config.redis_url)?;
    redis.connect().await?;
    info!("Connected to Redis");

    let ledger = TonApiClient::new(config.tonapi_url.clone(), config.tonapi_token.clone())?;
    let notifier = Arc::new(RedisNotifier::new(redis.clone()));

    let market = Market::start(
        config.engine,
        MarketDeps {
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            sender: Arc::new(WalletStreamSender::new(redis.clone())),
            notifier: notifier.clone(),
            alerts: notifier,
        },
    )
    .await?;

    let consumer = start_request_consumer(market.clone(), redis.clone(), market.cancellation().child_token());
    market.track(consumer);
    info!("Market engine ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    market.shutdown().await;
    if let Err(e) = redis.quit().await {
        error!("Failed to close Redis connection: {}", e);
    }
    Ok(())
}
