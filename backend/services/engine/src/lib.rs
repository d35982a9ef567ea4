pub mod chain;
pub mod config;
pub mod error;
pub mod market;
pub mod services;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use config::{AppConfig, EngineConfig};
pub use error::{MarketError, MarketResult};
pub use market::{Market, MarketDeps};
