pub mod redis_manager;
pub mod types;

pub use redis_manager::{RedisManager, StreamEntry};
pub use types::{RedisRequest, RedisResponse};
