pub mod notifier;
pub mod payout;
pub mod reconciler;
pub mod request_consumer;
pub mod settlement;
