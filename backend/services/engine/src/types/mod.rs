pub mod event_types;
pub mod request_types;
pub mod units;
