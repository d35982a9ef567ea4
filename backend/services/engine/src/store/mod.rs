pub mod runtime;
pub mod snapshot;

pub use runtime::{BetState, EventState, RuntimeLedger};
pub use snapshot::Snapshotter;
