//! The broadcast hub: lifecycle hooks plus fan-out of frames between peers.

mod dispatcher;
pub mod lifecycle;

pub use dispatcher::{DeliveryResult, DispatcherStats, DispatcherStatsSnapshot, RelayDispatcher};
pub use lifecycle::{evict, on_close, on_open, CloseReason};
