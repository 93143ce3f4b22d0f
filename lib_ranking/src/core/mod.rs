//! Service core: ranking engine, subscription hub and the hot/cold sync
//! worker.

pub mod engine;
pub mod hub;
pub mod sync;

pub use engine::LeaderboardService;
pub use hub::{Hub, HubHandle, WireMessage};
pub use sync::SyncWorker;
