//! Outlet module - state store, command dispatch, change-feed driven re-sync
//!
//! - `store`: canonical outlet collection with refresh/merge and degraded mode
//! - `dispatcher`: toggle/cycle with per-outlet in-flight tracking
//! - `feed`: coalescing consumer of store change notifications

pub mod dispatcher;
pub mod feed;
pub mod store;

pub use dispatcher::CommandDispatcher;
pub use feed::ChangeFeedListener;
pub use store::{OutletStateStore, RefreshOutcome};
