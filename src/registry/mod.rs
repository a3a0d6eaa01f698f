//! Viewer registry
//!
//! The broadcaster's view of who is watching. Viewers announce themselves
//! with joins and keep their record alive with heartbeats; anything silent
//! for longer than the liveness window is pruned.
//!
//! ```text
//!   VIEWER_JOIN ──► join() ──► schedule_negotiation(jitter)
//!   VIEWER_HEARTBEAT ──► heartbeat()
//!   VIEWER_LEAVE ──► leave() ──┐
//!   prune task (every 5s) ─────┼──► close_peer()
//!   session end ──► clear() ───┘
//! ```

pub mod config;
pub mod entry;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{PeerLifecycle, ViewerRecord};
pub use store::{JoinOutcome, ViewerRegistry};
