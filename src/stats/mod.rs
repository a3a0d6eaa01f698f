//! Statistics

pub mod metrics;

pub use metrics::{BroadcastStats, NegotiationCounters, ViewerStats};
