//! Viewer side
//!
//! A viewer follows one broadcast link: it announces itself, answers the
//! broadcaster's offers and keeps the stream alive across source switches
//! and transient failures.

pub mod config;
pub mod state;
pub mod viewer;

pub use config::{ReconnectPolicy, ViewerConfig};
pub use state::{EndReason, ViewerState};
pub use viewer::{ViewerBuilder, ViewerConnection, ViewerEvent};
