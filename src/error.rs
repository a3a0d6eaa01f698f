//! Error types

use crate::media::{CaptureError, DvrError};
use crate::peer::{NegotiationError, TransportError};
use crate::signaling::SignalingError;

/// Result type for castlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The capture facility could not provide the requested source
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] CaptureError),

    /// The signaling transport cannot be reached
    #[error("signaling unreachable: {0}")]
    SignalingUnreachable(#[from] SignalingError),

    /// A negotiation with one viewer failed
    #[error("negotiation failed: {0}")]
    NegotiationFailed(#[from] NegotiationError),

    /// A viewer gave up reconnecting
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectBudgetExhausted { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("replay error: {0}")]
    Dvr(#[from] DvrError),

    /// An operation needs a live session and there is none
    #[error("no active session")]
    NoActiveSession,
}

impl Error {
    /// Whether this error is confined to a single viewer
    pub fn is_per_viewer(&self) -> bool {
        matches!(self, Error::NegotiationFailed(_) | Error::Transport(_))
    }
}
