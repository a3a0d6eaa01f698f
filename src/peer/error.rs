//! Negotiation error types

use super::state::{PeerPhase, PeerRole};
use super::transport::TransportError;

/// Failure of one offer/answer/ICE exchange
///
/// Always scoped to a single peer session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The operation is not allowed in the current phase or role
    #[error("cannot {operation} while {phase} as {role:?}")]
    InvalidTransition {
        operation: &'static str,
        phase: PeerPhase,
        role: PeerRole,
    },
    /// The transport rejected a description or failed to build one
    #[error("transport error during negotiation: {0}")]
    Transport(#[from] TransportError),
    /// A remote candidate could not be applied
    #[error("remote candidate rejected: {0}")]
    Candidate(TransportError),
}

impl NegotiationError {
    /// Whether the session is unusable after this error
    ///
    /// Out-of-order or duplicated signals and bad candidates leave the
    /// session intact.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NegotiationError::Transport(_))
    }
}
