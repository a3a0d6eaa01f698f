//! Viewer connection states

use std::fmt;

/// Why a viewer connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The broadcaster stopped the stream
    StreamStopped,
    /// Every reconnect attempt failed
    ReconnectBudgetExhausted,
    /// The viewer left
    Left,
    /// The signaling medium shut down
    SignalingClosed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::StreamStopped => write!(f, "stream stopped"),
            EndReason::ReconnectBudgetExhausted => write!(f, "could not reconnect"),
            EndReason::Left => write!(f, "left"),
            EndReason::SignalingClosed => write!(f, "signaling closed"),
        }
    }
}

/// Viewer connection state
///
/// ```text
///   Connecting ──first track──► Live
///       ▲                         │ transport failure
///       │ backoff elapsed         ▼
///       └──────────────── Reconnecting ──budget spent──► Ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// Announcing and waiting for an offer or media
    Connecting,
    /// Receiving media
    Live,
    /// Waiting out the backoff before attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Terminal
    Ended(EndReason),
}

impl ViewerState {
    pub fn is_live(&self) -> bool {
        matches!(self, ViewerState::Live)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, ViewerState::Ended(_))
    }
}

impl fmt::Display for ViewerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerState::Connecting => write!(f, "connecting"),
            ViewerState::Live => write!(f, "live"),
            ViewerState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ViewerState::Ended(reason) => write!(f, "ended: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ViewerState::Ended(EndReason::ReconnectBudgetExhausted).to_string(),
            "ended: could not reconnect"
        );
        assert_eq!(
            ViewerState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
        assert!(ViewerState::Ended(EndReason::Left).is_ended());
        assert!(!ViewerState::Connecting.is_live());
    }
}
