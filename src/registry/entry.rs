//! Viewer record and lifecycle hook

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::types::{PeerSessionId, SessionId, ViewerId};

/// Liveness state of one viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerRecord {
    pub viewer_id: ViewerId,

    /// Session id the viewer announced with
    pub session_id: SessionId,

    /// When the viewer first joined
    pub joined_at: Instant,

    /// Last join or heartbeat
    pub last_seen_at: Instant,

    /// Current peer session, once one was created
    pub peer: Option<PeerSessionId>,
}

impl ViewerRecord {
    pub(super) fn new(viewer_id: ViewerId, session_id: SessionId, now: Instant) -> Self {
        Self {
            viewer_id,
            session_id,
            joined_at: now,
            last_seen_at: now,
            peer: None,
        }
    }

    /// Time since the viewer was last heard from
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_at)
    }

    /// Whether the record has outlived `timeout` at `now`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }
}

/// Peer side effects of registry changes
///
/// The registry decides when a viewer needs a connection or loses one; the
/// implementor owns the connections.
#[async_trait]
pub trait PeerLifecycle: Send + Sync {
    /// Negotiate with `viewer` after `delay`, replacing any pending attempt
    fn schedule_negotiation(&self, viewer: &ViewerId, delay: Duration);

    /// Cancel pending work for `viewer` and close its peer session
    async fn close_peer(&self, viewer: &ViewerId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let start = Instant::now();
        let record = ViewerRecord::new(ViewerId::new("v-1"), SessionId::new("s-1"), start);

        let timeout = Duration::from_secs(12);
        assert!(!record.is_stale(start + Duration::from_secs(12), timeout));
        assert!(record.is_stale(start + Duration::from_secs(13), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_saturates() {
        let start = Instant::now();
        let later = start + Duration::from_secs(5);
        let record = ViewerRecord::new(ViewerId::new("v-1"), SessionId::new("s-1"), later);

        assert_eq!(record.idle_for(start), Duration::ZERO);
    }
}
