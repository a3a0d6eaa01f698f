//! Statistics for broadcasts and viewer connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::SessionId;

/// Running negotiation counters kept by the orchestrator
#[derive(Debug, Default)]
pub struct NegotiationCounters {
    offers_sent: AtomicU64,
    answers_applied: AtomicU64,
    negotiation_failures: AtomicU64,
    candidates_applied: AtomicU64,
    candidates_dropped: AtomicU64,
}

impl NegotiationCounters {
    pub fn offer_sent(&self) {
        self.offers_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn answer_applied(&self) {
        self.answers_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn negotiation_failed(&self) {
        self.negotiation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn candidate_applied(&self) {
        self.candidates_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn candidate_dropped(&self) {
        self.candidates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into a stats snapshot
    pub fn fill(&self, stats: &mut BroadcastStats) {
        stats.offers_sent = self.offers_sent.load(Ordering::Relaxed);
        stats.answers_applied = self.answers_applied.load(Ordering::Relaxed);
        stats.negotiation_failures = self.negotiation_failures.load(Ordering::Relaxed);
        stats.candidates_applied = self.candidates_applied.load(Ordering::Relaxed);
        stats.candidates_dropped = self.candidates_dropped.load(Ordering::Relaxed);
    }
}

/// Broadcaster-wide snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Current session, if live
    pub session_id: Option<SessionId>,
    /// Registered viewers
    pub viewers: usize,
    /// Peer sessions waiting for an answer or transport
    pub peers_negotiating: usize,
    /// Peer sessions carrying media
    pub peers_connected: usize,
    pub offers_sent: u64,
    pub answers_applied: u64,
    pub negotiation_failures: u64,
    pub candidates_applied: u64,
    /// Candidates for unknown or closed sessions
    pub candidates_dropped: u64,
    /// Viewers removed for missing heartbeats
    pub viewers_pruned: u64,
}

impl BroadcastStats {
    /// Registered viewers without a connected peer session
    pub fn viewers_pending(&self) -> usize {
        self.viewers.saturating_sub(self.peers_connected)
    }
}

/// Per-viewer connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerStats {
    /// Announcements sent while connecting
    pub announcements: u64,
    /// Offers answered
    pub offers_answered: u64,
    /// Reconnect attempts since the connection was created
    pub reconnect_attempts: u64,
    /// Heartbeats sent while live
    pub heartbeats: u64,
    /// Media chunks received
    pub chunks_received: u64,
    /// Time spent live, summed over every live period
    pub live_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_fill_snapshot() {
        let counters = NegotiationCounters::default();
        counters.offer_sent();
        counters.offer_sent();
        counters.answer_applied();
        counters.candidate_dropped();

        let mut stats = BroadcastStats::default();
        counters.fill(&mut stats);

        assert_eq!(stats.offers_sent, 2);
        assert_eq!(stats.answers_applied, 1);
        assert_eq!(stats.negotiation_failures, 0);
        assert_eq!(stats.candidates_dropped, 1);
    }

    #[test]
    fn test_viewers_pending() {
        let stats = BroadcastStats {
            viewers: 3,
            peers_connected: 1,
            ..Default::default()
        };
        assert_eq!(stats.viewers_pending(), 2);

        let stats = BroadcastStats {
            viewers: 1,
            peers_connected: 2,
            ..Default::default()
        };
        assert_eq!(stats.viewers_pending(), 0);
    }
}
