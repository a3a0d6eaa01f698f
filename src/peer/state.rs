//! Peer session phases

use std::fmt;

/// Lifecycle phase of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerPhase {
    /// Created, nothing exchanged yet
    Idle,
    /// Offer or answer in flight
    Negotiating,
    /// Transport reported connected
    Connected,
    /// Closed; terminal
    Closed,
}

impl fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerPhase::Idle => "idle",
            PeerPhase::Negotiating => "negotiating",
            PeerPhase::Connected => "connected",
            PeerPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which side of the offer/answer exchange a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Broadcaster side: attaches tracks and sends the offer
    Offerer,
    /// Viewer side: receives the offer and answers
    Answerer,
}
