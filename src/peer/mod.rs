//! Peer sessions
//!
//! A peer session is one negotiated transport connection carrying media
//! between the broadcaster and one viewer. The broadcaster holds one per
//! registered viewer; a viewer holds exactly one.
//!
//! ```text
//!   Idle ──offer/answer──► Negotiating ──transport up──► Connected
//!     │                        │                            │
//!     └────────────────────────┴───────── close ────────────┴──► Closed
//! ```

pub mod error;
pub mod session;
pub mod state;
pub mod transport;

pub use error::NegotiationError;
pub use session::{CandidateOutcome, PeerSession};
pub use state::{PeerPhase, PeerRole};
pub use transport::{
    IceCandidate, PeerEvent, PeerEventReceiver, PeerEventSender, RtcPeer, RtcTransport, Sdp,
    TransportError, TransportState,
};
