//! Real-time transport facility boundary
//!
//! The concrete ICE/DTLS/SRTP stack is external. It is reached through two
//! traits: [`RtcTransport`] creates connections, [`RtcPeer`] is one of them.
//! Asynchronous happenings on a connection (gathered candidates, state
//! changes, inbound media) are delivered as [`PeerEvent`]s on the channel
//! handed to [`RtcTransport::create_peer`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::{MediaChunk, MediaTrack};

/// An SDP blob, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sdp(String);

impl Sdp {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Whether this state means media has stopped flowing
    pub fn is_failure(&self) -> bool {
        matches!(self, TransportState::Disconnected | TransportState::Failed)
    }
}

/// Asynchronous notifications from one connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered and should be sent to the counterparty
    LocalCandidate(IceCandidate),
    /// Connection state changed
    StateChanged(TransportState),
    /// The counterparty started sending a track
    TrackReceived(MediaTrack),
    /// A piece of inbound media
    Media(MediaChunk),
}

/// Sender half handed to the transport for one connection
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Receiver half owned by whoever drives the connection
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Transport level failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to create connection: {0}")]
    Create(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),
    #[error("failed to attach track {0}")]
    AttachTrack(String),
    #[error("connection is closed")]
    Closed,
}

/// Factory for connections
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Create a connection whose events are delivered on `events`
    async fn create_peer(&self, events: PeerEventSender) -> Result<Box<dyn RtcPeer>, TransportError>;
}

/// One negotiated transport connection
#[async_trait]
pub trait RtcPeer: Send + Sync {
    /// Attach an outbound track before the offer is produced
    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    /// Produce an offer and install it as the local description
    async fn create_offer(&self) -> Result<Sdp, TransportError>;

    /// Install a remote offer, then produce and install the answer
    async fn accept_offer(&self, offer: &Sdp) -> Result<Sdp, TransportError>;

    /// Install the remote answer to a previously created offer
    async fn apply_answer(&self, answer: &Sdp) -> Result<(), TransportError>;

    /// Feed a remote candidate; the remote description must already be set
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Release every native resource now. Must be idempotent.
    fn close(&self);
}
