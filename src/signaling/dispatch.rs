//! Role-based message filtering
//!
//! Both roles see every message on their topic. These helpers keep the ones a
//! role acts on and drop the rest, including its own echoes.

use crate::peer::IceCandidate;
use crate::types::ViewerId;

use super::message::{Answer, Candidate, Offer, Presence, SignalingMessage, StreamInfo};

/// A message the broadcaster acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcasterInbound {
    Join(Presence),
    Heartbeat(Presence),
    Leave(Presence),
    Answer(Answer),
    Candidate(Candidate),
}

impl BroadcasterInbound {
    pub fn viewer_id(&self) -> &ViewerId {
        match self {
            Self::Join(p) | Self::Heartbeat(p) | Self::Leave(p) => &p.viewer_id,
            Self::Answer(a) => &a.viewer_id,
            Self::Candidate(c) => &c.viewer_id,
        }
    }
}

/// A message one viewer acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerInbound {
    StreamUpdate(StreamInfo),
    StopStream,
    Offer(Offer),
    Candidate(IceCandidate),
}

/// Keep viewer-originated messages
pub fn for_broadcaster(message: SignalingMessage) -> Option<BroadcasterInbound> {
    match message {
        SignalingMessage::ViewerJoin(p) => Some(BroadcasterInbound::Join(p)),
        SignalingMessage::ViewerHeartbeat(p) => Some(BroadcasterInbound::Heartbeat(p)),
        SignalingMessage::ViewerLeave(p) => Some(BroadcasterInbound::Leave(p)),
        SignalingMessage::SignalAnswer(a) => Some(BroadcasterInbound::Answer(a)),
        SignalingMessage::SignalIce(c) => Some(BroadcasterInbound::Candidate(c)),
        _ => None,
    }
}

/// Keep broadcasts and messages addressed to `viewer`
pub fn for_viewer(message: SignalingMessage, viewer: &ViewerId) -> Option<ViewerInbound> {
    match message {
        SignalingMessage::StreamUpdate(info) => Some(ViewerInbound::StreamUpdate(info)),
        SignalingMessage::StopStream(_) => Some(ViewerInbound::StopStream),
        SignalingMessage::SignalOffer(offer) if offer.viewer_id == *viewer => {
            Some(ViewerInbound::Offer(offer))
        }
        SignalingMessage::SignalIceAdmin(c) if c.viewer_id == *viewer => {
            Some(ViewerInbound::Candidate(c.candidate))
        }
        _ => None,
    }
}
