//! Signaling message schema
//!
//! Every message travels as an envelope `{ "type": ..., "payload": ... }`.
//! Payload field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::media::{Resolution, SourceMode};
use crate::peer::{IceCandidate, Sdp};
use crate::types::{SessionId, ViewerId};

use super::channel::SignalingError;

/// Which side a message is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by a viewer, handled by the broadcaster
    ToBroadcaster,
    /// Sent by the broadcaster, handled by one viewer or all of them
    ToViewers,
}

/// Viewer presence: join, heartbeat, leave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub viewer_id: ViewerId,
    pub session_id: SessionId,
}

/// Current broadcast description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub session_id: SessionId,
    pub title: String,
    pub mode: SourceMode,
    pub resolution: Resolution,
}

/// Terminal stop broadcast; carries nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopStream {}

/// Broadcaster offer to one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub viewer_id: ViewerId,
    pub session_id: SessionId,
    pub sdp_offer: Sdp,
    pub mode: SourceMode,
}

/// Viewer answer to an offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub viewer_id: ViewerId,
    pub sdp_answer: Sdp,
}

/// Trickled ICE candidate for one viewer's connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub viewer_id: ViewerId,
    pub candidate: IceCandidate,
}

/// The closed set of signaling messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingMessage {
    ViewerJoin(Presence),
    ViewerHeartbeat(Presence),
    ViewerLeave(Presence),
    StreamUpdate(StreamInfo),
    StopStream(StopStream),
    SignalOffer(Offer),
    SignalAnswer(Answer),
    /// Candidate gathered by a viewer
    SignalIce(Candidate),
    /// Candidate gathered by the broadcaster
    SignalIceAdmin(Candidate),
}

impl SignalingMessage {
    pub fn join(viewer_id: ViewerId, session_id: SessionId) -> Self {
        Self::ViewerJoin(Presence {
            viewer_id,
            session_id,
        })
    }

    pub fn heartbeat(viewer_id: ViewerId, session_id: SessionId) -> Self {
        Self::ViewerHeartbeat(Presence {
            viewer_id,
            session_id,
        })
    }

    pub fn leave(viewer_id: ViewerId, session_id: SessionId) -> Self {
        Self::ViewerLeave(Presence {
            viewer_id,
            session_id,
        })
    }

    pub fn stop() -> Self {
        Self::StopStream(StopStream {})
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ViewerJoin(_) => "VIEWER_JOIN",
            Self::ViewerHeartbeat(_) => "VIEWER_HEARTBEAT",
            Self::ViewerLeave(_) => "VIEWER_LEAVE",
            Self::StreamUpdate(_) => "STREAM_UPDATE",
            Self::StopStream(_) => "STOP_STREAM",
            Self::SignalOffer(_) => "SIGNAL_OFFER",
            Self::SignalAnswer(_) => "SIGNAL_ANSWER",
            Self::SignalIce(_) => "SIGNAL_ICE",
            Self::SignalIceAdmin(_) => "SIGNAL_ICE_ADMIN",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::ViewerJoin(_)
            | Self::ViewerHeartbeat(_)
            | Self::ViewerLeave(_)
            | Self::SignalAnswer(_)
            | Self::SignalIce(_) => Direction::ToBroadcaster,
            Self::StreamUpdate(_)
            | Self::StopStream(_)
            | Self::SignalOffer(_)
            | Self::SignalIceAdmin(_) => Direction::ToViewers,
        }
    }

    /// The viewer a message concerns; `None` for broadcasts to all viewers
    pub fn viewer_id(&self) -> Option<&ViewerId> {
        match self {
            Self::ViewerJoin(p) | Self::ViewerHeartbeat(p) | Self::ViewerLeave(p) => {
                Some(&p.viewer_id)
            }
            Self::SignalOffer(o) => Some(&o.viewer_id),
            Self::SignalAnswer(a) => Some(&a.viewer_id),
            Self::SignalIce(c) | Self::SignalIceAdmin(c) => Some(&c.viewer_id),
            Self::StreamUpdate(_) | Self::StopStream(_) => None,
        }
    }

    /// Whether the message is addressed to every viewer
    pub fn is_broadcast(&self) -> bool {
        self.direction() == Direction::ToViewers && self.viewer_id().is_none()
    }

    /// Encode for a relay transport
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Encode(e.to_string()))
    }

    /// Decode a message received from a relay transport
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_shape() {
        let msg = SignalingMessage::join(ViewerId::new("v-1"), SessionId::new("s-1"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "VIEWER_JOIN",
                "payload": { "viewerId": "v-1", "sessionId": "s-1" }
            })
        );
    }

    #[test]
    fn test_stop_stream_has_empty_payload() {
        let value = serde_json::to_value(SignalingMessage::stop()).unwrap();
        assert_eq!(value, json!({ "type": "STOP_STREAM", "payload": {} }));
        assert!(SignalingMessage::stop().is_broadcast());
        assert!(SignalingMessage::stop().viewer_id().is_none());
    }

    #[test]
    fn test_decode_offer() {
        let text = r#"{
            "type": "SIGNAL_OFFER",
            "payload": {
                "viewerId": "v-9",
                "sessionId": "s-2",
                "sdpOffer": "v=0",
                "mode": "Screen"
            }
        }"#;
        let msg = SignalingMessage::from_json(text).unwrap();

        match &msg {
            SignalingMessage::SignalOffer(offer) => {
                assert_eq!(offer.viewer_id.as_str(), "v-9");
                assert_eq!(offer.mode, SourceMode::Screen);
                assert_eq!(offer.sdp_offer.as_str(), "v=0");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(msg.direction(), Direction::ToViewers);
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn test_stream_update_fields() {
        let msg = SignalingMessage::StreamUpdate(StreamInfo {
            session_id: SessionId::new("s-3"),
            title: "Standup".into(),
            mode: SourceMode::Camera,
            resolution: Resolution::hd(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["sessionId"], "s-3");
        assert_eq!(value["payload"]["resolution"]["width"], 1280);
        assert_eq!(value["payload"]["mode"], "Camera");
        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_ice_directions() {
        let candidate = Candidate {
            viewer_id: ViewerId::new("v-1"),
            candidate: IceCandidate::new("candidate:1"),
        };
        let from_viewer = SignalingMessage::SignalIce(candidate.clone());
        let from_broadcaster = SignalingMessage::SignalIceAdmin(candidate);

        assert_eq!(from_viewer.direction(), Direction::ToBroadcaster);
        assert_eq!(from_broadcaster.direction(), Direction::ToViewers);
        assert_eq!(from_broadcaster.type_name(), "SIGNAL_ICE_ADMIN");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = SignalingMessage::from_json(r#"{"type":"HELLO","payload":{}}"#).unwrap_err();
        assert!(matches!(err, SignalingError::Decode(_)));
    }
}
