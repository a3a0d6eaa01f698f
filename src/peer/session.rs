//! Peer session state machine
//!
//! Wraps one transport connection with guarded phase transitions. Offer,
//! answer and candidates may arrive in any order relative to local progress:
//! signals that do not fit the current phase are rejected, and candidates that
//! arrive before the remote description are queued and flushed once it is set.

use std::sync::Arc;

use tokio::time::Instant;

use crate::media::{TrackSet, TrackSetId};
use crate::types::{PeerSessionId, SessionId, ViewerId};

use super::error::NegotiationError;
use super::state::{PeerPhase, PeerRole};
use super::transport::{IceCandidate, RtcPeer, Sdp, TransportState};

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Fed to the transport
    Applied,
    /// Held until the remote description is set
    Queued,
    /// Session already closed; straggler discarded
    Dropped,
}

/// One negotiated connection to one counterparty
pub struct PeerSession {
    id: PeerSessionId,
    viewer_id: ViewerId,
    session_id: SessionId,
    role: PeerRole,
    phase: PeerPhase,
    rtc: Arc<dyn RtcPeer>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    track_set: Option<TrackSetId>,
    created_at: Instant,
    connected_at: Option<Instant>,
}

impl PeerSession {
    pub fn new(
        id: PeerSessionId,
        viewer_id: ViewerId,
        session_id: SessionId,
        role: PeerRole,
        rtc: Arc<dyn RtcPeer>,
    ) -> Self {
        Self {
            id,
            viewer_id,
            session_id,
            role,
            phase: PeerPhase::Idle,
            rtc,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            track_set: None,
            created_at: Instant::now(),
            connected_at: None,
        }
    }

    pub fn id(&self) -> PeerSessionId {
        self.id
    }

    pub fn viewer_id(&self) -> &ViewerId {
        &self.viewer_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    /// Track set attached to this session (offerer side only)
    pub fn track_set(&self) -> Option<TrackSetId> {
        self.track_set
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn guard(&self, operation: &'static str, phase: PeerPhase, role: PeerRole) -> Result<(), NegotiationError> {
        if self.phase != phase || self.role != role {
            return Err(NegotiationError::InvalidTransition {
                operation,
                phase: self.phase,
                role: self.role,
            });
        }
        Ok(())
    }

    /// Attach every track of `tracks` and produce the local offer
    pub async fn offer(&mut self, tracks: &TrackSet) -> Result<Sdp, NegotiationError> {
        self.guard("offer", PeerPhase::Idle, PeerRole::Offerer)?;
        self.phase = PeerPhase::Negotiating;

        for track in &tracks.tracks {
            self.rtc.add_track(track).await?;
        }
        self.track_set = Some(tracks.id);

        let offer = self.rtc.create_offer().await?;

        tracing::debug!(
            peer_id = %self.id,
            viewer_id = %self.viewer_id,
            tracks = tracks.tracks.len(),
            "Offer created"
        );
        Ok(offer)
    }

    /// Install the remote offer and produce the answer
    pub async fn answer(&mut self, offer: &Sdp) -> Result<Sdp, NegotiationError> {
        self.guard("answer", PeerPhase::Idle, PeerRole::Answerer)?;
        self.phase = PeerPhase::Negotiating;

        let answer = self.rtc.accept_offer(offer).await?;
        self.remote_description_set = true;
        self.flush_pending().await;

        Ok(answer)
    }

    /// Install the remote answer, completing the exchange
    pub async fn complete(&mut self, answer: &Sdp) -> Result<(), NegotiationError> {
        self.guard("complete", PeerPhase::Negotiating, PeerRole::Offerer)?;
        if self.remote_description_set {
            // Duplicate delivery of the same answer
            return Err(NegotiationError::InvalidTransition {
                operation: "complete",
                phase: self.phase,
                role: self.role,
            });
        }

        self.rtc.apply_answer(answer).await?;
        self.remote_description_set = true;
        self.flush_pending().await;

        tracing::debug!(peer_id = %self.id, viewer_id = %self.viewer_id, "Answer applied");
        Ok(())
    }

    /// Feed or queue a remote candidate
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        if self.phase == PeerPhase::Closed {
            return Ok(CandidateOutcome::Dropped);
        }

        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            return Ok(CandidateOutcome::Queued);
        }

        self.rtc
            .add_ice_candidate(&candidate)
            .await
            .map_err(NegotiationError::Candidate)?;
        Ok(CandidateOutcome::Applied)
    }

    async fn flush_pending(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.rtc.add_ice_candidate(&candidate).await {
                tracing::debug!(
                    peer_id = %self.id,
                    error = %e,
                    "Queued candidate rejected"
                );
            }
        }
    }

    /// Apply a transport state report; returns true if the phase changed
    pub fn on_transport_state(&mut self, state: TransportState) -> bool {
        match (self.phase, state) {
            (PeerPhase::Negotiating, TransportState::Connected) => {
                self.phase = PeerPhase::Connected;
                self.connected_at = Some(Instant::now());
                true
            }
            (PeerPhase::Closed, _) => false,
            (_, TransportState::Closed) => {
                self.phase = PeerPhase::Closed;
                self.pending_candidates.clear();
                true
            }
            _ => false,
        }
    }

    /// Close the session and release the transport
    ///
    /// Idempotent; the transport is released before this returns.
    pub fn close(&mut self) {
        if self.phase == PeerPhase::Closed {
            return;
        }
        self.rtc.close();
        self.phase = PeerPhase::Closed;
        self.pending_candidates.clear();

        tracing::debug!(peer_id = %self.id, viewer_id = %self.viewer_id, "Peer session closed");
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("viewer_id", &self.viewer_id)
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::loopback::LoopbackNetwork;
    use crate::media::{MediaTrack, SourceMode, TrackKind};
    use crate::peer::transport::{PeerEvent, PeerEventReceiver, RtcTransport};

    async fn make(
        net: &LoopbackNetwork,
        id: u64,
        role: PeerRole,
    ) -> (PeerSession, PeerEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rtc = net.create_peer(tx).await.unwrap();
        let session = PeerSession::new(
            PeerSessionId(id),
            ViewerId::new("v-1"),
            SessionId::new("s-1"),
            role,
            Arc::from(rtc),
        );
        (session, rx)
    }

    fn tracks() -> TrackSet {
        TrackSet::new(
            SourceMode::Camera,
            vec![MediaTrack::new("cam-video", TrackKind::Video, "Camera")],
        )
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let net = LoopbackNetwork::new();
        let (mut offerer, mut offerer_events) = make(&net, 1, PeerRole::Offerer).await;
        let (mut answerer, mut answerer_events) = make(&net, 2, PeerRole::Answerer).await;

        let set = tracks();
        let offer = offerer.offer(&set).await.unwrap();
        assert_eq!(offerer.phase(), PeerPhase::Negotiating);
        assert_eq!(offerer.track_set(), Some(set.id));

        let answer = answerer.answer(&offer).await.unwrap();
        assert_eq!(answerer.phase(), PeerPhase::Negotiating);

        offerer.complete(&answer).await.unwrap();

        // Loopback reports connected on both sides once the answer lands
        let mut connected = false;
        while let Ok(event) = offerer_events.try_recv() {
            if let PeerEvent::StateChanged(state) = event {
                connected |= offerer.on_transport_state(state);
            }
        }
        assert!(connected);
        assert_eq!(offerer.phase(), PeerPhase::Connected);
        assert!(offerer.connected_at().is_some());

        let mut got_track = false;
        while let Ok(event) = answerer_events.try_recv() {
            if let PeerEvent::TrackReceived(track) = event {
                got_track = track.kind == TrackKind::Video;
            }
        }
        assert!(got_track);
    }

    #[tokio::test]
    async fn test_wrong_role_rejected() {
        let net = LoopbackNetwork::new();
        let (mut answerer, _rx) = make(&net, 1, PeerRole::Answerer).await;

        let err = answerer.offer(&tracks()).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidTransition { .. }));
        assert!(!err.is_fatal());
        assert_eq!(answerer.phase(), PeerPhase::Idle);
    }

    #[tokio::test]
    async fn test_answer_before_offer_rejected() {
        let net = LoopbackNetwork::new();
        let (mut offerer, _rx) = make(&net, 1, PeerRole::Offerer).await;

        let err = offerer.complete(&Sdp::new("loopback:answer:9")).await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidTransition {
                phase: PeerPhase::Idle,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_answer_rejected() {
        let net = LoopbackNetwork::new();
        let (mut offerer, _orx) = make(&net, 1, PeerRole::Offerer).await;
        let (mut answerer, _arx) = make(&net, 2, PeerRole::Answerer).await;

        let offer = offerer.offer(&tracks()).await.unwrap();
        let answer = answerer.answer(&offer).await.unwrap();
        offerer.complete(&answer).await.unwrap();

        let err = offerer.complete(&answer).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued_then_flushed() {
        let net = LoopbackNetwork::new();
        let (mut offerer, _orx) = make(&net, 1, PeerRole::Offerer).await;
        let (mut answerer, _arx) = make(&net, 2, PeerRole::Answerer).await;

        let offer = offerer.offer(&tracks()).await.unwrap();

        // Viewer candidate overtakes the answer
        let outcome = offerer
            .add_remote_candidate(IceCandidate::new("candidate:early"))
            .await
            .unwrap();
        assert_eq!(outcome, CandidateOutcome::Queued);
        assert_eq!(offerer.pending_candidates(), 1);

        let answer = answerer.answer(&offer).await.unwrap();
        offerer.complete(&answer).await.unwrap();
        assert_eq!(offerer.pending_candidates(), 0);
        assert_eq!(net.candidates_applied(), 1);

        let outcome = offerer
            .add_remote_candidate(IceCandidate::new("candidate:late"))
            .await
            .unwrap();
        assert_eq!(outcome, CandidateOutcome::Applied);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drops_stragglers() {
        let net = LoopbackNetwork::new();
        let (mut offerer, _rx) = make(&net, 1, PeerRole::Offerer).await;
        offerer.offer(&tracks()).await.unwrap();
        assert_eq!(net.open_peers(), 1);

        offerer.close();
        offerer.close();
        assert_eq!(offerer.phase(), PeerPhase::Closed);
        assert_eq!(net.open_peers(), 0);

        let outcome = offerer
            .add_remote_candidate(IceCandidate::new("candidate:straggler"))
            .await
            .unwrap();
        assert_eq!(outcome, CandidateOutcome::Dropped);

        // A closed session never comes back
        assert!(!offerer.on_transport_state(TransportState::Connected));
        assert_eq!(offerer.phase(), PeerPhase::Closed);
    }
}
