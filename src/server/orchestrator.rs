//! Peer connection orchestrator
//!
//! Keeps one offerer-side [`PeerSession`] per registered viewer in sync with
//! the current source. Negotiations for different viewers run concurrently;
//! negotiations for the same viewer are serialized so at most one offer is
//! outstanding per viewer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::TrackSetId;
use crate::peer::{
    CandidateOutcome, IceCandidate, NegotiationError, PeerEvent, PeerEventReceiver, PeerPhase,
    PeerRole, PeerSession, RtcPeer, RtcTransport, Sdp, TransportError, TransportState,
};
use crate::registry::{PeerLifecycle, ViewerRegistry};
use crate::session::{LiveSource, SourceWatch};
use crate::signaling::{Candidate, Offer, SignalingChannel, SignalingMessage};
use crate::stats::{BroadcastStats, NegotiationCounters};
use crate::types::{PeerSessionId, SessionId, ViewerId};

/// What a negotiation request led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// A fresh offer was published
    Offered(PeerSessionId),
    /// A recent negotiation for the current source is still pending
    InProgress(PeerSessionId),
    /// The source changed or the viewer left while the offer was built
    Superseded,
}

/// Point-in-time view of one viewer's peer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub viewer_id: ViewerId,
    pub peer_id: PeerSessionId,
    pub phase: PeerPhase,
    pub session_id: SessionId,
    pub track_set: Option<TrackSetId>,
    pub pending_candidates: usize,
}

struct PeerSlot {
    id: PeerSessionId,
    session: Arc<Mutex<PeerSession>>,
    pump: JoinHandle<()>,
}

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn RtcTransport>,
    channel: Arc<dyn SignalingChannel>,
    source: SourceWatch,
    negotiation_timeout: Duration,
    peers: parking_lot::Mutex<HashMap<ViewerId, PeerSlot>>,
    pending: parking_lot::Mutex<HashMap<ViewerId, Pending>>,
    turns: parking_lot::Mutex<HashMap<ViewerId, Arc<Mutex<()>>>>,
    registry: OnceLock<Weak<ViewerRegistry>>,
    next_peer_id: AtomicU64,
    next_generation: AtomicU64,
    counters: NegotiationCounters,
}

/// Broadcaster-side owner of every peer session
///
/// Cheap to clone; clones share the same peers.
#[derive(Clone)]
pub struct PeerOrchestrator {
    inner: Arc<Inner>,
}

impl PeerOrchestrator {
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        channel: Arc<dyn SignalingChannel>,
        source: SourceWatch,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                channel,
                source,
                negotiation_timeout,
                peers: parking_lot::Mutex::new(HashMap::new()),
                pending: parking_lot::Mutex::new(HashMap::new()),
                turns: parking_lot::Mutex::new(HashMap::new()),
                registry: OnceLock::new(),
                next_peer_id: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                counters: NegotiationCounters::default(),
            }),
        }
    }

    /// Let the orchestrator consult and update viewer records
    pub fn bind_registry(&self, registry: &Arc<ViewerRegistry>) {
        let _ = self.inner.registry.set(Arc::downgrade(registry));
    }

    fn registry(&self) -> Option<Arc<ViewerRegistry>> {
        self.inner.registry.get().and_then(Weak::upgrade)
    }

    async fn is_registered(&self, viewer_id: &ViewerId) -> bool {
        match self.registry() {
            Some(registry) => registry.contains(viewer_id).await,
            None => true,
        }
    }

    fn is_current(&self, source: &LiveSource) -> bool {
        self.inner
            .source
            .borrow()
            .as_ref()
            .is_some_and(|current| current.tracks.id == source.tracks.id)
    }

    fn turn(&self, viewer_id: &ViewerId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .turns
                .lock()
                .entry(viewer_id.clone())
                .or_default(),
        )
    }

    fn slot(&self, viewer_id: &ViewerId) -> Option<(PeerSessionId, Arc<Mutex<PeerSession>>)> {
        self.inner
            .peers
            .lock()
            .get(viewer_id)
            .map(|slot| (slot.id, Arc::clone(&slot.session)))
    }

    /// Remove the viewer's slot, only if it still holds `only` when given
    fn take_slot(&self, viewer_id: &ViewerId, only: Option<PeerSessionId>) -> Option<PeerSlot> {
        let mut peers = self.inner.peers.lock();
        match peers.get(viewer_id) {
            Some(slot) if only.map_or(true, |id| slot.id == id) => peers.remove(viewer_id),
            _ => None,
        }
    }

    async fn in_progress(&self, viewer_id: &ViewerId, source: &LiveSource) -> Option<PeerSessionId> {
        let (_, session) = self.slot(viewer_id)?;
        let session = session.lock().await;

        let young = session.created_at().elapsed() < self.inner.negotiation_timeout;
        let same_source = session.track_set() == Some(source.tracks.id);
        (session.phase() == PeerPhase::Negotiating && young && same_source).then(|| session.id())
    }

    /// Build a fresh peer session for `viewer_id` and publish its offer
    ///
    /// Any previous session for the viewer is closed first. A negotiation
    /// started recently for the current source is left alone.
    pub async fn negotiate(&self, viewer_id: &ViewerId) -> Result<NegotiationOutcome> {
        let turn = self.turn(viewer_id);
        let _turn = turn.lock().await;

        let source = self
            .inner
            .source
            .borrow()
            .clone()
            .ok_or(Error::NoActiveSession)?;

        if let Some(peer_id) = self.in_progress(viewer_id, &source).await {
            tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, "Negotiation already in progress");
            return Ok(NegotiationOutcome::InProgress(peer_id));
        }

        if let Some(previous) = self.take_slot(viewer_id, None) {
            close_slot(previous).await;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let rtc: Arc<dyn RtcPeer> = match self.inner.transport.create_peer(events_tx).await {
            Ok(rtc) => Arc::from(rtc),
            Err(e) => return Err(self.failed(viewer_id, NegotiationError::from(e))),
        };

        let peer_id = PeerSessionId(self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut session = PeerSession::new(
            peer_id,
            viewer_id.clone(),
            source.session.id.clone(),
            PeerRole::Offerer,
            rtc,
        );

        let sdp_offer = match session.offer(&source.tracks).await {
            Ok(sdp) => sdp,
            Err(e) => {
                session.close();
                return Err(self.failed(viewer_id, e));
            }
        };

        let session = Arc::new(Mutex::new(session));
        let (ready_tx, ready_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&self.inner),
            viewer_id.clone(),
            peer_id,
            Arc::clone(&session),
            ready_rx,
            events_rx,
        ));
        let displaced = self.inner.peers.lock().insert(
            viewer_id.clone(),
            PeerSlot {
                id: peer_id,
                session,
                pump,
            },
        );
        if let Some(displaced) = displaced {
            close_slot(displaced).await;
        }

        if !self.is_current(&source) || !self.is_registered(viewer_id).await {
            tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, "Offer superseded before publishing");
            self.close_peer_session(viewer_id, peer_id).await;
            return Ok(NegotiationOutcome::Superseded);
        }

        let offer = SignalingMessage::SignalOffer(Offer {
            viewer_id: viewer_id.clone(),
            session_id: source.session.id.clone(),
            sdp_offer,
            mode: source.session.mode,
        });
        if let Err(e) = self.inner.channel.publish(offer) {
            self.inner.counters.negotiation_failed();
            tracing::warn!(viewer_id = %viewer_id, error = %e, "Failed to publish offer");
            self.close_peer_session(viewer_id, peer_id).await;
            return Err(Error::SignalingUnreachable(e));
        }

        // Candidates gathered while building the offer follow it
        let _ = ready_tx.send(());
        self.inner.counters.offer_sent();
        if let Some(registry) = self.registry() {
            registry.attach_peer(viewer_id, peer_id).await;
        }

        tracing::info!(
            viewer_id = %viewer_id,
            peer_id = %peer_id,
            session_id = %source.session.id,
            mode = %source.session.mode,
            "Offer sent"
        );
        Ok(NegotiationOutcome::Offered(peer_id))
    }

    fn failed(&self, viewer_id: &ViewerId, error: NegotiationError) -> Error {
        self.inner.counters.negotiation_failed();
        tracing::warn!(viewer_id = %viewer_id, error = %error, "Negotiation failed");
        Error::NegotiationFailed(error)
    }

    /// Apply a viewer's answer to its pending session
    ///
    /// Answers for unknown viewers and duplicate or stale answers are
    /// dropped. A fatal failure closes that viewer's session only.
    pub async fn complete(&self, viewer_id: &ViewerId, answer: &Sdp) -> Result<()> {
        let Some((peer_id, session)) = self.slot(viewer_id) else {
            tracing::debug!(viewer_id = %viewer_id, "Answer without peer session dropped");
            return Ok(());
        };

        let result = session.lock().await.complete(answer).await;
        match result {
            Ok(()) => {
                self.inner.counters.answer_applied();
                tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, "Answer applied");
                Ok(())
            }
            Err(NegotiationError::Transport(TransportError::InvalidDescription(reason))) => {
                tracing::debug!(
                    viewer_id = %viewer_id,
                    peer_id = %peer_id,
                    reason = %reason,
                    "Answer does not match the pending offer"
                );
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, error = %e, "Stale answer ignored");
                Ok(())
            }
            Err(e) => {
                self.close_peer_session(viewer_id, peer_id).await;
                Err(self.failed(viewer_id, e))
            }
        }
    }

    /// Feed a viewer's candidate to its session
    pub async fn add_remote_candidate(
        &self,
        viewer_id: &ViewerId,
        candidate: IceCandidate,
    ) -> CandidateOutcome {
        let Some((peer_id, session)) = self.slot(viewer_id) else {
            self.inner.counters.candidate_dropped();
            tracing::debug!(viewer_id = %viewer_id, "Candidate without peer session dropped");
            return CandidateOutcome::Dropped;
        };

        let result = session.lock().await.add_remote_candidate(candidate).await;
        match result {
            Ok(CandidateOutcome::Applied) => {
                self.inner.counters.candidate_applied();
                CandidateOutcome::Applied
            }
            Ok(CandidateOutcome::Queued) => CandidateOutcome::Queued,
            Ok(CandidateOutcome::Dropped) => {
                self.inner.counters.candidate_dropped();
                CandidateOutcome::Dropped
            }
            Err(e) => {
                self.inner.counters.candidate_dropped();
                tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, error = %e, "Candidate rejected");
                CandidateOutcome::Dropped
            }
        }
    }

    /// Negotiate with every viewer in `viewers` concurrently
    ///
    /// Returns the number of offers published. Failures stay per viewer.
    pub async fn renegotiate_all(&self, viewers: &[ViewerId]) -> usize {
        let results = join_all(viewers.iter().map(|viewer| self.negotiate(viewer))).await;

        let mut offered = 0;
        for (viewer_id, result) in viewers.iter().zip(results) {
            match result {
                Ok(NegotiationOutcome::Offered(_)) => offered += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(viewer_id = %viewer_id, error = %e, "Renegotiation failed");
                }
            }
        }

        tracing::info!(viewers = viewers.len(), offered, "Renegotiated with registered viewers");
        offered
    }

    async fn close_peer_session(&self, viewer_id: &ViewerId, peer_id: PeerSessionId) {
        if let Some(slot) = self.take_slot(viewer_id, Some(peer_id)) {
            close_slot(slot).await;
        }
    }

    /// Cancel pending negotiation and close the viewer's peer session
    pub async fn close(&self, viewer_id: &ViewerId) {
        if let Some(pending) = self.inner.pending.lock().remove(viewer_id) {
            pending.task.abort();
        }
        self.inner.turns.lock().remove(viewer_id);

        if let Some(slot) = self.take_slot(viewer_id, None) {
            let peer_id = slot.id;
            close_slot(slot).await;
            tracing::debug!(viewer_id = %viewer_id, peer_id = %peer_id, "Peer session closed");
        }
    }

    /// Cancel everything and close every peer session
    pub async fn close_all(&self) -> usize {
        for (_, pending) in self.inner.pending.lock().drain() {
            pending.task.abort();
        }

        let slots: Vec<PeerSlot> = self.inner.peers.lock().drain().map(|(_, slot)| slot).collect();
        let closed = slots.len();
        for slot in slots {
            close_slot(slot).await;
        }

        if closed > 0 {
            tracing::info!(peers = closed, "Closed all peer sessions");
        }
        closed
    }

    /// Summaries of every open peer session
    pub async fn snapshot(&self) -> Vec<PeerSummary> {
        let sessions: Vec<Arc<Mutex<PeerSession>>> = self
            .inner
            .peers
            .lock()
            .values()
            .map(|slot| Arc::clone(&slot.session))
            .collect();

        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let session = session.lock().await;
            summaries.push(PeerSummary {
                viewer_id: session.viewer_id().clone(),
                peer_id: session.id(),
                phase: session.phase(),
                session_id: session.session_id().clone(),
                track_set: session.track_set(),
                pending_candidates: session.pending_candidates(),
            });
        }
        summaries
    }

    /// Phase of the viewer's current session
    pub async fn phase(&self, viewer_id: &ViewerId) -> Option<PeerPhase> {
        let (_, session) = self.slot(viewer_id)?;
        let phase = session.lock().await.phase();
        Some(phase)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Fill the peer and negotiation fields of a stats snapshot
    pub async fn fill_stats(&self, stats: &mut BroadcastStats) {
        for summary in self.snapshot().await {
            match summary.phase {
                PeerPhase::Negotiating => stats.peers_negotiating += 1,
                PeerPhase::Connected => stats.peers_connected += 1,
                PeerPhase::Idle | PeerPhase::Closed => {}
            }
        }
        self.inner.counters.fill(stats);
    }

    async fn connection_lost(&self, viewer_id: &ViewerId, peer_id: PeerSessionId, state: TransportState) {
        // Called from the slot's own event pump, which must not abort itself
        if let Some(PeerSlot { session, .. }) = self.take_slot(viewer_id, Some(peer_id)) {
            session.lock().await.close();
            tracing::info!(
                viewer_id = %viewer_id,
                peer_id = %peer_id,
                state = ?state,
                "Peer connection lost"
            );
        }
    }
}

async fn close_slot(slot: PeerSlot) {
    slot.pump.abort();
    slot.session.lock().await.close();
}

/// Forward one peer session's transport events
async fn pump_events(
    inner: Weak<Inner>,
    viewer_id: ViewerId,
    peer_id: PeerSessionId,
    session: Arc<Mutex<PeerSession>>,
    ready: oneshot::Receiver<()>,
    mut events: PeerEventReceiver,
) {
    if ready.await.is_err() {
        return;
    }

    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let message = SignalingMessage::SignalIceAdmin(Candidate {
                    viewer_id: viewer_id.clone(),
                    candidate,
                });
                if let Err(e) = inner.channel.publish(message) {
                    tracing::warn!(viewer_id = %viewer_id, peer_id = %peer_id, error = %e, "Failed to publish candidate");
                }
            }
            PeerEvent::StateChanged(state) => {
                let (changed, phase) = {
                    let mut session = session.lock().await;
                    (session.on_transport_state(state), session.phase())
                };
                if changed && phase == PeerPhase::Connected {
                    tracing::info!(viewer_id = %viewer_id, peer_id = %peer_id, "Viewer connected");
                }

                if state.is_failure() {
                    if let Some(inner) = inner.upgrade() {
                        PeerOrchestrator { inner }
                            .connection_lost(&viewer_id, peer_id, state)
                            .await;
                    }
                    return;
                }
                if state == TransportState::Closed {
                    return;
                }
            }
            PeerEvent::TrackReceived(_) | PeerEvent::Media(_) => {}
        }
    }
}

#[async_trait]
impl PeerLifecycle for PeerOrchestrator {
    fn schedule_negotiation(&self, viewer_id: &ViewerId, delay: Duration) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let orchestrator = self.clone();
        let viewer = viewer_id.clone();

        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // Past this point the negotiation runs to completion
            {
                let mut pending = orchestrator.inner.pending.lock();
                match pending.get(&viewer) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&viewer);
                    }
                    _ => return,
                }
            }

            match orchestrator.negotiate(&viewer).await {
                Ok(_) => {}
                Err(Error::NoActiveSession) => {
                    tracing::debug!(viewer_id = %viewer, "No active session, negotiation skipped");
                }
                Err(e) => {
                    tracing::warn!(viewer_id = %viewer, error = %e, "Scheduled negotiation failed");
                }
            }
        });

        let previous = self
            .inner
            .pending
            .lock()
            .insert(viewer_id.clone(), Pending { generation, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    async fn close_peer(&self, viewer_id: &ViewerId) {
        self.close(viewer_id).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::loopback::LoopbackNetwork;
    use crate::media::{MediaTrack, Resolution, SourceMode, SourceRequest, TrackKind, TrackSet};
    use crate::peer::PeerEventSender;
    use crate::session::Session;
    use crate::signaling::{LocalBus, LocalChannel, Subscription};

    struct Fixture {
        net: LoopbackNetwork,
        channel: LocalChannel,
        source_tx: watch::Sender<Option<Arc<LiveSource>>>,
        orchestrator: PeerOrchestrator,
        inbox: Subscription,
    }

    fn live(mode: SourceMode) -> Arc<LiveSource> {
        let session = Session::new(&SourceRequest::new(mode, Resolution::hd()).title("Test"));
        let tracks = TrackSet::new(
            mode,
            vec![MediaTrack::new(format!("{mode}-video"), TrackKind::Video, "Test")],
        );
        Arc::new(LiveSource { session, tracks })
    }

    fn fixture() -> Fixture {
        let net = LoopbackNetwork::new();
        let bus = LocalBus::new();
        let channel = bus.channel("room");
        let inbox = channel.subscribe().unwrap();
        let (source_tx, source_rx) = watch::channel(Some(live(SourceMode::Camera)));
        let orchestrator = PeerOrchestrator::new(
            Arc::new(net.clone()),
            Arc::new(channel.clone()),
            source_rx,
            Duration::from_secs(10),
        );
        Fixture {
            net,
            channel,
            source_tx,
            orchestrator,
            inbox,
        }
    }

    async fn next_offer(inbox: &mut Subscription) -> Offer {
        loop {
            if let SignalingMessage::SignalOffer(offer) = inbox.recv().await.unwrap() {
                return offer;
            }
        }
    }

    /// Answer an offer the way a viewer would
    async fn answer(net: &LoopbackNetwork, offer: &Offer) -> (PeerSession, Sdp) {
        let (tx, _rx): (PeerEventSender, _) = mpsc::unbounded_channel();
        let rtc = net.create_peer(tx).await.unwrap();
        let mut session = PeerSession::new(
            PeerSessionId(1000),
            offer.viewer_id.clone(),
            offer.session_id.clone(),
            PeerRole::Answerer,
            Arc::from(rtc),
        );
        let sdp = session.answer(&offer.sdp_offer).await.unwrap();
        (session, sdp)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_negotiate_publishes_offer() {
        let mut f = fixture();
        let viewer = ViewerId::new("v-1");

        let outcome = f.orchestrator.negotiate(&viewer).await.unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Offered(_)));

        let offer = next_offer(&mut f.inbox).await;
        assert_eq!(offer.viewer_id, viewer);
        assert_eq!(offer.mode, SourceMode::Camera);
        assert_eq!(f.orchestrator.phase(&viewer).await, Some(PeerPhase::Negotiating));

        // The broadcaster's candidate follows the offer
        loop {
            match f.inbox.recv().await.unwrap() {
                SignalingMessage::SignalIceAdmin(c) => {
                    assert_eq!(c.viewer_id, viewer);
                    break;
                }
                other => assert_ne!(other.type_name(), "SIGNAL_OFFER"),
            }
        }
    }

    #[tokio::test]
    async fn test_answer_connects_viewer() {
        let mut f = fixture();
        let viewer = ViewerId::new("v-1");

        f.orchestrator.negotiate(&viewer).await.unwrap();
        let offer = next_offer(&mut f.inbox).await;
        let (_viewer_session, sdp) = answer(&f.net, &offer).await;

        f.orchestrator.complete(&viewer, &sdp).await.unwrap();
        settle().await;

        assert_eq!(f.orchestrator.phase(&viewer).await, Some(PeerPhase::Connected));

        // Duplicate delivery of the same answer is harmless
        f.orchestrator.complete(&viewer, &sdp).await.unwrap();
        assert_eq!(f.orchestrator.phase(&viewer).await, Some(PeerPhase::Connected));

        let mut stats = BroadcastStats::default();
        f.orchestrator.fill_stats(&mut stats).await;
        assert_eq!(stats.peers_connected, 1);
        assert_eq!(stats.offers_sent, 1);
        assert_eq!(stats.answers_applied, 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let mut f = fixture();
        let a = ViewerId::new("v-a");
        let b = ViewerId::new("v-b");

        f.net.fail_next_peers(1);
        let err = f.orchestrator.negotiate(&a).await.unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));
        assert!(err.is_per_viewer());

        f.orchestrator.negotiate(&b).await.unwrap();
        let offer = next_offer(&mut f.inbox).await;
        assert_eq!(offer.viewer_id, b);
        assert_eq!(f.orchestrator.phase(&a).await, None);

        let mut stats = BroadcastStats::default();
        f.orchestrator.fill_stats(&mut stats).await;
        assert_eq!(stats.negotiation_failures, 1);
        assert_eq!(stats.peers_negotiating, 1);
    }

    #[tokio::test]
    async fn test_candidates_for_unknown_viewer_dropped() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .add_remote_candidate(&ViewerId::new("v-ghost"), IceCandidate::new("candidate:1"))
            .await;
        assert_eq!(outcome, CandidateOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_early_candidate_queued_then_applied() {
        let mut f = fixture();
        let viewer = ViewerId::new("v-1");

        f.orchestrator.negotiate(&viewer).await.unwrap();
        let offer = next_offer(&mut f.inbox).await;

        let outcome = f
            .orchestrator
            .add_remote_candidate(&viewer, IceCandidate::new("candidate:early"))
            .await;
        assert_eq!(outcome, CandidateOutcome::Queued);

        let (_viewer_session, sdp) = answer(&f.net, &offer).await;
        f.orchestrator.complete(&viewer, &sdp).await.unwrap();
        assert_eq!(f.net.candidates_applied(), 1);
    }

    #[tokio::test]
    async fn test_no_source_means_no_offer() {
        let f = fixture();
        f.source_tx.send_replace(None);

        let err = f.orchestrator.negotiate(&ViewerId::new("v-1")).await.unwrap_err();
        assert!(matches!(err, Error::NoActiveSession));
        assert_eq!(f.net.open_peers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_negotiation_not_restarted() {
        let f = fixture();
        let viewer = ViewerId::new("v-1");

        let first = f.orchestrator.negotiate(&viewer).await.unwrap();
        let NegotiationOutcome::Offered(first_id) = first else {
            panic!("expected an offer, got {first:?}");
        };
        assert_eq!(
            f.orchestrator.negotiate(&viewer).await.unwrap(),
            NegotiationOutcome::InProgress(first_id)
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        let third = f.orchestrator.negotiate(&viewer).await.unwrap();
        assert!(matches!(third, NegotiationOutcome::Offered(id) if id != first_id));
        assert_eq!(f.orchestrator.peer_count(), 1);
        assert_eq!(f.net.open_peers(), 1);
    }

    #[tokio::test]
    async fn test_source_change_renegotiates_everyone() {
        let mut f = fixture();
        let viewers = vec![ViewerId::new("v-1"), ViewerId::new("v-2")];

        assert_eq!(f.orchestrator.renegotiate_all(&viewers).await, 2);
        let screen = live(SourceMode::Screen);
        f.source_tx.send_replace(Some(Arc::clone(&screen)));
        assert_eq!(f.orchestrator.renegotiate_all(&viewers).await, 2);

        let summaries = f.orchestrator.snapshot().await;
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.track_set == Some(screen.tracks.id)));
        assert_eq!(f.net.open_peers(), 2);

        let mut screen_offers = 0;
        for _ in 0..4 {
            if next_offer(&mut f.inbox).await.mode == SourceMode::Screen {
                screen_offers += 1;
            }
        }
        assert_eq!(screen_offers, 2);
    }

    #[tokio::test]
    async fn test_publish_failure_closes_session() {
        let f = fixture();
        f.channel.set_connected(false);

        let err = f.orchestrator.negotiate(&ViewerId::new("v-1")).await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnreachable(_)));
        assert_eq!(f.orchestrator.peer_count(), 0);
        assert_eq!(f.net.open_peers(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_negotiation_cancelled_by_close() {
        let f = fixture();
        let viewer = ViewerId::new("v-1");

        f.orchestrator
            .schedule_negotiation(&viewer, Duration::from_millis(50));
        f.orchestrator.close(&viewer).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(f.orchestrator.peer_count(), 0);
        assert_eq!(f.net.open_peers(), 0);
    }

    #[tokio::test]
    async fn test_transport_loss_closes_only_that_peer() {
        let mut f = fixture();
        let a = ViewerId::new("v-a");
        let b = ViewerId::new("v-b");

        f.orchestrator.negotiate(&a).await.unwrap();
        let offer_a = next_offer(&mut f.inbox).await;
        f.orchestrator.negotiate(&b).await.unwrap();
        let offer_b = next_offer(&mut f.inbox).await;

        let (viewer_a, sdp_a) = answer(&f.net, &offer_a).await;
        let (_viewer_b, sdp_b) = answer(&f.net, &offer_b).await;
        f.orchestrator.complete(&a, &sdp_a).await.unwrap();
        f.orchestrator.complete(&b, &sdp_b).await.unwrap();
        settle().await;

        // Viewer A goes away without a leave
        drop(viewer_a);
        settle().await;

        assert_eq!(f.orchestrator.phase(&a).await, None);
        assert_eq!(f.orchestrator.phase(&b).await, Some(PeerPhase::Connected));
    }
}
