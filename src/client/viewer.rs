//! Viewer connection
//!
//! One viewer attached to one broadcast link. A background task announces the
//! viewer, answers offers, trickles candidates, sends heartbeats while live
//! and reconnects with backoff when the transport or signaling fails.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;
use crate::media::{MediaTrack, SharedDvr};
use crate::peer::{
    IceCandidate, NegotiationError, PeerEvent, PeerEventReceiver, PeerRole, PeerSession, RtcPeer,
    RtcTransport, TransportError,
};
use crate::session::parse_session_link;
use crate::signaling::{
    for_viewer, Answer, Candidate, Offer, SignalingChannel, SignalingError, SignalingMessage,
    StreamInfo, Subscription, ViewerInbound,
};
use crate::stats::ViewerStats;
use crate::types::{PeerSessionId, SessionId, ViewerId};

use super::config::ViewerConfig;
use super::state::{EndReason, ViewerState};

/// Events from a viewer connection
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Connection state changed
    StateChanged(ViewerState),

    /// The broadcaster described its stream; a new session id means a switch
    StreamUpdated(StreamInfo),

    /// A remote track started
    TrackReceived(MediaTrack),

    /// A reconnect attempt was scheduled
    Reconnecting { attempt: u32, delay: Duration },

    /// Terminal; no further events follow
    Ended(EndReason),
}

#[derive(Default)]
struct Tally {
    stats: ViewerStats,
    live_since: Option<Instant>,
}

/// State shared by the handle and the background task
struct Shared {
    viewer_id: ViewerId,
    channel: Arc<dyn SignalingChannel>,
    session_id: Mutex<SessionId>,
    peer: Mutex<Option<Arc<dyn RtcPeer>>>,
    torn_down: Mutex<bool>,
    tally: Mutex<Tally>,
    state: watch::Sender<ViewerState>,
}

impl Shared {
    /// Publish unless the connection was torn down
    fn publish(&self, message: SignalingMessage) -> std::result::Result<(), SignalingError> {
        let torn_down = self.torn_down.lock();
        if *torn_down {
            return Err(SignalingError::Closed);
        }
        self.channel.publish(message)
    }

    /// Make `rtc` reachable from teardown; closes it if teardown already ran
    fn install_peer(&self, rtc: &Arc<dyn RtcPeer>) -> bool {
        let torn_down = self.torn_down.lock();
        if *torn_down {
            rtc.close();
            return false;
        }
        *self.peer.lock() = Some(Arc::clone(rtc));
        true
    }

    fn clear_peer(&self) {
        self.peer.lock().take();
    }

    /// Announce departure and release the transport; returns false if already done
    fn teardown(&self) -> bool {
        let mut torn_down = self.torn_down.lock();
        if *torn_down {
            return false;
        }
        *torn_down = true;

        let session_id = self.session_id.lock().clone();
        if let Err(e) = self
            .channel
            .publish(SignalingMessage::leave(self.viewer_id.clone(), session_id))
        {
            tracing::debug!(viewer_id = %self.viewer_id, error = %e, "Failed to publish leave");
        }
        if let Some(peer) = self.peer.lock().take() {
            peer.close();
        }
        drop(torn_down);

        self.state.send_if_modified(|state| {
            if state.is_ended() {
                return false;
            }
            *state = ViewerState::Ended(EndReason::Left);
            true
        });
        true
    }

    fn stats(&self) -> ViewerStats {
        let tally = self.tally.lock();
        let mut stats = tally.stats.clone();
        if let Some(since) = tally.live_since {
            stats.live_time += since.elapsed();
        }
        stats
    }
}

/// Options for a viewer connection
pub struct ViewerBuilder {
    session_id: SessionId,
    viewer_id: Option<ViewerId>,
    config: ViewerConfig,
    dvr: Option<SharedDvr>,
}

impl ViewerBuilder {
    /// Use a fixed viewer id instead of a generated one
    pub fn viewer_id(mut self, viewer_id: ViewerId) -> Self {
        self.viewer_id = Some(viewer_id);
        self
    }

    pub fn config(mut self, config: ViewerConfig) -> Self {
        self.config = config;
        self
    }

    /// Record inbound media into `dvr`
    pub fn dvr(mut self, dvr: SharedDvr) -> Self {
        self.dvr = Some(dvr);
        self
    }

    /// Subscribe, announce and start the background task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        self,
        channel: Arc<dyn SignalingChannel>,
        transport: Arc<dyn RtcTransport>,
    ) -> Result<(ViewerConnection, mpsc::Receiver<ViewerEvent>)> {
        let inbox = channel.subscribe()?;
        let viewer_id = self.viewer_id.unwrap_or_else(ViewerId::generate);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ViewerState::Connecting);

        let shared = Arc::new(Shared {
            viewer_id: viewer_id.clone(),
            channel,
            session_id: Mutex::new(self.session_id.clone()),
            peer: Mutex::new(None),
            torn_down: Mutex::new(false),
            tally: Mutex::new(Tally::default()),
            state: state_tx,
        });

        let now = Instant::now();
        let task = ViewerTask {
            shared: Arc::clone(&shared),
            config: self.config,
            transport,
            inbox,
            events: event_tx,
            dvr: self.dvr,
            known_sessions: HashSet::from([self.session_id.clone()]),
            session_id: self.session_id,
            admitted: false,
            peer: None,
            peer_events: None,
            next_peer_id: 0,
            state: ViewerState::Connecting,
            failures: 0,
            awaiting_offer: true,
            announce_at: now,
            heartbeat_at: now,
            retry_at: now,
            connect_deadline: None,
        };
        let handle = tokio::spawn(task.run());

        tracing::info!(viewer_id = %viewer_id, "Viewer connection started");

        let connection = ViewerConnection {
            shared,
            state: state_rx,
            task: Some(handle),
        };
        Ok((connection, event_rx))
    }
}

/// Handle to a running viewer connection
///
/// Dropping the handle leaves the broadcast: `VIEWER_LEAVE` is published,
/// the transport is released and no timer fires afterwards.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use castlink::client::ViewerConnection;
/// use castlink::loopback::LoopbackNetwork;
/// use castlink::signaling::LocalBus;
///
/// # async fn example() -> castlink::error::Result<()> {
/// let bus = LocalBus::new();
/// let builder = ViewerConnection::from_link("http://localhost:8080/#/viewer/abc")
///     .expect("valid link");
/// let (viewer, mut events) =
///     builder.connect(Arc::new(bus.channel("castlink")), Arc::new(LoopbackNetwork::new()))?;
///
/// while let Some(event) = events.recv().await {
///     println!("Event: {:?}", event);
/// }
/// viewer.leave();
/// # Ok(())
/// # }
/// ```
pub struct ViewerConnection {
    shared: Arc<Shared>,
    state: watch::Receiver<ViewerState>,
    task: Option<JoinHandle<()>>,
}

impl ViewerConnection {
    pub fn builder(session_id: SessionId) -> ViewerBuilder {
        ViewerBuilder {
            session_id,
            viewer_id: None,
            config: ViewerConfig::default(),
            dvr: None,
        }
    }

    /// Builder for the session named by a viewer link
    pub fn from_link(link: &str) -> Option<ViewerBuilder> {
        parse_session_link(link).map(Self::builder)
    }

    pub fn viewer_id(&self) -> &ViewerId {
        &self.shared.viewer_id
    }

    /// Session id the viewer currently follows
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id.lock().clone()
    }

    pub fn state(&self) -> ViewerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ViewerState> {
        self.state.clone()
    }

    pub fn stats(&self) -> ViewerStats {
        self.shared.stats()
    }

    /// Wait for the connection to end
    pub async fn ended(&self) -> EndReason {
        let mut rx = self.state.clone();
        let reason = match rx.wait_for(|state| state.is_ended()).await {
            Ok(state) => match *state {
                ViewerState::Ended(reason) => Some(reason),
                _ => None,
            },
            Err(_) => None,
        };
        reason.unwrap_or(EndReason::Left)
    }

    /// Leave the broadcast
    pub fn leave(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.shared.teardown() {
            tracing::info!(viewer_id = %self.shared.viewer_id, "Viewer left");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ViewerConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum Wake {
    Signal(std::result::Result<SignalingMessage, SignalingError>),
    Peer(Option<PeerEvent>),
    Timer,
}

async fn next_peer_event(events: &mut Option<PeerEventReceiver>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The state machine, owned by the background task
struct ViewerTask {
    shared: Arc<Shared>,
    config: ViewerConfig,
    transport: Arc<dyn RtcTransport>,
    inbox: Subscription,
    events: mpsc::Sender<ViewerEvent>,
    dvr: Option<SharedDvr>,
    /// The link's session id plus every id announced since admission
    known_sessions: HashSet<SessionId>,
    session_id: SessionId,
    /// Set once the broadcaster answered our own join with an offer
    admitted: bool,
    peer: Option<PeerSession>,
    peer_events: Option<PeerEventReceiver>,
    next_peer_id: u64,
    state: ViewerState,
    /// Failed attempts since last live
    failures: u32,
    awaiting_offer: bool,
    announce_at: Instant,
    heartbeat_at: Instant,
    retry_at: Instant,
    connect_deadline: Option<Instant>,
}

impl ViewerTask {
    async fn run(mut self) {
        self.connect_attempt();

        while !self.state.is_ended() {
            let deadline = self.next_wake();
            // Signaling first: a stream update must be seen before the
            // transport loss it announces
            let wake = tokio::select! {
                biased;
                message = self.inbox.recv() => Wake::Signal(message),
                event = next_peer_event(&mut self.peer_events) => Wake::Peer(event),
                _ = sleep_until(deadline) => Wake::Timer,
            };

            match wake {
                Wake::Signal(Ok(message)) => {
                    if let Some(inbound) = for_viewer(message, &self.shared.viewer_id) {
                        self.on_signal(inbound).await;
                    }
                }
                Wake::Signal(Err(SignalingError::Closed)) => self.end(EndReason::SignalingClosed),
                Wake::Signal(Err(e)) => {
                    tracing::debug!(viewer_id = %self.shared.viewer_id, error = %e, "Signaling receive error");
                }
                Wake::Peer(Some(event)) => self.on_peer_event(event),
                Wake::Peer(None) => self.peer_events = None,
                Wake::Timer => self.on_timer(),
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let timer = match self.state {
            ViewerState::Connecting if self.awaiting_offer => Some(self.announce_at),
            ViewerState::Live => Some(self.heartbeat_at),
            ViewerState::Reconnecting { .. } => Some(self.retry_at),
            _ => None,
        };
        match (timer, self.connect_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_timer(&mut self) {
        let now = Instant::now();

        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            tracing::warn!(viewer_id = %self.shared.viewer_id, "Connection attempt timed out");
            self.begin_reconnect();
            return;
        }

        match self.state {
            ViewerState::Reconnecting { .. } if now >= self.retry_at => self.connect_attempt(),
            ViewerState::Connecting if self.awaiting_offer && now >= self.announce_at => {
                self.announce_at = now + self.config.announce_interval;
                if !self.announce() {
                    self.begin_reconnect();
                }
            }
            ViewerState::Live if now >= self.heartbeat_at => {
                self.heartbeat_at = now + self.config.heartbeat_interval;
                self.shared.tally.lock().stats.heartbeats += 1;
                let heartbeat =
                    SignalingMessage::heartbeat(self.shared.viewer_id.clone(), self.session_id.clone());
                if !self.send(heartbeat) {
                    self.begin_reconnect();
                }
            }
            _ => {}
        }
    }

    /// Enter Connecting and announce
    fn connect_attempt(&mut self) {
        let now = Instant::now();
        self.awaiting_offer = true;
        self.announce_at = now + self.config.announce_interval;
        self.connect_deadline = Some(now + self.config.connect_timeout);
        self.set_state(ViewerState::Connecting);

        if !self.announce() {
            self.begin_reconnect();
        }
    }

    fn announce(&mut self) -> bool {
        self.shared.tally.lock().stats.announcements += 1;
        let join = SignalingMessage::join(self.shared.viewer_id.clone(), self.session_id.clone());
        self.send(join)
    }

    fn send(&self, message: SignalingMessage) -> bool {
        match self.shared.publish(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(viewer_id = %self.shared.viewer_id, error = %e, "Failed to publish");
                false
            }
        }
    }

    async fn on_signal(&mut self, inbound: ViewerInbound) {
        match inbound {
            ViewerInbound::StreamUpdate(info) => {
                if info.session_id != self.session_id {
                    if !self.admitted {
                        // Updates go to every subscriber; only the broadcaster's
                        // offer says our link was accepted
                        tracing::debug!(
                            viewer_id = %self.shared.viewer_id,
                            session_id = %info.session_id,
                            "Stream update before admission ignored"
                        );
                        return;
                    }
                    self.known_sessions.insert(info.session_id.clone());
                    tracing::info!(
                        viewer_id = %self.shared.viewer_id,
                        session_id = %info.session_id,
                        mode = ?info.mode,
                        "Stream updated"
                    );
                    self.adopt(&info.session_id);
                    self.await_renegotiation();
                }
                self.emit(ViewerEvent::StreamUpdated(info));
            }
            ViewerInbound::StopStream => {
                tracing::info!(viewer_id = %self.shared.viewer_id, "Broadcaster stopped the stream");
                self.end(EndReason::StreamStopped);
            }
            ViewerInbound::Offer(offer) => self.on_offer(offer).await,
            ViewerInbound::Candidate(candidate) => self.on_remote_candidate(candidate).await,
        }
    }

    async fn on_offer(&mut self, offer: Offer) {
        // Before admission any offer addressed to us means our join was
        // accepted, possibly under a newer id than the link's
        if self.admitted && !self.known_sessions.contains(&offer.session_id) {
            tracing::debug!(
                viewer_id = %self.shared.viewer_id,
                session_id = %offer.session_id,
                "Offer for unknown session ignored"
            );
            return;
        }
        self.adopt(&offer.session_id);

        // A new offer replaces whatever connection exists
        self.close_peer();

        let (tx, rx) = mpsc::unbounded_channel();
        let rtc: Arc<dyn RtcPeer> = match self.transport.create_peer(tx).await {
            Ok(peer) => Arc::from(peer),
            Err(e) => {
                tracing::warn!(viewer_id = %self.shared.viewer_id, error = %e, "Failed to create connection");
                self.begin_reconnect();
                return;
            }
        };
        if !self.shared.install_peer(&rtc) {
            return;
        }

        self.next_peer_id += 1;
        let mut session = PeerSession::new(
            PeerSessionId(self.next_peer_id),
            self.shared.viewer_id.clone(),
            offer.session_id.clone(),
            PeerRole::Answerer,
            rtc,
        );

        let sdp_answer = match session.answer(&offer.sdp_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                session.close();
                self.shared.clear_peer();
                if let NegotiationError::Transport(TransportError::InvalidDescription(_)) = e {
                    // Offer from a connection the broadcaster already replaced
                    tracing::debug!(viewer_id = %self.shared.viewer_id, error = %e, "Stale offer ignored");
                } else {
                    tracing::warn!(viewer_id = %self.shared.viewer_id, error = %e, "Failed to answer offer");
                    self.begin_reconnect();
                }
                return;
            }
        };

        self.peer = Some(session);
        self.peer_events = Some(rx);

        let answer = SignalingMessage::SignalAnswer(Answer {
            viewer_id: self.shared.viewer_id.clone(),
            sdp_answer,
        });
        if !self.send(answer) {
            self.begin_reconnect();
            return;
        }

        self.shared.tally.lock().stats.offers_answered += 1;
        if !self.admitted {
            self.admitted = true;
            tracing::debug!(viewer_id = %self.shared.viewer_id, session_id = %offer.session_id, "Admitted");
        }
        self.known_sessions.insert(offer.session_id.clone());
        self.awaiting_offer = false;
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        if let ViewerState::Reconnecting { .. } = self.state {
            self.set_state(ViewerState::Connecting);
        }

        tracing::debug!(
            viewer_id = %self.shared.viewer_id,
            session_id = %offer.session_id,
            mode = ?offer.mode,
            "Offer answered"
        );
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(peer) = self.peer.as_mut() else {
            tracing::debug!(viewer_id = %self.shared.viewer_id, "Candidate without connection dropped");
            return;
        };
        if let Err(e) = peer.add_remote_candidate(candidate).await {
            tracing::debug!(viewer_id = %self.shared.viewer_id, error = %e, "Remote candidate rejected");
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let message = SignalingMessage::SignalIce(Candidate {
                    viewer_id: self.shared.viewer_id.clone(),
                    candidate,
                });
                if !self.send(message) {
                    self.begin_reconnect();
                }
            }
            PeerEvent::StateChanged(state) => {
                if let Some(peer) = self.peer.as_mut() {
                    peer.on_transport_state(state);
                }
                if state.is_failure() {
                    tracing::warn!(viewer_id = %self.shared.viewer_id, state = ?state, "Transport lost");
                    self.begin_reconnect();
                }
            }
            PeerEvent::TrackReceived(track) => {
                tracing::debug!(viewer_id = %self.shared.viewer_id, track = %track.id, "Track received");
                self.awaiting_offer = false;
                self.connect_deadline = None;
                self.emit(ViewerEvent::TrackReceived(track));
                if !self.state.is_live() {
                    self.go_live();
                }
            }
            PeerEvent::Media(chunk) => {
                self.shared.tally.lock().stats.chunks_received += 1;
                if let Some(ref dvr) = self.dvr {
                    dvr.lock().push(chunk);
                }
            }
        }
    }

    fn go_live(&mut self) {
        self.failures = 0;
        self.heartbeat_at = Instant::now() + self.config.heartbeat_interval;
        self.set_state(ViewerState::Live);
    }

    /// The broadcaster replaced its source and will offer again
    ///
    /// The current connection belongs to the old source. It is dropped here so
    /// its closing is not mistaken for a failure; only a missing offer counts.
    fn await_renegotiation(&mut self) {
        if self.peer.is_none() {
            return;
        }
        self.close_peer();
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        tracing::debug!(viewer_id = %self.shared.viewer_id, "Awaiting renegotiation");
    }

    /// Count a failed attempt and schedule the next, or give up
    fn begin_reconnect(&mut self) {
        self.close_peer();
        self.connect_deadline = None;

        let policy = &self.config.reconnect;
        if self.failures >= policy.max_attempts {
            tracing::warn!(
                viewer_id = %self.shared.viewer_id,
                attempts = self.failures,
                "Reconnect budget exhausted"
            );
            self.end(EndReason::ReconnectBudgetExhausted);
            return;
        }

        let delay = policy.delay(self.failures);
        self.failures += 1;
        self.retry_at = Instant::now() + delay;
        self.shared.tally.lock().stats.reconnect_attempts += 1;

        let attempt = self.failures;
        tracing::info!(
            viewer_id = %self.shared.viewer_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        self.set_state(ViewerState::Reconnecting { attempt });
        self.emit(ViewerEvent::Reconnecting { attempt, delay });
    }

    fn end(&mut self, reason: EndReason) {
        self.close_peer();
        self.connect_deadline = None;
        self.set_state(ViewerState::Ended(reason));
        self.emit(ViewerEvent::Ended(reason));
    }

    /// Follow `session_id`; a new source restarts the DVR timeline
    fn adopt(&mut self, session_id: &SessionId) {
        if self.session_id == *session_id {
            return;
        }
        self.session_id = session_id.clone();
        *self.shared.session_id.lock() = session_id.clone();
        if let Some(ref dvr) = self.dvr {
            dvr.lock().clear();
        }
    }

    fn close_peer(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.peer_events = None;
        self.shared.clear_peer();
    }

    fn set_state(&mut self, state: ViewerState) {
        if self.state == state {
            return;
        }

        {
            let mut tally = self.shared.tally.lock();
            if let Some(since) = tally.live_since.take() {
                tally.stats.live_time += since.elapsed();
            }
            if state.is_live() {
                tally.live_since = Some(Instant::now());
            }
        }

        tracing::info!(
            viewer_id = %self.shared.viewer_id,
            session_id = %self.session_id,
            from = %self.state,
            to = %state,
            "Viewer state changed"
        );
        self.state = state;
        self.shared.state.send_replace(state);
        self.emit(ViewerEvent::StateChanged(state));
    }

    fn emit(&self, event: ViewerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::debug!(viewer_id = %self.shared.viewer_id, event = ?event, "Viewer event dropped");
        }
    }
}
