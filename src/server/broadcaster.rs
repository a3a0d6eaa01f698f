//! Broadcaster driver
//!
//! Wires the session manager, viewer registry and orchestrator to one
//! signaling channel and runs the dispatch loop.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Result;
use crate::media::{MediaCapture, SourceRequest};
use crate::peer::RtcTransport;
use crate::registry::ViewerRegistry;
use crate::session::{Session, SessionManager};
use crate::signaling::{
    for_broadcaster, BroadcasterInbound, LocalBus, Presence, SignalingChannel, SignalingMessage,
    Subscription,
};
use crate::stats::BroadcastStats;

use super::config::BroadcasterConfig;
use super::orchestrator::PeerOrchestrator;

/// One broadcaster process
pub struct Broadcaster {
    config: BroadcasterConfig,
    channel: Arc<dyn SignalingChannel>,
    registry: Arc<ViewerRegistry>,
    orchestrator: PeerOrchestrator,
    sessions: SessionManager,
    inbox: parking_lot::Mutex<Option<Subscription>>,
}

impl Broadcaster {
    /// Create a broadcaster on `channel`
    ///
    /// Subscribes immediately so nothing published after this returns is
    /// missed, even before [`run_until`](Self::run_until) starts.
    pub fn new(
        config: BroadcasterConfig,
        channel: Arc<dyn SignalingChannel>,
        capture: Arc<dyn MediaCapture>,
        transport: Arc<dyn RtcTransport>,
    ) -> Result<Self> {
        let inbox = channel.subscribe()?;
        let (source_tx, source_rx) = watch::channel(None);

        let orchestrator = PeerOrchestrator::new(
            transport,
            Arc::clone(&channel),
            source_rx,
            config.negotiation_timeout,
        );
        let registry = Arc::new(ViewerRegistry::with_config(
            config.registry.clone(),
            Arc::new(orchestrator.clone()),
        ));
        orchestrator.bind_registry(&registry);

        let sessions = SessionManager::new(
            capture,
            Arc::clone(&channel),
            Arc::clone(&registry),
            orchestrator.clone(),
            source_tx,
        );

        Ok(Self {
            config,
            channel,
            registry,
            orchestrator,
            sessions,
            inbox: parking_lot::Mutex::new(Some(inbox)),
        })
    }

    /// Create a broadcaster on the configured topic of a local bus
    pub fn on_bus(
        bus: &LocalBus,
        config: BroadcasterConfig,
        capture: Arc<dyn MediaCapture>,
        transport: Arc<dyn RtcTransport>,
    ) -> Result<Self> {
        let channel = Arc::new(bus.channel(config.signaling_topic.clone()));
        Self::new(config, channel, capture, transport)
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &PeerOrchestrator {
        &self.orchestrator
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// See [`SessionManager::start_session`]
    pub async fn start_session(&self, request: SourceRequest) -> Result<Session> {
        self.sessions.start_session(request).await
    }

    /// See [`SessionManager::switch_source`]
    pub async fn switch_source(&self, request: SourceRequest) -> Result<Session> {
        self.sessions.switch_source(request).await
    }

    /// See [`SessionManager::stop_session`]
    pub async fn stop_session(&self) -> bool {
        self.sessions.stop_session().await
    }

    /// Viewer link for the current session
    pub fn link(&self) -> Option<String> {
        self.sessions
            .current()
            .map(|session| session.link(&self.config.base_url))
    }

    /// Snapshot of the broadcast
    pub async fn stats(&self) -> BroadcastStats {
        let mut stats = BroadcastStats {
            session_id: self.sessions.current().map(|session| session.id),
            viewers: self.registry.len().await,
            viewers_pruned: self.registry.pruned_total(),
            ..Default::default()
        };
        self.orchestrator.fill_stats(&mut stats).await;
        stats
    }

    /// Run until the signaling channel closes
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the dispatch loop and the prune task until `shutdown` resolves
    ///
    /// The current session, if any, is stopped before returning.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let taken = self.inbox.lock().take();
        let mut inbox = match taken {
            Some(inbox) => inbox,
            None => self.channel.subscribe()?,
        };
        tracing::info!(topic = %self.config.signaling_topic, "Broadcaster listening");

        let prune_handle = self.registry.spawn_prune_task();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.dispatch_loop(&mut inbox) => result,
        };

        prune_handle.abort();
        self.sessions.stop_session().await;

        result
    }

    async fn dispatch_loop(&self, inbox: &mut Subscription) -> Result<()> {
        loop {
            let message = inbox.recv().await?;
            if let Some(inbound) = for_broadcaster(message) {
                self.handle(inbound).await;
            }
        }
    }

    /// Handle one viewer message
    pub async fn handle(&self, inbound: BroadcasterInbound) {
        match inbound {
            BroadcasterInbound::Join(presence) => self.on_join(presence).await,
            BroadcasterInbound::Heartbeat(presence) => {
                if self.sessions.is_live() && self.sessions.is_known_session(&presence.session_id) {
                    self.registry
                        .heartbeat(&presence.viewer_id, &presence.session_id)
                        .await;
                } else {
                    tracing::debug!(viewer_id = %presence.viewer_id, "Heartbeat for unknown session dropped");
                }
            }
            BroadcasterInbound::Leave(presence) => {
                self.registry.leave(&presence.viewer_id).await;
            }
            BroadcasterInbound::Answer(answer) => {
                if !self.registry.contains(&answer.viewer_id).await {
                    tracing::debug!(viewer_id = %answer.viewer_id, "Answer from unknown viewer dropped");
                    return;
                }
                if let Err(e) = self
                    .orchestrator
                    .complete(&answer.viewer_id, &answer.sdp_answer)
                    .await
                {
                    tracing::warn!(viewer_id = %answer.viewer_id, error = %e, "Failed to apply answer");
                }
            }
            BroadcasterInbound::Candidate(candidate) => {
                self.orchestrator
                    .add_remote_candidate(&candidate.viewer_id, candidate.candidate)
                    .await;
            }
        }
    }

    async fn on_join(&self, presence: Presence) {
        let Some(session) = self.sessions.current() else {
            tracing::debug!(viewer_id = %presence.viewer_id, "Join while not live ignored");
            return;
        };
        if !self.sessions.is_known_session(&presence.session_id) {
            tracing::debug!(
                viewer_id = %presence.viewer_id,
                session_id = %presence.session_id,
                "Join for unknown session dropped"
            );
            return;
        }

        // Announce the session the coming offer belongs to
        if let Err(e) = self
            .channel
            .publish(SignalingMessage::StreamUpdate(session.stream_info()))
        {
            tracing::warn!(error = %e, "Failed to publish stream update");
        }
        self.registry.join(&presence.viewer_id, &session.id).await;
    }
}
