//! Session manager
//!
//! Owns the current source and the session identity. Only the manager
//! replaces the source, and the replacement is published to the orchestrator
//! before any offer for it is built.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};
use crate::media::{MediaCapture, SourceRequest, TrackSet};
use crate::registry::ViewerRegistry;
use crate::server::PeerOrchestrator;
use crate::signaling::{SignalingChannel, SignalingMessage};
use crate::types::SessionId;

use super::state::{LiveSource, Session, SourceWatch};

/// Broadcaster-side session lifecycle
pub struct SessionManager {
    capture: Arc<dyn MediaCapture>,
    channel: Arc<dyn SignalingChannel>,
    registry: Arc<ViewerRegistry>,
    orchestrator: PeerOrchestrator,
    source: watch::Sender<Option<Arc<LiveSource>>>,
    lineage: parking_lot::Mutex<HashSet<SessionId>>,
    // Serializes start, stop and switch
    transitions: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        capture: Arc<dyn MediaCapture>,
        channel: Arc<dyn SignalingChannel>,
        registry: Arc<ViewerRegistry>,
        orchestrator: PeerOrchestrator,
        source: watch::Sender<Option<Arc<LiveSource>>>,
    ) -> Self {
        Self {
            capture,
            channel,
            registry,
            orchestrator,
            source,
            lineage: parking_lot::Mutex::new(HashSet::new()),
            transitions: Mutex::new(()),
        }
    }

    /// Current session, if live
    pub fn current(&self) -> Option<Session> {
        self.source.borrow().as_ref().map(|live| live.session.clone())
    }

    /// Track set of the current source
    pub fn current_tracks(&self) -> Option<TrackSet> {
        self.source.borrow().as_ref().map(|live| live.tracks.clone())
    }

    pub fn is_live(&self) -> bool {
        self.source.borrow().is_some()
    }

    /// Read side of the current source
    pub fn subscribe(&self) -> SourceWatch {
        self.source.subscribe()
    }

    /// Whether `id` was issued by this broadcaster
    ///
    /// Links stay valid across source switches, so viewers holding an older
    /// id are still admitted.
    pub fn is_known_session(&self, id: &SessionId) -> bool {
        self.lineage.lock().contains(id)
    }

    /// Start broadcasting from a newly acquired source
    ///
    /// Acquisition failures are reported as [`Error::SourceUnavailable`] and
    /// leave any running session untouched. On success the previous session,
    /// if any, is replaced and every registered viewer is renegotiated.
    pub async fn start_session(&self, request: SourceRequest) -> Result<Session> {
        let _transition = self.transitions.lock().await;

        let tracks = self.acquire(&request).await?;
        let previous = self.source.send_replace(None);
        if let Some(ref previous) = previous {
            self.capture.release(&previous.tracks).await;
        }

        Ok(self.go_live(&request, tracks, previous.is_some()).await)
    }

    /// Stop broadcasting
    ///
    /// Releases the source, tells every viewer the stream ended, forgets
    /// every viewer and closes every peer session. Returns false when
    /// nothing was live.
    pub async fn stop_session(&self) -> bool {
        let _transition = self.transitions.lock().await;
        self.teardown("Session stopped").await
    }

    /// Tear everything down after the source disappeared on its own
    pub async fn source_lost(&self) -> bool {
        let _transition = self.transitions.lock().await;
        self.teardown("Source lost").await
    }

    /// Replace the source, keeping the viewer registry
    ///
    /// Peer sessions are torn down and rebuilt against the new source. The
    /// new stream is announced before the old connections close. If the new
    /// source cannot be acquired the broadcast ends as if stopped.
    pub async fn switch_source(&self, request: SourceRequest) -> Result<Session> {
        let _transition = self.transitions.lock().await;

        let previous = self.source.send_replace(None);
        if let Some(ref previous) = previous {
            self.capture.release(&previous.tracks).await;
        }

        let tracks = match self.acquire(&request).await {
            Ok(tracks) => tracks,
            Err(e) => {
                if previous.is_some() {
                    self.publish(SignalingMessage::stop());
                    self.registry.clear().await;
                    self.orchestrator.close_all().await;
                }
                return Err(e);
            }
        };

        if let Some(ref previous) = previous {
            tracing::info!(
                from = %previous.session.id,
                from_mode = %previous.session.mode,
                to_mode = %request.mode,
                "Switching source"
            );
        }
        Ok(self.go_live(&request, tracks, previous.is_some()).await)
    }

    async fn acquire(&self, request: &SourceRequest) -> Result<TrackSet> {
        self.capture.acquire(request).await.map_err(|e| {
            tracing::warn!(mode = %request.mode, error = %e, "Source unavailable");
            Error::SourceUnavailable(e)
        })
    }

    /// Publish a new session; `replacing` closes the previous session's peers
    /// once the update is out
    async fn go_live(&self, request: &SourceRequest, tracks: TrackSet, replacing: bool) -> Session {
        let session = Session::new(request);
        self.lineage.lock().insert(session.id.clone());

        // Visible to the orchestrator before any offer is built
        self.source.send_replace(Some(Arc::new(LiveSource {
            session: session.clone(),
            tracks,
        })));

        tracing::info!(
            session_id = %session.id,
            mode = %session.mode,
            resolution = %session.resolution.label,
            title = %session.title,
            "Session started"
        );

        self.publish(SignalingMessage::StreamUpdate(session.stream_info()));
        if replacing {
            self.orchestrator.close_all().await;
        }

        let viewers = self.registry.viewer_ids().await;
        if !viewers.is_empty() {
            self.orchestrator.renegotiate_all(&viewers).await;
        }
        session
    }

    async fn teardown(&self, reason: &'static str) -> bool {
        let Some(previous) = self.source.send_replace(None) else {
            return false;
        };

        self.capture.release(&previous.tracks).await;
        self.publish(SignalingMessage::stop());
        let viewers = self.registry.clear().await;
        self.orchestrator.close_all().await;

        tracing::info!(session_id = %previous.session.id, viewers, "{}", reason);
        true
    }

    fn publish(&self, message: SignalingMessage) {
        let kind = message.type_name();
        if let Err(e) = self.channel.publish(message) {
            tracing::warn!(kind, error = %e, "Failed to publish broadcast message");
        }
    }
}
