//! Viewer registry implementation
//!
//! Tracks which viewers are possibly watching. Records live as long as joins
//! or heartbeats keep arriving within the liveness window; every removal
//! closes the viewer's peer session through the [`PeerLifecycle`] hook.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::{PeerSessionId, SessionId, ViewerId};

use super::config::RegistryConfig;
use super::entry::{PeerLifecycle, ViewerRecord};

/// Result of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First time this viewer was seen
    New,
    /// The viewer was already registered and announced again
    Returning,
}

/// Registry of live viewers for the current broadcast
pub struct ViewerRegistry {
    viewers: RwLock<HashMap<ViewerId, ViewerRecord>>,
    lifecycle: Arc<dyn PeerLifecycle>,
    config: RegistryConfig,
    pruned: AtomicU64,
}

impl ViewerRegistry {
    pub fn new(lifecycle: Arc<dyn PeerLifecycle>) -> Self {
        Self::with_config(RegistryConfig::default(), lifecycle)
    }

    pub fn with_config(config: RegistryConfig, lifecycle: Arc<dyn PeerLifecycle>) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            lifecycle,
            config,
            pruned: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn jitter(&self) -> Duration {
        let max = self.config.negotiation_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Register or refresh a viewer and schedule a negotiation with it
    pub async fn join(&self, viewer_id: &ViewerId, session_id: &SessionId) -> JoinOutcome {
        let now = Instant::now();
        let outcome = {
            let mut viewers = self.viewers.write().await;
            match viewers.get_mut(viewer_id) {
                Some(record) => {
                    record.last_seen_at = now;
                    record.session_id = session_id.clone();
                    JoinOutcome::Returning
                }
                None => {
                    viewers.insert(
                        viewer_id.clone(),
                        ViewerRecord::new(viewer_id.clone(), session_id.clone(), now),
                    );
                    JoinOutcome::New
                }
            }
        };

        let delay = self.jitter();
        self.lifecycle.schedule_negotiation(viewer_id, delay);

        tracing::info!(
            viewer_id = %viewer_id,
            session_id = %session_id,
            returning = outcome == JoinOutcome::Returning,
            delay_ms = delay.as_millis() as u64,
            "Viewer joined"
        );
        outcome
    }

    /// Refresh a viewer's liveness
    ///
    /// An unknown viewer is registered without negotiating. Returns true if
    /// the viewer was already known.
    pub async fn heartbeat(&self, viewer_id: &ViewerId, session_id: &SessionId) -> bool {
        let now = Instant::now();
        let mut viewers = self.viewers.write().await;

        if let Some(record) = viewers.get_mut(viewer_id) {
            record.last_seen_at = now;
            return true;
        }

        viewers.insert(
            viewer_id.clone(),
            ViewerRecord::new(viewer_id.clone(), session_id.clone(), now),
        );
        tracing::debug!(viewer_id = %viewer_id, "Heartbeat from unknown viewer, registered");
        false
    }

    /// Remove a viewer and close its peer session
    pub async fn leave(&self, viewer_id: &ViewerId) -> bool {
        let removed = self.viewers.write().await.remove(viewer_id).is_some();

        // Close even when unknown: a scheduled negotiation may be pending
        self.lifecycle.close_peer(viewer_id).await;

        if removed {
            tracing::info!(viewer_id = %viewer_id, "Viewer left");
        }
        removed
    }

    /// Remove every viewer idle for longer than `timeout` at `now`
    pub async fn prune_stale(&self, now: Instant, timeout: Duration) -> Vec<ViewerId> {
        let stale: Vec<ViewerId> = {
            let mut viewers = self.viewers.write().await;
            let stale: Vec<ViewerId> = viewers
                .values()
                .filter(|record| record.is_stale(now, timeout))
                .map(|record| record.viewer_id.clone())
                .collect();
            for viewer_id in &stale {
                viewers.remove(viewer_id);
            }
            stale
        };

        for viewer_id in &stale {
            self.lifecycle.close_peer(viewer_id).await;
            tracing::info!(viewer_id = %viewer_id, "Viewer pruned");
        }
        self.pruned.fetch_add(stale.len() as u64, Ordering::Relaxed);

        stale
    }

    /// Run one prune pass with the configured timeout
    pub async fn prune(&self) -> Vec<ViewerId> {
        self.prune_stale(Instant::now(), self.config.stale_timeout)
            .await
    }

    /// Remove every viewer, closing each peer session
    pub async fn clear(&self) -> usize {
        let drained: Vec<ViewerId> = self.viewers.write().await.drain().map(|(id, _)| id).collect();

        for viewer_id in &drained {
            self.lifecycle.close_peer(viewer_id).await;
        }
        if !drained.is_empty() {
            tracing::info!(viewers = drained.len(), "Viewer registry cleared");
        }
        drained.len()
    }

    /// Record the peer session now serving `viewer_id`
    pub async fn attach_peer(&self, viewer_id: &ViewerId, peer: PeerSessionId) -> bool {
        match self.viewers.write().await.get_mut(viewer_id) {
            Some(record) => {
                record.peer = Some(peer);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, viewer_id: &ViewerId) -> Option<ViewerRecord> {
        self.viewers.read().await.get(viewer_id).cloned()
    }

    pub async fn contains(&self, viewer_id: &ViewerId) -> bool {
        self.viewers.read().await.contains_key(viewer_id)
    }

    /// Upper bound on the number of viewers possibly watching
    pub async fn len(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.viewers.read().await.is_empty()
    }

    pub async fn viewer_ids(&self) -> Vec<ViewerId> {
        self.viewers.read().await.keys().cloned().collect()
    }

    /// Viewers removed by pruning since creation
    pub fn pruned_total(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }

    /// Spawn the periodic prune task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_prune_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.prune_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.prune().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        scheduled: Mutex<Vec<(ViewerId, Duration)>>,
        closed: Mutex<Vec<ViewerId>>,
    }

    #[async_trait]
    impl PeerLifecycle for Recorder {
        fn schedule_negotiation(&self, viewer: &ViewerId, delay: Duration) {
            self.scheduled.lock().push((viewer.clone(), delay));
        }

        async fn close_peer(&self, viewer: &ViewerId) {
            self.closed.lock().push(viewer.clone());
        }
    }

    fn registry(config: RegistryConfig) -> (ViewerRegistry, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let registry = ViewerRegistry::with_config(config, recorder.clone());
        (registry, recorder)
    }

    fn session() -> SessionId {
        SessionId::new("s-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_schedules_negotiation() {
        let config = RegistryConfig::default().negotiation_jitter(Duration::from_millis(100));
        let (registry, recorder) = registry(config);
        let viewer = ViewerId::new("v-1");

        assert_eq!(registry.join(&viewer, &session()).await, JoinOutcome::New);
        assert_eq!(registry.join(&viewer, &session()).await, JoinOutcome::Returning);
        assert_eq!(registry.len().await, 1);

        let scheduled = recorder.scheduled.lock();
        assert_eq!(scheduled.len(), 2);
        assert!(scheduled.iter().all(|(v, d)| *v == viewer && *d <= Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_registers_without_negotiating() {
        let (registry, recorder) = registry(RegistryConfig::default());
        let viewer = ViewerId::new("v-1");

        assert!(!registry.heartbeat(&viewer, &session()).await);
        assert!(registry.heartbeat(&viewer, &session()).await);
        assert!(registry.contains(&viewer).await);
        assert!(recorder.scheduled.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_closes_peer() {
        let (registry, recorder) = registry(RegistryConfig::default());
        let viewer = ViewerId::new("v-1");

        registry.join(&viewer, &session()).await;
        assert!(registry.leave(&viewer).await);
        assert!(!registry.leave(&viewer).await);

        assert!(registry.is_empty().await);
        assert_eq!(recorder.closed.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_viewer_pruned() {
        let (registry, recorder) = registry(RegistryConfig::default());
        let stale = ViewerId::new("v-stale");
        let fresh = ViewerId::new("v-fresh");

        registry.join(&stale, &session()).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        registry.join(&fresh, &session()).await;
        tokio::time::advance(Duration::from_secs(3)).await;

        // 13s since the stale viewer was heard from, 3s for the fresh one
        let pruned = registry
            .prune_stale(Instant::now(), Duration::from_secs(12))
            .await;

        assert_eq!(pruned, vec![stale.clone()]);
        assert!(registry.contains(&fresh).await);
        assert!(!registry.contains(&stale).await);
        assert_eq!(*recorder.closed.lock(), vec![stale]);
        assert_eq!(registry.pruned_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_viewer_alive() {
        let (registry, _recorder) = registry(RegistryConfig::default());
        let viewer = ViewerId::new("v-1");

        registry.join(&viewer, &session()).await;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(5)).await;
            registry.heartbeat(&viewer, &session()).await;
            assert!(registry.prune().await.is_empty());
        }
        assert!(registry.contains(&viewer).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_record_outlives_timeout() {
        let (registry, _recorder) = registry(RegistryConfig::default().negotiation_jitter(Duration::ZERO));
        let timeout = Duration::from_secs(12);
        let viewers: Vec<ViewerId> = (0..8).map(|i| ViewerId::new(format!("v-{i}"))).collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let viewer = &viewers[rng.random_range(0..viewers.len())];
            match rng.random_range(0..5) {
                0 => {
                    registry.join(viewer, &session()).await;
                }
                1 => {
                    registry.heartbeat(viewer, &session()).await;
                }
                2 => {
                    registry.leave(viewer).await;
                }
                _ => {
                    tokio::time::advance(Duration::from_millis(rng.random_range(0..4000))).await;
                    let now = Instant::now();
                    registry.prune_stale(now, timeout).await;

                    for id in registry.viewer_ids().await {
                        let record = registry.get(&id).await.unwrap();
                        assert!(!record.is_stale(now, timeout));
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_closes_everyone() {
        let (registry, recorder) = registry(RegistryConfig::default());
        for i in 0..3 {
            registry.join(&ViewerId::new(format!("v-{i}")), &session()).await;
        }

        assert_eq!(registry.clear().await, 3);
        assert!(registry.is_empty().await);
        assert_eq!(recorder.closed.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_peer() {
        let (registry, _recorder) = registry(RegistryConfig::default());
        let viewer = ViewerId::new("v-1");

        assert!(!registry.attach_peer(&viewer, PeerSessionId(1)).await);
        registry.join(&viewer, &session()).await;
        assert!(registry.attach_peer(&viewer, PeerSessionId(1)).await);
        assert_eq!(registry.get(&viewer).await.unwrap().peer, Some(PeerSessionId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_task_runs_periodically() {
        let config = RegistryConfig::default()
            .stale_timeout(Duration::from_secs(12))
            .prune_interval(Duration::from_secs(5));
        let (registry, recorder) = registry(config);
        let registry = Arc::new(registry);
        let viewer = ViewerId::new("v-1");
        registry.join(&viewer, &session()).await;

        let handle = registry.spawn_prune_task();
        tokio::time::sleep(Duration::from_secs(16)).await;

        assert!(registry.is_empty().await);
        assert_eq!(*recorder.closed.lock(), vec![viewer]);
        handle.abort();
    }
}
