//! In-process signaling medium
//!
//! A [`LocalBus`] holds one broadcast topic per broadcaster. Every
//! [`LocalChannel`] opened on a topic sees every message published to it,
//! including its own; role filtering happens in [`dispatch`](super::dispatch).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::channel::{SignalingChannel, SignalingError, Subscription};
use super::message::SignalingMessage;

/// Default number of undelivered messages a topic buffers per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

struct Inner {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<SignalingMessage>>>,
}

/// Shared in-process signaling medium; clones refer to the same bus
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a new endpoint on `topic`, creating the topic if needed
    pub fn channel(&self, topic: impl Into<String>) -> LocalChannel {
        let topic = topic.into();
        let tx = self
            .inner
            .topics
            .lock()
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone();

        LocalChannel {
            topic,
            tx,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of topics opened so far
    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint on a [`LocalBus`] topic
///
/// Clones share the endpoint, including its connectivity switch.
#[derive(Clone)]
pub struct LocalChannel {
    topic: String,
    tx: broadcast::Sender<SignalingMessage>,
    connected: Arc<AtomicBool>,
}

impl LocalChannel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Simulate losing or regaining the transport
    ///
    /// While disconnected, publishing fails with
    /// [`SignalingError::Unreachable`] and messages read from its
    /// subscriptions are discarded.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        tracing::debug!(topic = %self.topic, connected, "Local channel connectivity changed");
    }
}

impl SignalingChannel for LocalChannel {
    fn publish(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Unreachable(format!(
                "local channel {} is disconnected",
                self.topic
            )));
        }

        tracing::trace!(topic = %self.topic, kind = message.type_name(), "Publish");
        // No receivers just means nobody is listening yet
        let _ = self.tx.send(message);
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription, SignalingError> {
        Ok(Subscription::new(self.tx.subscribe()).gated(Arc::clone(&self.connected)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{SessionId, ViewerId};

    fn join(viewer: &str) -> SignalingMessage {
        SignalingMessage::join(ViewerId::new(viewer), SessionId::new("s-1"))
    }

    #[tokio::test]
    async fn test_fan_out_to_all_endpoints() {
        let bus = LocalBus::new();
        let a = bus.channel("room");
        let b = bus.channel("room");

        let mut sub_a = a.subscribe().unwrap();
        let mut sub_b = b.subscribe().unwrap();

        a.publish(join("v-1")).unwrap();

        assert_eq!(sub_a.recv().await.unwrap(), join("v-1"));
        assert_eq!(sub_b.recv().await.unwrap(), join("v-1"));
        assert_eq!(bus.topic_count(), 1);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::new();
        let a = bus.channel("room-a");
        let b = bus.channel("room-b");
        let mut sub_b = b.subscribe().unwrap();

        a.publish(join("v-1")).unwrap();

        let mut recv = tokio_test::task::spawn(sub_b.recv());
        tokio_test::assert_pending!(recv.poll());
    }

    #[tokio::test]
    async fn test_disconnected_endpoint() {
        let bus = LocalBus::new();
        let a = bus.channel("room");
        let b = bus.channel("room");
        let mut sub_b = b.subscribe().unwrap();

        a.set_connected(false);
        let err = a.publish(join("v-1")).unwrap_err();
        assert!(matches!(err, SignalingError::Unreachable(_)));

        a.set_connected(true);
        a.publish(join("v-2")).unwrap();
        assert_eq!(sub_b.recv().await.unwrap(), join("v-2"));

        // A disconnected reader discards what arrives
        b.set_connected(false);
        a.publish(join("v-3")).unwrap();
        let missed = tokio::time::timeout(Duration::from_millis(20), sub_b.recv()).await;
        assert!(missed.is_err());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_going() {
        let bus = LocalBus::with_capacity(2);
        let a = bus.channel("room");
        let mut sub = a.subscribe().unwrap();

        for i in 0..5 {
            a.publish(join(&format!("v-{i}"))).unwrap();
        }

        // Oldest messages were overwritten; the newest survive
        assert_eq!(sub.recv().await.unwrap(), join("v-3"));
        assert_eq!(sub.recv().await.unwrap(), join("v-4"));
    }
}
