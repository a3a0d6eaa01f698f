//! Signaling channel abstraction
//!
//! A channel is one endpoint on a shared signaling medium. Publishing never
//! blocks: transports queue internally and deliver at least once. Messages
//! from different senders may interleave in any order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::message::SignalingMessage;

/// Error type for signaling operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    /// The transport is disconnected; publishing is impossible for now
    #[error("signaling transport unreachable: {0}")]
    Unreachable(String),
    /// The medium was shut down; no more messages will arrive
    #[error("signaling channel closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Receiving side of a channel
pub struct Subscription {
    rx: broadcast::Receiver<SignalingMessage>,
    gate: Option<Arc<AtomicBool>>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<SignalingMessage>) -> Self {
        Self { rx, gate: None }
    }

    /// Discard messages that arrive while `gate` is false
    pub fn gated(mut self, gate: Arc<AtomicBool>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Wait for the next message
    pub async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    if let Some(ref gate) = self.gate {
                        if !gate.load(Ordering::Acquire) {
                            continue;
                        }
                    }
                    return Ok(message);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Signaling subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SignalingError::Closed),
            }
        }
    }
}

/// One endpoint on a signaling medium
pub trait SignalingChannel: Send + Sync {
    /// Queue a message for delivery to every other endpoint
    fn publish(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Start receiving messages published from now on
    fn subscribe(&self) -> Result<Subscription, SignalingError>;

    /// Whether the transport is currently usable
    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_drops_while_closed() {
        let (tx, rx) = broadcast::channel(8);
        let gate = Arc::new(AtomicBool::new(false));
        let mut sub = Subscription::new(rx).gated(Arc::clone(&gate));

        tx.send(SignalingMessage::stop()).unwrap();
        gate.store(true, Ordering::Release);
        tx.send(SignalingMessage::stop()).unwrap();
        drop(tx);

        assert_eq!(sub.recv().await.unwrap(), SignalingMessage::stop());
        assert_eq!(sub.recv().await, Err(SignalingError::Closed));
    }

    #[tokio::test]
    async fn test_ungated_delivers_everything() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new(rx);

        tx.send(SignalingMessage::stop()).unwrap();
        tx.send(SignalingMessage::stop()).unwrap();
        drop(tx);

        assert!(sub.recv().await.is_ok());
        assert!(sub.recv().await.is_ok());
        assert_eq!(sub.recv().await, Err(SignalingError::Closed));
    }
}
