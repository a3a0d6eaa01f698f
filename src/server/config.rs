//! Broadcaster configuration

use std::time::Duration;

use serde::Deserialize;

use crate::registry::RegistryConfig;

/// Broadcaster configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Viewer liveness settings
    pub registry: RegistryConfig,

    /// A negotiating peer session younger than this is not restarted by a
    /// repeated join
    pub negotiation_timeout: Duration,

    /// Signaling topic shared with viewers
    pub signaling_topic: String,

    /// Base of the viewer links handed out
    pub base_url: String,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            negotiation_timeout: Duration::from_secs(10),
            signaling_topic: "castlink".into(),
            base_url: "http://localhost:8080/".into(),
        }
    }
}

impl BroadcasterConfig {
    /// Set the registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the negotiation timeout
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set the signaling topic
    pub fn signaling_topic(mut self, topic: impl Into<String>) -> Self {
        self.signaling_topic = topic.into();
        self
    }

    /// Set the base URL for viewer links
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}
