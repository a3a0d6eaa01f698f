//! Viewer registry configuration

use std::time::Duration;

use serde::Deserialize;

/// Viewer registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// A viewer not heard from for longer than this is pruned
    pub stale_timeout: Duration,

    /// How often the prune pass runs
    pub prune_interval: Duration,

    /// Upper bound of the random delay before negotiating with a joiner
    pub negotiation_jitter: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(12),
            prune_interval: Duration::from_secs(5),
            negotiation_jitter: Duration::from_millis(250),
        }
    }
}

impl RegistryConfig {
    /// Set the liveness window
    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Set the prune interval
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Set the join negotiation jitter; zero negotiates immediately
    pub fn negotiation_jitter(mut self, jitter: Duration) -> Self {
        self.negotiation_jitter = jitter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.stale_timeout, Duration::from_secs(12));
        assert_eq!(config.prune_interval, Duration::from_secs(5));
        assert!(config.negotiation_jitter < Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"stale_timeout":{"secs":30,"nanos":0}}"#).unwrap();

        assert_eq!(config.stale_timeout, Duration::from_secs(30));
        assert_eq!(config.prune_interval, Duration::from_secs(5));
    }
}
