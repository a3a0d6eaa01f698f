//! Viewer configuration

use std::time::Duration;

use serde::Deserialize;

/// Bounded, backed-off reconnection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Factor applied per attempt
    pub growth: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(1500),
            growth: 1.5,
            max_delay: Duration::from_secs(15),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt`, counting from zero
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.growth.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Viewer configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Join re-announcement period while connecting
    pub announce_interval: Duration,

    /// Heartbeat period while live
    pub heartbeat_interval: Duration,

    /// How long one connection attempt may take before it counts as failed
    pub connect_timeout: Duration,

    pub reconnect: ReconnectPolicy,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            announce_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ViewerConfig {
    /// Set the announce interval
    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ViewerConfig::default();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert!(config.connect_timeout > config.announce_interval * 3);
        assert_eq!(config.reconnect.max_attempts, 8);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay(0), Duration::from_millis(1500));
        assert_eq!(policy.delay(1), Duration::from_millis(2250));
        assert_eq!(policy.delay(2), Duration::from_secs_f64(3.375));
        assert_eq!(policy.delay(6), Duration::from_secs(15));
        assert_eq!(policy.delay(100), Duration::from_secs(15));

        let delays: Vec<Duration> = (0..policy.max_attempts).map(|a| policy.delay(a)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_deserialize_policy() {
        let config: ViewerConfig =
            serde_json::from_str(r#"{"reconnect":{"max_attempts":3}}"#).unwrap();

        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(15));
    }
}
