//! Identifier types shared by broadcaster and viewer

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random hex token of `N` bytes
fn random_hex<const N: usize>() -> String {
    hex::encode(rand::rng().random::<[u8; N]>())
}

/// Milliseconds since the epoch rendered in base36
fn time_component() -> String {
    let mut millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::with_capacity(12);
    loop {
        out.push(DIGITS[(millis % 36) as usize]);
        millis /= 36;
        if millis == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Identifier of one broadcast session
///
/// Combines a time component with 64 random bits. Possession of the id
/// (through the session link) is the only authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, unguessable session id
    pub fn generate() -> Self {
        Self(format!("{}-{}", time_component(), random_hex::<8>()))
    }

    /// Wrap an id taken from a link or a message, without validation
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as it appears in links and on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one viewer, generated on the viewer side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(String);

impl ViewerId {
    /// Generate a random id of the form `v-` plus 12 hex chars
    pub fn generate() -> Self {
        Self(format!("v-{}", random_hex::<6>()))
    }

    /// Use a caller-chosen id, e.g. to keep the same id across restarts
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as it appears on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one captured media track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Id assigned by the capture facility
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-local identifier of one peer session (never sent on the wire)
///
/// Numbers grow monotonically per owner, so a larger id is a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerSessionId(pub u64);

impl fmt::Display for PeerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);

        // time component, dash, 16 hex chars
        let (time, random) = a.as_str().split_once('-').unwrap();
        assert!(!time.is_empty());
        assert_eq!(random.len(), 16);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_viewer_id_format() {
        let id = ViewerId::generate();
        assert!(id.as_str().starts_with("v-"));
        assert_eq!(id.as_str().len(), 2 + 12);
    }

    #[test]
    fn test_ids_from_str_match_new() {
        assert_eq!(SessionId::from("abc-1"), SessionId::new("abc-1"));
        assert_eq!(ViewerId::from("v-1").to_string(), "v-1");
        assert_eq!(TrackId::new("cam-video").as_str(), "cam-video");
        assert!(PeerSessionId(2) > PeerSessionId(1));
        assert_eq!(PeerSessionId(7).to_string(), "peer-7");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = ViewerId::new("v-abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"v-abc\"");
    }
}
