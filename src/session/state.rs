//! Broadcast session identity and viewer links

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;

use crate::media::{Resolution, SourceMode, SourceRequest, TrackSet};
use crate::signaling::StreamInfo;
use crate::types::SessionId;

/// Fragment separating the base URL from the session id in a viewer link
const VIEWER_ROUTE: &str = "#/viewer/";

/// One broadcast
///
/// Never mutated after creation; a new source always yields a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub mode: SourceMode,
    pub resolution: Resolution,
    pub created_at: SystemTime,
}

impl Session {
    /// Create a session with a fresh id for `request`
    pub fn new(request: &SourceRequest) -> Self {
        Self {
            id: SessionId::generate(),
            title: request.title.clone(),
            mode: request.mode,
            resolution: request.resolution.clone(),
            created_at: SystemTime::now(),
        }
    }

    /// Link a viewer opens to watch this session
    pub fn link(&self, base_url: &str) -> String {
        format!("{}{}{}", base_url.trim_end_matches('/'), VIEWER_ROUTE, self.id)
    }

    /// Payload announcing this session to viewers
    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            session_id: self.id.clone(),
            title: self.title.clone(),
            mode: self.mode,
            resolution: self.resolution.clone(),
        }
    }
}

/// Extract the session id from a viewer link
pub fn parse_session_link(link: &str) -> Option<SessionId> {
    let (_, rest) = link.split_once(VIEWER_ROUTE)?;
    let id = rest.split(['/', '?', '&']).next()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(SessionId::new(id))
}

/// The current session together with its captured tracks
#[derive(Debug)]
pub struct LiveSource {
    pub session: Session,
    pub tracks: TrackSet,
}

/// Read side of the current source; `None` while nothing is live
pub type SourceWatch = watch::Receiver<Option<Arc<LiveSource>>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(&SourceRequest::new(SourceMode::Screen, Resolution::full_hd()).title("Demo"))
    }

    #[test]
    fn test_link_roundtrip() {
        let session = session();
        let link = session.link("https://cast.example.org/");

        assert!(link.starts_with("https://cast.example.org/#/viewer/"));
        assert_eq!(parse_session_link(&link), Some(session.id));
    }

    #[test]
    fn test_parse_rejects_other_routes() {
        assert_eq!(parse_session_link("https://cast.example.org/#/admin"), None);
        assert_eq!(parse_session_link("https://cast.example.org/#/viewer/"), None);
        assert_eq!(
            parse_session_link("http://h/#/viewer/abc-123?autoplay=1"),
            Some(SessionId::new("abc-123"))
        );
    }

    #[test]
    fn test_every_session_is_new() {
        let a = session();
        let b = session();
        assert_ne!(a.id, b.id);

        let info = a.stream_info();
        assert_eq!(info.mode, SourceMode::Screen);
        assert_eq!(info.title, "Demo");
    }
}
