//! Media sources and the capture facility boundary
//!
//! The concrete capture backend (camera, screen grab, file decode) lives
//! outside this crate. It hands back a [`TrackSet`] that is shared read-only
//! by every peer session built while it is the current source.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::TrackId;

/// Where the broadcast media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceMode {
    /// A camera device
    Camera,
    /// Screen or window capture
    Screen,
    /// A local file played in a loop
    File,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceMode::Camera => "camera",
            SourceMode::Screen => "screen",
            SourceMode::File => "file",
        };
        f.write_str(name)
    }
}

/// Requested capture resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    /// Human readable label such as "720p"
    pub label: String,
}

impl Resolution {
    pub fn new(width: u32, height: u32, label: impl Into<String>) -> Self {
        Self {
            width,
            height,
            label: label.into(),
        }
    }

    pub fn hd() -> Self {
        Self::new(1280, 720, "720p")
    }

    pub fn full_hd() -> Self {
        Self::new(1920, 1080, "1080p")
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::hd()
    }
}

/// What the broadcaster asks the capture facility for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub mode: SourceMode,
    pub resolution: Resolution,
    /// Title shown to viewers
    pub title: String,
    /// Device id for cameras or path for files; `None` lets the backend pick
    pub locator: Option<String>,
}

impl SourceRequest {
    pub fn new(mode: SourceMode, resolution: Resolution) -> Self {
        Self {
            mode,
            resolution,
            title: String::new(),
            locator: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }
}

/// Kind of media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One captured (or received) media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub label: String,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
            label: label.into(),
        }
    }
}

static NEXT_TRACK_SET: AtomicU64 = AtomicU64::new(1);

/// Identity of one acquisition; two acquisitions never share an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackSetId(u64);

impl TrackSetId {
    pub fn next() -> Self {
        Self(NEXT_TRACK_SET.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracks-{}", self.0)
    }
}

/// The tracks produced by one successful acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSet {
    pub id: TrackSetId,
    pub mode: SourceMode,
    pub tracks: Vec<MediaTrack>,
}

impl TrackSet {
    pub fn new(mode: SourceMode, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: TrackSetId::next(),
            mode,
            tracks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn video(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }
}

/// Typed acquisition failure reported by the capture facility
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("permission to capture was denied")]
    PermissionDenied,
    #[error("capture device is busy")]
    DeviceBusy,
    #[error("capture device not found")]
    DeviceNotFound,
    #[error("unsupported source: {0}")]
    Unsupported(String),
}

/// External media capture facility
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire a track set for the requested source
    async fn acquire(&self, request: &SourceRequest) -> Result<TrackSet, CaptureError>;

    /// Stop every track of a previously acquired set
    async fn release(&self, tracks: &TrackSet);
}
