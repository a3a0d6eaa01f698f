//! DVR ring buffer for viewer-side rewind
//!
//! The viewer keeps the trailing `window` of live media as small time-stamped
//! chunks. Seeking snapshots the buffered chunks into a single playable
//! artifact; buffering of new live chunks continues while the artifact plays,
//! so the viewer can always return to the true live edge.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::Deserialize;

/// Shared handle used by the viewer connection (writer) and the player (reader)
pub type SharedDvr = Arc<parking_lot::Mutex<DvrBuffer>>;

/// DVR configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DvrConfig {
    /// Longest span of media kept for rewind
    pub window: Duration,
    /// Hard cap on buffered bytes
    pub max_bytes: usize,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(120),
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl DvrConfig {
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn max_bytes(mut self, max: usize) -> Self {
        self.max_bytes = max;
        self
    }
}

/// A small piece of received live media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Stream time of the first sample, in milliseconds
    pub timestamp: u64,
    /// Playback length in milliseconds
    pub duration: u32,
    pub data: Bytes,
}

impl MediaChunk {
    pub fn new(timestamp: u64, duration: u32, data: Bytes) -> Self {
        Self {
            timestamp,
            duration,
            data,
        }
    }

    /// Stream time just past the last sample
    pub fn end(&self) -> u64 {
        self.timestamp.saturating_add(self.duration as u64)
    }
}

/// What the player is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Following the live feed
    Live,
    /// Playing the replay artifact from `offset` into it
    Replay { offset: Duration },
}

/// Snapshot of the buffer materialized for playback
#[derive(Debug, Clone)]
pub struct ReplayArtifact {
    /// Concatenated chunk payloads
    pub data: Bytes,
    /// Stream time of the first byte
    pub start: u64,
    /// Stream time just past the last byte
    pub end: u64,
    /// Requested playback position relative to `start`
    pub offset: Duration,
    pub chunk_count: usize,
}

impl ReplayArtifact {
    pub fn span(&self) -> Duration {
        Duration::from_millis(self.end - self.start)
    }
}

/// Errors returned by seek operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DvrError {
    #[error("nothing buffered yet")]
    Empty,
    #[error("offset {requested:?} is outside the buffered span {available:?}")]
    OffsetOutOfRange {
        requested: Duration,
        available: Duration,
    },
}

/// Bounded ring of live media chunks
#[derive(Debug)]
pub struct DvrBuffer {
    config: DvrConfig,
    chunks: VecDeque<MediaChunk>,
    current_size: usize,
    playback: Playback,
    artifact: Option<ReplayArtifact>,
}

impl DvrBuffer {
    pub fn new() -> Self {
        Self::with_config(DvrConfig::default())
    }

    pub fn with_config(config: DvrConfig) -> Self {
        Self {
            config,
            chunks: VecDeque::new(),
            current_size: 0,
            playback: Playback::Live,
            artifact: None,
        }
    }

    /// Wrap a new buffer for sharing with a viewer connection
    pub fn shared(config: DvrConfig) -> SharedDvr {
        Arc::new(parking_lot::Mutex::new(Self::with_config(config)))
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Append a live chunk and evict everything that fell out of the window
    ///
    /// Returns false if the chunk was rejected: it goes back in time, or it
    /// alone is longer than the window or the byte cap.
    pub fn push(&mut self, chunk: MediaChunk) -> bool {
        let size = chunk.data.len();

        if Duration::from_millis(chunk.duration as u64) > self.config.window
            || size > self.config.max_bytes
        {
            tracing::warn!(
                timestamp = chunk.timestamp,
                duration_ms = chunk.duration,
                size,
                "DVR chunk larger than the buffer, dropped"
            );
            return false;
        }

        if let Some(last) = self.chunks.back() {
            if chunk.timestamp < last.end() {
                tracing::debug!(
                    timestamp = chunk.timestamp,
                    live_edge = last.end(),
                    "Out-of-order DVR chunk dropped"
                );
                return false;
            }
        }

        self.current_size += size;
        self.chunks.push_back(chunk);
        self.evict();
        true
    }

    fn evict(&mut self) {
        let window_ms = self.config.window.as_millis() as u64;
        let Some(edge) = self.live_edge() else {
            return;
        };

        while let Some(head) = self.chunks.front() {
            let too_old = edge - head.timestamp > window_ms;
            let too_big = self.current_size > self.config.max_bytes;
            if !(too_old || too_big) {
                break;
            }
            if let Some(old) = self.chunks.pop_front() {
                self.current_size -= old.data.len();
            }
        }
    }

    /// Stream time just past the newest chunk
    pub fn live_edge(&self) -> Option<u64> {
        self.chunks.back().map(MediaChunk::end)
    }

    /// Duration covered by the buffered chunks
    pub fn span(&self) -> Duration {
        match (self.chunks.front(), self.chunks.back()) {
            (Some(first), Some(last)) => Duration::from_millis(last.end() - first.timestamp),
            _ => Duration::ZERO,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn artifact(&self) -> Option<&ReplayArtifact> {
        self.artifact.as_ref()
    }

    /// Switch playback to a snapshot of the buffer, `offset` after its head
    ///
    /// Later chunks keep arriving through [`push`](Self::push) while the
    /// snapshot plays.
    pub fn seek_to(&mut self, offset: Duration) -> Result<&ReplayArtifact, DvrError> {
        let (start, end) = match (self.chunks.front(), self.chunks.back()) {
            (Some(first), Some(last)) => (first.timestamp, last.end()),
            _ => return Err(DvrError::Empty),
        };

        let available = Duration::from_millis(end - start);
        if offset > available {
            return Err(DvrError::OffsetOutOfRange {
                requested: offset,
                available,
            });
        }

        let mut data = BytesMut::with_capacity(self.current_size);
        for chunk in &self.chunks {
            data.extend_from_slice(&chunk.data);
        }

        tracing::debug!(
            offset_ms = offset.as_millis() as u64,
            span_ms = available.as_millis() as u64,
            chunks = self.chunks.len(),
            "DVR seek"
        );

        self.playback = Playback::Replay { offset };
        Ok(self.artifact.insert(ReplayArtifact {
            data: data.freeze(),
            start,
            end,
            offset,
            chunk_count: self.chunks.len(),
        }))
    }

    /// Drop the replay artifact and follow the live feed again
    ///
    /// Returns the live edge playback resumes at.
    pub fn return_to_live(&mut self) -> Option<u64> {
        self.artifact = None;
        self.playback = Playback::Live;
        self.live_edge()
    }

    /// Forget everything, e.g. when the broadcaster switches source
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_size = 0;
        self.artifact = None;
        self.playback = Playback::Live;
    }
}

impl Default for DvrBuffer {
    fn default() -> Self {
        Self::new()
    }
}
