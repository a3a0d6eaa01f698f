//! Synthetic capture facility

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::media::{
    CaptureError, MediaCapture, MediaTrack, SourceMode, SourceRequest, TrackKind, TrackSet,
    TrackSetId,
};

#[derive(Default)]
struct Inner {
    failures: Mutex<HashMap<SourceMode, CaptureError>>,
    active: Mutex<Vec<TrackSetId>>,
    acquisitions: AtomicU64,
}

/// Capture facility producing synthetic track sets
///
/// Cameras and files yield one video and one audio track, screens a single
/// video track. Failures can be injected per source mode.
#[derive(Clone, Default)]
pub struct LoopbackCapture {
    inner: Arc<Inner>,
}

impl LoopbackCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every acquisition of `mode` fail with `error`
    pub fn deny(&self, mode: SourceMode, error: CaptureError) {
        self.inner.failures.lock().insert(mode, error);
    }

    /// Undo [`deny`](Self::deny)
    pub fn allow(&self, mode: SourceMode) {
        self.inner.failures.lock().remove(&mode);
    }

    /// Track sets acquired and not yet released
    pub fn active(&self) -> Vec<TrackSetId> {
        self.inner.active.lock().clone()
    }
}

#[async_trait]
impl MediaCapture for LoopbackCapture {
    async fn acquire(&self, request: &SourceRequest) -> Result<TrackSet, CaptureError> {
        if let Some(error) = self.inner.failures.lock().get(&request.mode) {
            return Err(error.clone());
        }

        let n = self.inner.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
        let label = request
            .locator
            .clone()
            .unwrap_or_else(|| format!("{} {}", request.mode, request.resolution.label));

        let mut tracks = vec![MediaTrack::new(
            format!("{}-video-{n}", request.mode),
            TrackKind::Video,
            label.clone(),
        )];
        if request.mode != SourceMode::Screen {
            tracks.push(MediaTrack::new(
                format!("{}-audio-{n}", request.mode),
                TrackKind::Audio,
                label,
            ));
        }

        let set = TrackSet::new(request.mode, tracks);
        self.inner.active.lock().push(set.id);
        Ok(set)
    }

    async fn release(&self, tracks: &TrackSet) {
        self.inner.active.lock().retain(|id| *id != tracks.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Resolution;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let capture = LoopbackCapture::new();
        let request = SourceRequest::new(SourceMode::Camera, Resolution::hd());

        let set = capture.acquire(&request).await.unwrap();
        assert_eq!(set.tracks.len(), 2);
        assert_eq!(capture.active(), vec![set.id]);

        capture.release(&set).await;
        assert!(capture.active().is_empty());
    }

    #[tokio::test]
    async fn test_denied_mode() {
        let capture = LoopbackCapture::new();
        capture.deny(SourceMode::Screen, CaptureError::PermissionDenied);

        let request = SourceRequest::new(SourceMode::Screen, Resolution::hd());
        assert_eq!(
            capture.acquire(&request).await.unwrap_err(),
            CaptureError::PermissionDenied
        );

        capture.allow(SourceMode::Screen);
        let set = capture.acquire(&request).await.unwrap();
        assert_eq!(set.video().count(), 1);
        assert_eq!(set.tracks.len(), 1);
    }
}
