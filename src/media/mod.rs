//! Media handling
//!
//! This module provides:
//! - Source descriptions and the capture facility boundary
//! - The viewer-side DVR ring buffer

pub mod dvr;
pub mod source;

pub use dvr::{DvrBuffer, DvrConfig, DvrError, MediaChunk, Playback, ReplayArtifact, SharedDvr};
pub use source::{
    CaptureError, MediaCapture, MediaTrack, Resolution, SourceMode, SourceRequest, TrackKind,
    TrackSet, TrackSetId,
};
