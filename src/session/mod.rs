//! Broadcast sessions
//!
//! A session is one broadcast of one source. Starting or switching a source
//! always creates a new session with a new id; viewers detect a switch by
//! the id change in `STREAM_UPDATE`.

pub mod manager;
pub mod state;

pub use manager::SessionManager;
pub use state::{parse_session_link, LiveSource, Session, SourceWatch};
