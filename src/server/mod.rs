//! Broadcaster side
//!
//! ```text
//!                 signaling channel
//!                        │
//!                        ▼
//!              Broadcaster::dispatch_loop
//!        ┌───────────────┼────────────────────┐
//!        ▼               ▼                    ▼
//!  ViewerRegistry   SessionManager      PeerOrchestrator
//!  join/heartbeat   start/stop/switch   negotiate/complete/ICE
//!        │               │ watch<LiveSource>  ▲
//!        │               └────────────────────┤
//!        └──── PeerLifecycle (schedule/close) ┘
//! ```

pub mod broadcaster;
pub mod config;
pub mod orchestrator;

pub use broadcaster::Broadcaster;
pub use config::BroadcasterConfig;
pub use orchestrator::{NegotiationOutcome, PeerOrchestrator, PeerSummary};
