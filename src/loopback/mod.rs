//! In-process implementations of the external facilities
//!
//! Used when broadcaster and viewers share one process, and by the test
//! suite. Pair with [`LocalBus`](crate::signaling::LocalBus) for signaling.

pub mod capture;
pub mod transport;

pub use capture::LoopbackCapture;
pub use transport::{LoopbackNetwork, LoopbackPeer};
