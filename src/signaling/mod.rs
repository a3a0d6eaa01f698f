//! Signaling
//!
//! Broadcaster and viewers exchange small JSON messages over a shared
//! publish/subscribe medium. Delivery is at least once with no ordering
//! guarantee across senders, so every handler tolerates duplicates and
//! messages for unknown viewers.
//!
//! | type               | direction            | payload                                   |
//! |--------------------|----------------------|-------------------------------------------|
//! | `VIEWER_JOIN`      | viewer → broadcaster | `viewerId`, `sessionId`                   |
//! | `VIEWER_HEARTBEAT` | viewer → broadcaster | `viewerId`, `sessionId`                   |
//! | `VIEWER_LEAVE`     | viewer → broadcaster | `viewerId`, `sessionId`                   |
//! | `STREAM_UPDATE`    | broadcaster → all    | `sessionId`, `title`, `mode`, `resolution`|
//! | `STOP_STREAM`      | broadcaster → all    | empty                                     |
//! | `SIGNAL_OFFER`     | broadcaster → viewer | `viewerId`, `sessionId`, `sdpOffer`, `mode` |
//! | `SIGNAL_ANSWER`    | viewer → broadcaster | `viewerId`, `sdpAnswer`                   |
//! | `SIGNAL_ICE`       | viewer → broadcaster | `viewerId`, `candidate`                   |
//! | `SIGNAL_ICE_ADMIN` | broadcaster → viewer | `viewerId`, `candidate`                   |

pub mod bus;
pub mod channel;
pub mod dispatch;
pub mod message;

pub use bus::{LocalBus, LocalChannel, DEFAULT_BUS_CAPACITY};
pub use channel::{SignalingChannel, SignalingError, Subscription};
pub use dispatch::{for_broadcaster, for_viewer, BroadcasterInbound, ViewerInbound};
pub use message::{
    Answer, Candidate, Direction, Offer, Presence, SignalingMessage, StopStream, StreamInfo,
};
