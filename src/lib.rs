//! Session and peer-connection lifecycle for one-to-many live broadcasts
//!
//! One broadcaster captures a source (camera, screen or file) and streams it
//! to any number of viewers over independent real-time peer connections,
//! coordinated through a publish/subscribe signaling channel.
//!
//! - [`server::Broadcaster`] owns the session, the viewer registry and one
//!   peer session per viewer.
//! - [`client::ViewerConnection`] joins through a session link, answers
//!   offers and reconnects with bounded backoff.
//! - [`signaling`] defines the message schema and the channel boundary;
//!   [`signaling::LocalBus`] is an in-process medium.
//! - [`peer`] wraps the external transport behind [`peer::RtcTransport`];
//!   [`loopback`] provides in-process capture and transport.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use castlink::client::ViewerConnection;
//! use castlink::loopback::{LoopbackCapture, LoopbackNetwork};
//! use castlink::media::{Resolution, SourceMode, SourceRequest};
//! use castlink::server::{Broadcaster, BroadcasterConfig};
//! use castlink::signaling::LocalBus;
//!
//! # async fn example() -> castlink::Result<()> {
//! let bus = LocalBus::new();
//! let net = LoopbackNetwork::new();
//! let broadcaster = Arc::new(Broadcaster::on_bus(
//!     &bus,
//!     BroadcasterConfig::default(),
//!     Arc::new(LoopbackCapture::new()),
//!     Arc::new(net.clone()),
//! )?);
//! let session = broadcaster
//!     .start_session(SourceRequest::new(SourceMode::Camera, Resolution::hd()))
//!     .await?;
//!
//! let runner = Arc::clone(&broadcaster);
//! tokio::spawn(async move { runner.run().await });
//!
//! let (viewer, _events) = ViewerConnection::builder(session.id)
//!     .connect(Arc::new(bus.channel("castlink")), Arc::new(net))?;
//! # drop(viewer);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod loopback;
pub mod media;
pub mod peer;
pub mod registry;
pub mod server;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod types;

pub use client::{ViewerConfig, ViewerConnection, ViewerEvent, ViewerState};
pub use error::{Error, Result};
pub use server::{Broadcaster, BroadcasterConfig};
pub use types::{SessionId, ViewerId};
