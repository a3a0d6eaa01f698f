//! One broadcaster and a few viewers in a single process
//!
//! Run with: cargo run --example local_broadcast [VIEWERS]
//!
//! Starts a camera session, attaches viewers through the session link,
//! switches to screen sharing, feeds some media, rewinds the first viewer's
//! DVR and stops.
//! Set RUST_LOG to see the signaling traffic, e.g. `RUST_LOG=castlink=debug`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use castlink::client::ViewerConnection;
use castlink::loopback::{LoopbackCapture, LoopbackNetwork};
use castlink::media::{DvrBuffer, DvrConfig, MediaChunk, Resolution, SourceMode, SourceRequest};
use castlink::server::{Broadcaster, BroadcasterConfig};
use castlink::signaling::LocalBus;

async fn wait_live(viewers: &[ViewerConnection]) {
    for viewer in viewers {
        let mut state = viewer.watch_state();
        let _ = tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| s.is_live() || s.is_ended()),
        )
        .await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let count: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(3);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("castlink=info".parse()?)
                .add_directive("local_broadcast=debug".parse()?),
        )
        .init();

    let bus = LocalBus::new();
    let net = LoopbackNetwork::new();
    let config = BroadcasterConfig::default();
    let topic = config.signaling_topic.clone();

    let broadcaster = Arc::new(Broadcaster::on_bus(
        &bus,
        config,
        Arc::new(LoopbackCapture::new()),
        Arc::new(net.clone()),
    )?);

    broadcaster
        .start_session(SourceRequest::new(SourceMode::Camera, Resolution::hd()).title("Desk cam"))
        .await?;
    let link = broadcaster.link().ok_or("no live session")?;
    println!("Viewer link: {link}");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = Arc::clone(&broadcaster);
    let server = tokio::spawn(async move {
        runner
            .run_until(async {
                tokio::select! {
                    _ = stop_rx => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            })
            .await
    });

    let dvr = DvrBuffer::shared(DvrConfig::default().window(Duration::from_secs(30)));
    let mut viewers = Vec::with_capacity(count);
    for i in 0..count {
        let mut builder = ViewerConnection::from_link(&link).ok_or("malformed link")?;
        if i == 0 {
            builder = builder.dvr(Arc::clone(&dvr));
        }
        let (viewer, mut events) =
            builder.connect(Arc::new(bus.channel(topic.clone())), Arc::new(net.clone()))?;

        let viewer_id = viewer.viewer_id().clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(viewer_id = %viewer_id, event = ?event, "Viewer event");
            }
        });
        viewers.push(viewer);
    }

    wait_live(&viewers).await;
    println!("Stats: {:?}", broadcaster.stats().await);

    broadcaster
        .switch_source(
            SourceRequest::new(SourceMode::Screen, Resolution::full_hd()).title("Slides"),
        )
        .await?;
    println!("Switched, new link: {}", broadcaster.link().unwrap_or_default());

    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_live(&viewers).await;
    for viewer in &viewers {
        println!("{} -> {}", viewer.viewer_id(), viewer.state());
    }

    for i in 0..50u64 {
        net.push_media(MediaChunk::new(i * 40, 40, Bytes::from(vec![0u8; 512])));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let mut dvr = dvr.lock();
        match dvr.seek_to(Duration::from_millis(500)) {
            Ok(artifact) => println!(
                "Replay: {} chunks, {:?} buffered, starting {:?} in",
                artifact.chunk_count,
                artifact.span(),
                artifact.offset
            ),
            Err(e) => println!("Replay unavailable: {e}"),
        }
        dvr.return_to_live();
    }

    let _ = stop_tx.send(());
    server.await??;

    for viewer in &viewers {
        let reason = viewer.ended().await;
        let stats = viewer.stats();
        println!(
            "{} ended ({reason}): offers={} reconnects={} chunks={}",
            viewer.viewer_id(),
            stats.offers_answered,
            stats.reconnect_attempts,
            stats.chunks_received
        );
    }

    Ok(())
}
