//! In-process transport connecting offerers and answerers of one network

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::media::{MediaChunk, MediaTrack};
use crate::peer::{
    IceCandidate, PeerEvent, PeerEventSender, PeerRole, RtcPeer, RtcTransport, Sdp,
    TransportError, TransportState,
};

const OFFER_PREFIX: &str = "loopback:offer:";
const ANSWER_PREFIX: &str = "loopback:answer:";

struct Endpoint {
    events: PeerEventSender,
    tracks: Vec<MediaTrack>,
    role: Option<PeerRole>,
    partner: Option<u64>,
    remote_set: bool,
    connected: bool,
}

impl Endpoint {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    endpoints: Mutex<HashMap<u64, Endpoint>>,
    failing_creates: AtomicUsize,
    candidates_applied: AtomicU64,
}

/// Shared in-process network; clones refer to the same network
///
/// Implements [`RtcTransport`] for both the broadcaster and its viewers. An
/// offer names its offerer, an answer names its answerer, and applying the
/// answer connects the pair: both report `Connected` and the answerer
/// receives every track the offerer attached.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Inner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_peers(&self, count: usize) {
        self.inner.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Drop every established connection, as a network outage would
    pub fn sever(&self) {
        let mut endpoints = self.inner.endpoints.lock();
        for endpoint in endpoints.values_mut().filter(|e| e.connected) {
            endpoint.connected = false;
            endpoint.emit(PeerEvent::StateChanged(TransportState::Disconnected));
        }
    }

    /// Deliver a media chunk to every connected answerer
    pub fn push_media(&self, chunk: MediaChunk) -> usize {
        let endpoints = self.inner.endpoints.lock();
        let mut delivered = 0;
        for endpoint in endpoints.values() {
            if endpoint.connected && endpoint.role == Some(PeerRole::Answerer) {
                endpoint.emit(PeerEvent::Media(chunk.clone()));
                delivered += 1;
            }
        }
        delivered
    }

    /// Connections created and not yet closed
    pub fn open_peers(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    /// Connections currently up
    pub fn connected_peers(&self) -> usize {
        self.inner
            .endpoints
            .lock()
            .values()
            .filter(|e| e.connected)
            .count()
    }

    /// Remote candidates accepted so far, across all connections
    pub fn candidates_applied(&self) -> u64 {
        self.inner.candidates_applied.load(Ordering::Relaxed)
    }
}

fn parse_id(sdp: &Sdp, prefix: &str) -> Result<u64, TransportError> {
    sdp.as_str()
        .strip_prefix(prefix)
        .and_then(|rest| rest.split(':').next())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| TransportError::InvalidDescription(sdp.to_string()))
}

#[async_trait]
impl RtcTransport for LoopbackNetwork {
    async fn create_peer(&self, events: PeerEventSender) -> Result<Box<dyn RtcPeer>, TransportError> {
        let failing = self.inner.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Create("loopback refused connection".into()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.endpoints.lock().insert(
            id,
            Endpoint {
                events,
                tracks: Vec::new(),
                role: None,
                partner: None,
                remote_set: false,
                connected: false,
            },
        );

        Ok(Box::new(LoopbackPeer {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// One endpoint on a [`LoopbackNetwork`]
pub struct LoopbackPeer {
    id: u64,
    inner: Arc<Inner>,
}

impl LoopbackPeer {
    fn host_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host", self.id, 40000 + self.id),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }
}

#[async_trait]
impl RtcPeer for LoopbackPeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        let mut endpoints = self.inner.endpoints.lock();
        let endpoint = endpoints.get_mut(&self.id).ok_or(TransportError::Closed)?;
        endpoint.tracks.push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<Sdp, TransportError> {
        let mut endpoints = self.inner.endpoints.lock();
        let endpoint = endpoints.get_mut(&self.id).ok_or(TransportError::Closed)?;
        endpoint.role = Some(PeerRole::Offerer);
        endpoint.emit(PeerEvent::LocalCandidate(self.host_candidate()));
        Ok(Sdp::new(format!("{OFFER_PREFIX}{}:{}", self.id, endpoint.tracks.len())))
    }

    async fn accept_offer(&self, offer: &Sdp) -> Result<Sdp, TransportError> {
        let offerer = parse_id(offer, OFFER_PREFIX)?;
        let mut endpoints = self.inner.endpoints.lock();
        if !endpoints.contains_key(&offerer) {
            return Err(TransportError::InvalidDescription(format!("offerer {offerer} is gone")));
        }

        let endpoint = endpoints.get_mut(&self.id).ok_or(TransportError::Closed)?;
        endpoint.role = Some(PeerRole::Answerer);
        endpoint.partner = Some(offerer);
        endpoint.remote_set = true;
        endpoint.emit(PeerEvent::LocalCandidate(self.host_candidate()));
        Ok(Sdp::new(format!("{ANSWER_PREFIX}{}", self.id)))
    }

    async fn apply_answer(&self, answer: &Sdp) -> Result<(), TransportError> {
        let answerer = parse_id(answer, ANSWER_PREFIX)?;
        let mut endpoints = self.inner.endpoints.lock();

        let tracks = {
            let endpoint = endpoints.get_mut(&self.id).ok_or(TransportError::Closed)?;
            endpoint.partner = Some(answerer);
            endpoint.remote_set = true;
            endpoint.tracks.clone()
        };

        let remote = endpoints
            .get_mut(&answerer)
            .filter(|e| e.partner == Some(self.id))
            .ok_or_else(|| TransportError::InvalidDescription(answer.to_string()))?;
        remote.connected = true;
        for track in tracks {
            remote.emit(PeerEvent::TrackReceived(track));
        }
        remote.emit(PeerEvent::StateChanged(TransportState::Connected));

        if let Some(local) = endpoints.get_mut(&self.id) {
            local.connected = true;
            local.emit(PeerEvent::StateChanged(TransportState::Connected));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let endpoints = self.inner.endpoints.lock();
        let endpoint = endpoints.get(&self.id).ok_or(TransportError::Closed)?;
        if !endpoint.remote_set {
            return Err(TransportError::InvalidCandidate(candidate.candidate.clone()));
        }
        self.inner.candidates_applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        let mut endpoints = self.inner.endpoints.lock();
        let Some(endpoint) = endpoints.remove(&self.id) else {
            return;
        };
        endpoint.emit(PeerEvent::StateChanged(TransportState::Closed));

        if let Some(partner) = endpoint.partner.and_then(|p| endpoints.get_mut(&p)) {
            if partner.connected && partner.partner == Some(self.id) {
                partner.connected = false;
                partner.emit(PeerEvent::StateChanged(TransportState::Disconnected));
            }
        }
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::media::TrackKind;

    #[tokio::test]
    async fn test_loopback_pairing_and_close() {
        let net = LoopbackNetwork::new();
        let (otx, mut orx) = mpsc::unbounded_channel();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let offerer = net.create_peer(otx).await.unwrap();
        let answerer = net.create_peer(atx).await.unwrap();

        offerer
            .add_track(&MediaTrack::new("v", TrackKind::Video, "cam"))
            .await
            .unwrap();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer).await.unwrap();
        offerer.apply_answer(&answer).await.unwrap();
        assert_eq!(net.connected_peers(), 2);

        let delivered = net.push_media(MediaChunk::new(0, 40, bytes::Bytes::from_static(b"x")));
        assert_eq!(delivered, 1);

        answerer.close();
        assert_eq!(net.open_peers(), 1);

        // Offerer learns that its partner went away
        let mut saw_disconnect = false;
        while let Ok(event) = orx.try_recv() {
            if let PeerEvent::StateChanged(TransportState::Disconnected) = event {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);

        let mut saw_media = false;
        while let Ok(event) = arx.try_recv() {
            saw_media |= matches!(event, PeerEvent::Media(_));
        }
        assert!(saw_media);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let net = LoopbackNetwork::new();
        net.fail_next_peers(1);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(net.create_peer(tx.clone()).await.is_err());
        assert!(net.create_peer(tx).await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_description_rejected() {
        let net = LoopbackNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = net.create_peer(tx).await.unwrap();

        let err = peer.accept_offer(&Sdp::new("v=0 garbage")).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidDescription(_)));
    }
}
