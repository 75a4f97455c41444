//! Peer connection fan-out
//!
//! Manages the peer map and the two shared source tracks. Writing one RTP
//! payload to a source track makes the engine retransmit it on every
//! attached sender, so media is written once regardless of peer count.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{Mutex, RwLock};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::config::WebRtcConfig;

use super::FanOutError;

/// Callback for incoming data channel messages: (peer id, label, payload).
pub type DataMessageHandler = Arc<dyn Fn(String, String, Vec<u8>) + Send + Sync>;

/// A connected WebRTC peer.
pub struct Peer {
    pub id: String,
    pub connection: Arc<RTCPeerConnection>,

    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    audio_sender: Mutex<Option<Arc<RTCRtpSender>>>,

    /// Channels opened by the peer, in arrival order
    data_channels: Mutex<Vec<(String, Arc<RTCDataChannel>)>>,
}

/// One-to-many media distributor.
pub struct FanOut {
    api: API,
    rtc_config: RTCConfiguration,

    video_track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
    audio_track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,

    peers: Arc<RwLock<HashMap<String, Arc<Peer>>>>,

    on_data: DataMessageHandler,
}

impl FanOut {
    /// Build the WebRTC API from configuration. `on_data` receives every
    /// message a peer sends on any data channel.
    pub fn new(config: &WebRtcConfig, on_data: DataMessageHandler) -> Result<Self, FanOutError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| FanOutError::MediaError(format!("registering codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| FanOutError::ConnectionFailed(format!("registering interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        if let Some(range) = config.port_range {
            match EphemeralUDP::new(range.min, range.max) {
                Ok(udp) => setting_engine.set_udp_network(UDPNetwork::Ephemeral(udp)),
                Err(e) => warn!("invalid ephemeral UDP port range: {}", e),
            }
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
            video_track: RwLock::new(None),
            audio_track: RwLock::new(None),
            peers: Arc::new(RwLock::new(HashMap::new())),
            on_data,
        })
    }

    /// Publish the source video track, attaching it to every connected
    /// peer that does not yet carry a video sender.
    pub async fn set_video_track(&self, track: Arc<TrackLocalStaticRTP>) {
        *self.video_track.write().await = Some(track.clone());

        for peer in self.snapshot_peers().await {
            let mut sender = peer.video_sender.lock().await;
            if sender.is_none() {
                match Self::attach_track(&peer.connection, &track).await {
                    Ok(s) => *sender = Some(s),
                    Err(e) => warn!("adding video track to peer {}: {}", peer.id, e),
                }
            }
        }
    }

    /// Publish the source audio track; same attachment rules as video.
    pub async fn set_audio_track(&self, track: Arc<TrackLocalStaticRTP>) {
        *self.audio_track.write().await = Some(track.clone());

        for peer in self.snapshot_peers().await {
            let mut sender = peer.audio_sender.lock().await;
            if sender.is_none() {
                match Self::attach_track(&peer.connection, &track).await {
                    Ok(s) => *sender = Some(s),
                    Err(e) => warn!("adding audio track to peer {}: {}", peer.id, e),
                }
            }
        }
    }

    /// Drop both source tracks. Existing senders keep their bindings
    /// until the owning peers close.
    pub async fn clear_tracks(&self) {
        *self.video_track.write().await = None;
        *self.audio_track.write().await = None;
    }

    /// Create a peer connection for `id` and attach any existing tracks.
    pub async fn add_peer(&self, id: &str) -> Result<Arc<Peer>, FanOutError> {
        let connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config.clone())
                .await
                .map_err(|e| {
                    FanOutError::ConnectionFailed(format!("creating peer connection: {}", e))
                })?,
        );

        let peer = Arc::new(Peer {
            id: id.to_string(),
            connection: connection.clone(),
            video_sender: Mutex::new(None),
            audio_sender: Mutex::new(None),
            data_channels: Mutex::new(Vec::new()),
        });

        if let Some(track) = self.video_track.read().await.clone() {
            *peer.video_sender.lock().await =
                Some(Self::attach_track(&connection, &track).await?);
        }
        if let Some(track) = self.audio_track.read().await.clone() {
            *peer.audio_sender.lock().await =
                Some(Self::attach_track(&connection, &track).await?);
        }

        // Route data channel messages upward
        let on_data = self.on_data.clone();
        let peer_for_dc = peer.clone();
        let peer_id = id.to_string();
        connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let on_data = on_data.clone();
            let peer = peer_for_dc.clone();
            let peer_id = peer_id.clone();

            Box::pin(async move {
                let label = channel.label().to_string();
                debug!("peer {} opened data channel {:?}", peer_id, label);
                peer.data_channels
                    .lock()
                    .await
                    .push((label.clone(), channel.clone()));

                channel.on_message(Box::new(move |msg| {
                    let on_data = on_data.clone();
                    let peer_id = peer_id.clone();
                    let label = label.clone();
                    Box::pin(async move {
                        on_data(peer_id, label, msg.data.to_vec());
                    })
                }));
            })
        }));

        // Failed, closed, and disconnected peers are reaped here rather
        // than by the signaling layer
        let peers = self.peers.clone();
        let peer_id = id.to_string();
        connection.on_peer_connection_state_change(Box::new(move |state| {
            let peers = peers.clone();
            let peer_id = peer_id.clone();

            Box::pin(async move {
                info!("peer {} connection state: {}", peer_id, state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    // Cleanup in a fresh task so the callback never blocks
                    // on the peer map
                    tokio::spawn(async move {
                        if let Some(peer) = peers.write().await.remove(&peer_id) {
                            let _ = peer.connection.close().await;
                            debug!("peer {} removed after state change", peer_id);
                        }
                    });
                }
            })
        }));

        self.peers.write().await.insert(id.to_string(), peer.clone());
        Ok(peer)
    }

    /// Close and remove a peer. Safe to call for unknown ids.
    pub async fn remove_peer(&self, id: &str) {
        let peer = self.peers.write().await.remove(id);
        if let Some(peer) = peer {
            if let Err(e) = peer.connection.close().await {
                debug!("closing peer {}: {}", id, e);
            }
        }
    }

    pub async fn peer(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Apply a remote SDP offer for `id` (creating the peer if needed)
    /// and return the local answer SDP.
    pub async fn handle_offer(&self, id: &str, offer_sdp: &str) -> Result<String, FanOutError> {
        let peer = match self.peer(id).await {
            Some(peer) => peer,
            None => self.add_peer(id).await?,
        };

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| FanOutError::SdpError(format!("invalid offer: {}", e)))?;
        peer.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| FanOutError::SdpError(format!("setting remote description: {}", e)))?;

        let answer = peer
            .connection
            .create_answer(None)
            .await
            .map_err(|e| FanOutError::SdpError(format!("creating answer: {}", e)))?;
        peer.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| FanOutError::SdpError(format!("setting local description: {}", e)))?;

        Ok(answer.sdp)
    }

    /// Install a handler for locally gathered ICE candidates on a peer.
    pub async fn on_ice_candidate(
        &self,
        id: &str,
        handler: impl Fn(RTCIceCandidateInit) + Send + Sync + 'static,
    ) -> Result<(), FanOutError> {
        let peer = self
            .peer(id)
            .await
            .ok_or_else(|| FanOutError::PeerNotFound(id.to_string()))?;

        peer.connection.on_ice_candidate(Box::new(move |candidate| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => handler(init),
                    Err(e) => debug!("serializing ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        Ok(())
    }

    /// Apply a trickled remote ICE candidate.
    pub async fn add_ice_candidate(
        &self,
        id: &str,
        candidate: RTCIceCandidateInit,
    ) -> Result<(), FanOutError> {
        let peer = self
            .peer(id)
            .await
            .ok_or_else(|| FanOutError::PeerNotFound(id.to_string()))?;

        peer.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| FanOutError::IceError(format!("adding ICE candidate: {}", e)))
    }

    /// Close every peer connection and forget the tracks.
    pub async fn close(&self) {
        let peers: Vec<Arc<Peer>> = self.peers.write().await.drain().map(|(_, p)| p).collect();
        for peer in peers {
            let _ = peer.connection.close().await;
        }
        self.clear_tracks().await;
    }

    async fn snapshot_peers(&self) -> Vec<Arc<Peer>> {
        self.peers.read().await.values().cloned().collect()
    }

    async fn attach_track(
        connection: &Arc<RTCPeerConnection>,
        track: &Arc<TrackLocalStaticRTP>,
    ) -> Result<Arc<RTCRtpSender>, FanOutError> {
        let sender = connection
            .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| FanOutError::MediaError(format!("adding track: {}", e)))?;

        // Inbound RTCP is consumed by the interceptor chain; this loop
        // only drains the sender until it closes
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        Ok(sender)
    }
}

/// New source video track for the given RTP MIME type (H.264 by default).
pub fn create_video_track(mime_type: Option<&str>) -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.unwrap_or(MIME_TYPE_H264).to_string(),
            ..Default::default()
        },
        "video".to_string(),
        "gamecast-video".to_string(),
    ))
}

/// New Opus source audio track.
pub fn create_audio_track() -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            ..Default::default()
        },
        "audio".to_string(),
        "gamecast-audio".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_handler() -> DataMessageHandler {
        Arc::new(|_, _, _| {})
    }

    #[tokio::test]
    async fn add_and_remove_peer() {
        let fanout = FanOut::new(&WebRtcConfig::default(), noop_handler()).unwrap();

        let peer = fanout.add_peer("p1").await.unwrap();
        assert_eq!(peer.id, "p1");
        assert_eq!(fanout.peer_count().await, 1);
        assert!(fanout.peer("p1").await.is_some());

        fanout.remove_peer("p1").await;
        assert_eq!(fanout.peer_count().await, 0);

        // Removing an unknown peer is harmless
        fanout.remove_peer("p1").await;
    }

    #[tokio::test]
    async fn tracks_attach_to_existing_peers() {
        let fanout = FanOut::new(&WebRtcConfig::default(), noop_handler()).unwrap();
        let peer = fanout.add_peer("p1").await.unwrap();
        assert!(peer.video_sender.lock().await.is_none());

        fanout.set_video_track(create_video_track(None)).await;
        assert!(peer.video_sender.lock().await.is_some());

        fanout.set_audio_track(create_audio_track()).await;
        assert!(peer.audio_sender.lock().await.is_some());
    }

    #[tokio::test]
    async fn tracks_attach_to_new_peers() {
        let fanout = FanOut::new(&WebRtcConfig::default(), noop_handler()).unwrap();
        fanout.set_video_track(create_video_track(None)).await;
        fanout.set_audio_track(create_audio_track()).await;

        let peer = fanout.add_peer("p1").await.unwrap();
        assert!(peer.video_sender.lock().await.is_some());
        assert!(peer.audio_sender.lock().await.is_some());
    }

    #[tokio::test]
    async fn ice_candidate_for_unknown_peer_is_an_error() {
        let fanout = FanOut::new(&WebRtcConfig::default(), noop_handler()).unwrap();
        let counted = Arc::new(AtomicUsize::new(0));
        let counted_cb = counted.clone();

        let err = fanout
            .on_ice_candidate("missing", move |_| {
                counted_cb.fetch_add(1, Ordering::Relaxed);
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::PeerNotFound(_)));

        let err = fanout
            .add_ice_candidate(
                "missing",
                RTCIceCandidateInit {
                    candidate: String::new(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::PeerNotFound(_)));
        assert_eq!(counted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn close_clears_everything() {
        let fanout = FanOut::new(&WebRtcConfig::default(), noop_handler()).unwrap();
        fanout.set_video_track(create_video_track(None)).await;
        fanout.add_peer("p1").await.unwrap();
        fanout.add_peer("p2").await.unwrap();

        fanout.close().await;
        assert_eq!(fanout.peer_count().await, 0);
        assert!(fanout.video_track.read().await.is_none());
    }
}
