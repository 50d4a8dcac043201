//! webrtc-rs transport backend
//!
//! Implements the transport and media capabilities on top of webrtc-rs:
//! one `RTCPeerConnection` per remote participant, H.264 video and Opus
//! audio, with ICE/connection callbacks translated into [`LinkEvent`]s.

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::media::{LocalMedia, LocalTrack, MediaError, MediaSource, RemoteMedia, TrackKind};
use crate::transport::{
    DataChannel, LinkEvent, LinkState, NegotiationError, PeerTransport, TransportFactory,
};

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

fn video_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/H264".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_string(),
        rtcp_feedback: vec![],
    }
}

fn audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// ICE server configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub stun_servers: Vec<String>,
    /// (url, username, credential)
    pub turn_servers: Vec<(String, String, String)>,
}

impl RtcConfig {
    pub fn load() -> Self {
        let stun_servers = std::env::var("STUN_SERVERS")
            .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string())
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let mut turn_servers = vec![];
        if let (Ok(url), Ok(username), Ok(credential)) = (
            std::env::var("TURN_SERVER"),
            std::env::var("TURN_USERNAME"),
            std::env::var("TURN_CREDENTIAL"),
        ) {
            turn_servers.push((url, username, credential));
        }

        Self {
            stun_servers,
            turn_servers,
        }
    }
}

/// Shared WebRTC engine: one API instance serving every peer link.
pub struct WebRtcEngine {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    pub fn new(config: RtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: video_capability(),
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: audio_capability(),
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut ice_servers = vec![];
        for stun_url in config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url],
                ..Default::default()
            });
        }
        for (url, username, credential) in config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![url],
                username,
                credential,
                ..Default::default()
            });
        }

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
    }
}

#[async_trait]
impl TransportFactory for WebRtcEngine {
    async fn open_link(
        &self,
        remote: &str,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerTransport>, NegotiationError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await.map_err(|e| {
            NegotiationError::LinkSetup {
                remote: remote.to_string(),
                reason: e.to_string(),
            }
        })?);

        let candidate_tx = events.clone();
        let candidate_remote = remote.to_string();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = candidate_tx.clone();
            let remote = candidate_remote.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(value) => {
                                let _ = tx.send(LinkEvent::LocalCandidate {
                                    remote,
                                    candidate: value,
                                });
                            }
                            Err(e) => tracing::warn!("failed to encode candidate: {}", e),
                        },
                        Err(e) => tracing::warn!("failed to serialize candidate: {}", e),
                    }
                }
            })
        }));

        let track_tx = events.clone();
        let track_remote = remote.to_string();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::info!(
                "remote track arrived: id={} kind={:?}",
                track.id(),
                track.kind()
            );
            let tx = track_tx.clone();
            let remote = track_remote.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let _ = tx.send(LinkEvent::RemoteTrack {
                    remote,
                    track: RemoteMedia {
                        id: track.id().to_string(),
                        kind,
                        handle: track,
                    },
                });
            })
        }));

        let state_tx = events;
        let state_remote = remote.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = state_tx.clone();
            let remote = state_remote.clone();
            Box::pin(async move {
                let _ = tx.send(LinkEvent::StateChanged {
                    remote,
                    state: link_state(state),
                });
            })
        }));

        Ok(Box::new(WebRtcLink { pc }))
    }
}

/// One peer connection, driven through opaque JSON descriptions and
/// candidates.
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for WebRtcLink {
    async fn create_offer(&self) -> Result<Value, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::apply("create offer", e))?;
        serde_json::to_value(&offer).map_err(|e| NegotiationError::apply("encode offer", e))
    }

    async fn create_answer(&self) -> Result<Value, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::apply("create answer", e))?;
        serde_json::to_value(&answer).map_err(|e| NegotiationError::apply("encode answer", e))
    }

    async fn set_local_description(&self, description: Value) -> Result<(), NegotiationError> {
        let description: RTCSessionDescription = serde_json::from_value(description)
            .map_err(|e| NegotiationError::apply("decode local description", e))?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| NegotiationError::apply("set local description", e))
    }

    async fn set_remote_description(&self, description: Value) -> Result<(), NegotiationError> {
        let description: RTCSessionDescription = serde_json::from_value(description)
            .map_err(|e| NegotiationError::apply("decode remote description", e))?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| NegotiationError::apply("set remote description", e))
    }

    async fn add_track(&self, track: &dyn LocalTrack) -> Result<(), NegotiationError> {
        let Some(track) = track.as_any().downcast_ref::<SampleTrack>() else {
            return Err(NegotiationError::apply(
                "add track",
                "track was not produced by the webrtc backend",
            ));
        };
        self.pc
            .add_track(track.inner.clone())
            .await
            .map_err(|e| NegotiationError::apply("add track", e))?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| NegotiationError::apply("decode candidate", e))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::apply("add candidate", e))
    }

    async fn open_data_channel(
        &self,
        label: &str,
    ) -> Result<Box<dyn DataChannel>, NegotiationError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| NegotiationError::apply("open data channel", e))?;
        Ok(Box::new(WebRtcDataChannel { dc }))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::apply("close peer connection", e))
    }
}

struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    async fn send_text(&self, text: &str) -> Result<(), NegotiationError> {
        self.dc
            .send_text(text.to_string())
            .await
            .map_err(|e| NegotiationError::apply("send on data channel", e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.dc
            .close()
            .await
            .map_err(|e| NegotiationError::apply("close data channel", e))
    }
}

/// Local track backed by a webrtc-rs sample track. Whatever captures or
/// generates media writes encoded samples into `sample_track()`.
pub struct SampleTrack {
    id: String,
    kind: TrackKind,
    inner: Arc<TrackLocalStaticSample>,
}

impl SampleTrack {
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.inner.clone()
    }
}

impl LocalTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Media source producing sample tracks for the enabled kinds. Capture and
/// encoding are the caller's concern; the tracks start out silent.
pub struct SampleMediaSource;

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, audio: bool, video: bool) -> Result<LocalMedia, MediaError> {
        let mut tracks: Vec<Arc<dyn LocalTrack>> = vec![];

        if audio {
            let inner = Arc::new(TrackLocalStaticSample::new(
                audio_capability(),
                "audio".to_string(),
                "meshcall-local".to_string(),
            ));
            tracks.push(Arc::new(SampleTrack {
                id: "audio".to_string(),
                kind: TrackKind::Audio,
                inner,
            }));
        }

        if video {
            let inner = Arc::new(TrackLocalStaticSample::new(
                video_capability(),
                "video".to_string(),
                "meshcall-local".to_string(),
            ));
            tracks.push(Arc::new(SampleTrack {
                id: "video".to_string(),
                kind: TrackKind::Video,
                inner,
            }));
        }

        Ok(LocalMedia::new(tracks))
    }
}
