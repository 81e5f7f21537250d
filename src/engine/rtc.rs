//! `webrtc-rs` implementation of the engine boundary.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{GatheringComplete, PeerEngine, PeerSession, SdpKind, SessionDescription};
use crate::error::EngineError;
use crate::instrument::{InstrumentorHandle, Role, Transition};

/// Builds peer connections with default codecs and interceptors and no ICE
/// servers (host candidates only).
pub struct WebRtcEngine {
    api: API,
    outbound: Option<Arc<TrackLocalStaticSample>>,
}

impl WebRtcEngine {
    /// Engine for the driver: sessions receive video, send nothing.
    pub fn initiator() -> Result<Self, EngineError> {
        Ok(Self {
            api: build_api()?,
            outbound: None,
        })
    }

    /// Engine for the responder: every session carries the same VP8 track.
    pub fn responder() -> Result<Self, EngineError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "rtc-handshake-bench".to_owned(),
        ));
        Ok(Self {
            api: build_api()?,
            outbound: Some(track),
        })
    }

    /// The shared outbound track, if this engine sends media.
    pub fn outbound_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.outbound.clone()
    }
}

fn build_api() -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| EngineError::at("register_default_codecs", e))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| EngineError::at("register_default_interceptors", e))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    type Session = WebRtcSession;

    async fn open(&self, role: Role, observer: InstrumentorHandle) -> Result<WebRtcSession, EngineError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| EngineError::at("new_peer_connection", e))?,
        );

        wire_state_callbacks(&pc, &observer);

        match (role, &self.outbound) {
            (Role::Responder, Some(track)) => {
                let sender = pc
                    .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| EngineError::at("add_track", e))?;

                // RTCP must be read for the interceptors (NACK, reports) to run.
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    while sender.read(&mut buf).await.is_ok() {}
                });
            }
            _ => {
                let init = RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                };
                pc.add_transceiver_from_kind(RTPCodecType::Video, Some(init))
                    .await
                    .map_err(|e| EngineError::at("add_transceiver", e))?;
            }
        }

        Ok(WebRtcSession { pc, observer })
    }
}

/// Translate engine state changes into lifecycle transitions.
fn wire_state_callbacks(pc: &Arc<RTCPeerConnection>, observer: &InstrumentorHandle) {
    let ice_observer = observer.clone();
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        debug!(attempt = %ice_observer.id(), ?state, "ice state");
        match state {
            RTCIceConnectionState::Connected => ice_observer.notify(Transition::TransportConnected),
            RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed => {
                if let Some(pc) = weak.upgrade() {
                    let id = ice_observer.id();
                    tokio::spawn(async move {
                        if let Err(e) = pc.close().await {
                            warn!(attempt = %id, error = %e, "close after ice loss failed");
                        }
                    });
                }
            }
            RTCIceConnectionState::Closed => ice_observer.notify(Transition::SessionClosed),
            _ => {}
        }
        Box::pin(async {})
    }));

    let pc_observer = observer.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(attempt = %pc_observer.id(), ?state, "peer connection state");
        match state {
            RTCPeerConnectionState::Connected => {
                pc_observer.notify(Transition::SecureChannelEstablished);
                pc_observer.notify(Transition::MediaReady);
            }
            RTCPeerConnectionState::Closed | RTCPeerConnectionState::Failed => {
                pc_observer.notify(Transition::SessionClosed)
            }
            _ => {}
        }
        Box::pin(async {})
    }));
}

// ─── Session ─────────────────────────────────────────────────────

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    observer: InstrumentorHandle,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => {
            return Err(EngineError::at("parse_description", "rollback is not negotiable here"))
        }
    };
    parsed.map_err(|e| EngineError::at("parse_description", e))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(EngineError::at("local_description", "unspecified sdp type"))
        }
    };
    Ok(SessionDescription { kind, sdp: desc.sdp })
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::at("create_offer", e))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::at("create_answer", e))?;
        from_rtc(answer)
    }

    async fn apply_local(&self, desc: SessionDescription) -> Result<GatheringComplete, EngineError> {
        // The promise has to exist before gathering can possibly finish.
        let gathering = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| EngineError::at("set_local_description", e))?;
        Ok(gathering)
    }

    async fn apply_remote(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| EngineError::at("set_remote_description", e))
    }

    async fn local_description(&self) -> Result<SessionDescription, EngineError> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(EngineError::MissingLocalDescription)?;
        from_rtc(local)
    }

    async fn close(&self) -> Result<(), EngineError> {
        let result = self
            .pc
            .close()
            .await
            .map_err(|e| EngineError::at("close", e));
        self.observer.notify(Transition::SessionClosed);
        result
    }
}
