//! webrtc-rs implementation of the session transport

use super::encoder::H264Encoder;
use super::peer::RTCConfiguration;
use crate::errors::SessionError;
use crate::session::{
    MediaTransport, PeerLink, SessionDescription, SessionId, TransportEvents, TransportState,
    VideoSink,
};
use crate::types::{CameraConfig, Frame};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Seconds between forced keyframes
const KEYFRAME_INTERVAL_SECS: u64 = 2;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: crate::types::VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Builds one webrtc-rs peer connection per session
pub struct WebRtcTransport {
    api: API,
    config: RTCConfiguration,
}

impl WebRtcTransport {
    pub fn new(config: RTCConfiguration) -> Result<Self, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| SessionError::Internal(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| SessionError::Internal(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }

    pub fn config(&self) -> &RTCConfiguration {
        &self.config
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn open_peer(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerLink>, SessionError> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection((&self.config).into())
                .await
                .map_err(|e| SessionError::Internal(format!("Failed to create peer connection: {}", e)))?,
        );

        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::debug!("Peer {} connection state: {}", events.session_id(), state);
            events.state_changed(TransportState::from(state));
            Box::pin(async {})
        }));

        log::debug!("Peer connection created for session {}", id);
        Ok(Box::new(WebRtcPeer { id, peer_connection }))
    }
}

/// One session's peer connection
pub struct WebRtcPeer {
    id: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn add_video_track(&self, config: &CameraConfig) -> Result<Box<dyn VideoSink>, SessionError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_owned(),
            format!("crabgate-{}", self.id),
        ));

        let rtp_sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to add video track: {}", e)))?;

        // Incoming RTCP must be read for the interceptors to run
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let encoder = H264Encoder::new(
            config.width,
            config.height,
            config.fps as u64 * KEYFRAME_INTERVAL_SECS,
        )
        .map_err(SessionError::Internal)?;

        Ok(Box::new(H264TrackSink {
            track,
            encoder: Some(encoder),
            frame_duration: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
        }))
    }

    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, SessionError> {
        let offer = RTCSessionDescription::try_from(offer)?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to create answer: {}", e)))?;

        // Answer is returned once gathering completes, with every candidate inline
        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to set local description: {}", e)))?;

        let _ = gather_complete.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| SessionError::Negotiation("No local description after gathering".to_string()))?;

        log::debug!("Session {} answer ready ({} bytes)", self.id, local.sdp.len());
        Ok(local.into())
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            log::warn!("Failed to close peer connection for session {}: {}", self.id, e);
        }
    }
}

/// Encodes frames to H.264 and writes them to the session's track
pub struct H264TrackSink {
    track: Arc<TrackLocalStaticSample>,
    // Moved into the encode worker for the duration of each frame
    encoder: Option<H264Encoder>,
    frame_duration: Duration,
}

#[async_trait]
impl VideoSink for H264TrackSink {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| SessionError::Internal("encoder lost by a previous frame".to_string()))?;

        let (encoder, encoded) = tokio::task::spawn_blocking(move || {
            let encoded = encoder.encode(&frame);
            (encoder, encoded)
        })
        .await
        .map_err(|e| SessionError::Internal(format!("encode worker failed: {}", e)))?;
        self.encoder = Some(encoder);

        let encoded = encoded.map_err(SessionError::Internal)?;
        if encoded.data.is_empty() {
            return Ok(());
        }

        self.track
            .write_sample(&Sample {
                data: Bytes::from(encoded.data),
                duration: self.frame_duration,
                ..Default::default()
            })
            .await
            .map_err(|e| SessionError::Internal(format!("Failed to write sample: {}", e)))
    }
}
