//! Boundary between the session manager and the real-time transport

use super::{SessionEvent, SessionId};
use crate::errors::SessionError;
use crate::types::{CameraConfig, Frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States after which the session is torn down
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// One half of the offer/answer exchange, in the browser's JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// Handle a peer uses to report its connection state back to the manager
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session_id: SessionId,
    tx: UnboundedSender<SessionEvent>,
}

impl TransportEvents {
    pub(crate) fn new(session_id: SessionId, tx: UnboundedSender<SessionEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state_changed(&self, state: TransportState) {
        let event = SessionEvent::Transport {
            id: self.session_id,
            state,
        };
        if self.tx.send(event).is_err() {
            log::debug!(
                "Session manager gone, dropping {:?} for {}",
                state,
                self.session_id
            );
        }
    }
}

/// Factory for per-session peers
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn open_peer(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerLink>, SessionError>;
}

/// One peer connection bound to a session
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach the outbound video track; must precede `negotiate`.
    async fn add_video_track(&self, config: &CameraConfig) -> Result<Box<dyn VideoSink>, SessionError>;

    /// Apply the remote offer and produce the local answer.
    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, SessionError>;

    async fn close(&self);
}

/// Consumer of a session's frames
#[async_trait]
pub trait VideoSink: Send {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), SessionError>;
}
