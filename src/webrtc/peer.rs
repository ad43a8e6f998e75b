use crate::errors::SessionError;
use crate::session::{SdpType, SessionDescription, TransportState};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration as NativeConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// WebRTC peer connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RTCConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

impl Default for RTCConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            ice_transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
        }
    }
}

impl RTCConfiguration {
    /// Configuration with no ICE servers; host candidates only
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no urls".to_string());
            }
            if let Some(url) = server
                .urls
                .iter()
                .find(|url| !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")))
            {
                return Err(format!("unsupported ICE server url '{}'", url));
            }
        }
        Ok(())
    }
}

impl From<&RTCConfiguration> for NativeConfiguration {
    fn from(config: &RTCConfiguration) -> Self {
        NativeConfiguration {
            ice_servers: config.ice_servers.iter().cloned().map(Into::into).collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
            },
            bundle_policy: match config.bundle_policy {
                BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
                BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
                BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            },
            ..Default::default()
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    Relay,
    All,
}

/// Bundle policy for RTC connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportState::New,
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
        }
    }
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Offer | RTCSdpType::Unspecified => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = SessionError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)
                .map_err(|e| SessionError::InvalidOffer(format!("Invalid SDP offer: {}", e))),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)
                .map_err(|e| SessionError::Negotiation(format!("Invalid SDP answer: {}", e))),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)
                .map_err(|e| SessionError::Negotiation(format!("Invalid SDP pranswer: {}", e))),
            SdpType::Rollback => Err(SessionError::InvalidOffer(
                "Rollback SDP type not supported".to_string(),
            )),
        }
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_uses_public_stun() {
        let config = RTCConfiguration::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].urls[0].starts_with("stun:"));
        assert!(config.validate().is_ok());

        let native = NativeConfiguration::from(&config);
        assert_eq!(native.ice_servers.len(), 1);
        assert_eq!(native.bundle_policy, RTCBundlePolicy::MaxBundle);
    }

    #[test]
    fn test_validation_rejects_bad_urls() {
        let mut config = RTCConfiguration::local_only();
        assert!(config.validate().is_ok());
        config.ice_servers.push(IceServer {
            urls: vec!["http://example.com".to_string()],
            username: None,
            credential: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_state_mapping() {
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Failed),
            TransportState::Failed
        );
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Unspecified),
            TransportState::New
        );
    }

    #[test]
    fn test_malformed_offer_is_invalid() {
        let err = RTCSessionDescription::try_from(SessionDescription::offer("not sdp")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidOffer(_)));
    }
}
