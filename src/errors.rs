use thiserror::Error;

/// Errors raised while acquiring or reading a camera source.
///
/// Only `DeviceUnavailable` and `DeviceLost` ever reach a session. Single
/// missed reads are absorbed inside the source and replaced by an error frame.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("No working camera available: {0}")]
    DeviceUnavailable(String),
    #[error("Camera device lost: {0}")]
    DeviceLost(String),
    #[error("Transient capture error: {0}")]
    TransientCapture(String),
    #[error("Board camera library is not available")]
    BoardLibraryMissing,
    #[error("Invalid camera configuration: {0}")]
    InvalidConfig(String),
    #[error("Camera source is closed")]
    SourceClosed,
}

/// Request-level failures of session creation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),
    #[error("Negotiation failed: {0}")]
    Negotiation(String),
    #[error("Gateway is shutting down")]
    ShuttingDown,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// True when the request failed because no camera could be opened.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, SessionError::Camera(CameraError::DeviceUnavailable(_)))
    }
}

/// Errors loading, saving or validating the gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
