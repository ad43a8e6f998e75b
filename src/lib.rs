//! crabgate: WebRTC gateway that streams a server-side camera to browser peers
//!
//! Browsers post a session offer; the gateway opens a camera source for the
//! session, attaches it as an H.264 track on a webrtc-rs peer connection and
//! answers. Frames flow until the peer goes away or the process shuts down.
//!
//! # Layers
//! - [`camera`]: backend-neutral camera sources with board/generic fallback
//! - [`platform`]: host classification and camera capability reporting
//! - [`session`]: per-connection lifecycle and guaranteed camera release
//! - [`webrtc`]: the production transport
//! - [`server`]: the signaling HTTP routes
//!
//! # Usage
//! ```rust,ignore
//! use crabgate::{camera::CameraSourceFactory, session::SessionManager, webrtc::WebRtcTransport};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(WebRtcTransport::new(Default::default())?);
//! let manager = SessionManager::new(Default::default(), CameraSourceFactory::system(), transport);
//! let answer = manager.create_session(offer).await?;
//! ```
pub mod camera;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod platform;
pub mod server;
pub mod session;
pub mod timing;
pub mod types;
pub mod webrtc;

// Testing utilities - synthetic devices and a fake transport for offline testing
pub mod testing;

// Re-exports for convenience
pub use camera::{CameraSource, CameraSourceFactory};
pub use config::GatewayConfig;
pub use errors::{CameraError, ConfigError, SessionError};
pub use platform::{CapabilityReport, PlatformDetector};
pub use session::{SessionDescription, SessionManager};
pub use types::{CameraBackend, CameraConfig, Frame, Platform};

/// Initialize logging for the gateway
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabgate=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
