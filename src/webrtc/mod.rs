//! Real-time transport backed by webrtc-rs
//!
//! Each session gets its own peer connection with one H.264 video track fed
//! from the session's camera source.

pub mod encoder;
pub mod peer;
pub mod transport;

pub use encoder::{rgb_to_yuv420, EncodedFrame, H264Encoder};
pub use peer::{BundlePolicy, IceServer, IceTransportPolicy, RTCConfiguration};
pub use transport::{H264TrackSink, WebRtcPeer, WebRtcTransport};
