use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// RTP clock rate used for video presentation timestamps.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Highest frame rate a camera source may be configured for.
pub const MAX_FPS: u32 = 240;

/// Largest accepted frame width (4K UHD).
pub const MAX_WIDTH: u32 = 3840;

/// Largest accepted frame height (4K UHD).
pub const MAX_HEIGHT: u32 = 2160;

/// Camera capture technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Resolved at runtime from platform detection
    #[default]
    Auto,
    /// Generic video-capture device addressed by index
    Generic,
    /// Embedded-board camera stack
    Board,
}

impl CameraBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraBackend::Auto => "auto",
            CameraBackend::Generic => "generic",
            CameraBackend::Board => "board",
        }
    }
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraBackend {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(CameraBackend::Auto),
            "generic" | "opencv" | "webcam" => Ok(CameraBackend::Generic),
            "board" | "picamera2" | "picamera" | "rpi" => Ok(CameraBackend::Board),
            other => Err(CameraError::InvalidConfig(format!(
                "unknown camera backend '{}'",
                other
            ))),
        }
    }
}

/// Camera configuration, immutable once a source is built from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    #[serde(rename = "deviceIndex", alias = "device_index")]
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Auto,
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraConfig {
    pub fn new(backend: CameraBackend, width: u32, height: u32, fps: u32) -> Self {
        Self {
            backend,
            width,
            height,
            fps,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: CameraBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_device_index(mut self, device_index: u32) -> Self {
        self.device_index = device_index;
        self
    }

    /// Byte length of one RGB24 frame at this resolution
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Check dimensions and frame rate.
    ///
    /// Dimensions must be even: frames are encoded with 4:2:0 chroma.
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {}x{} must have even dimensions",
                self.width, self.height
            )));
        }
        if self.width > MAX_WIDTH || self.height > MAX_HEIGHT {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {}x{} exceeds {}x{}",
                self.width, self.height, MAX_WIDTH, MAX_HEIGHT
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CameraError::InvalidConfig(format!(
                "fps {} must be between 1 and {}",
                self.fps, MAX_FPS
            )));
        }
        Ok(())
    }
}

/// Rational time base of frame timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const VIDEO: TimeBase = TimeBase {
        num: 1,
        den: VIDEO_CLOCK_RATE,
    };

    pub fn seconds(&self, ticks: u64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

/// One RGB24 video frame handed to the transport
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major RGB24 pixels, `width * height * 3` bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    /// Presentation timestamp in `time_base` units
    pub pts: u64,
    pub time_base: TimeBase,
    /// Substituted because the live read failed
    pub error_frame: bool,
}

impl Frame {
    pub fn pts_seconds(&self) -> f64 {
        self.time_base.seconds(self.pts)
    }

    pub fn matches(&self, config: &CameraConfig) -> bool {
        self.width == config.width
            && self.height == config.height
            && self.data.len() == config.frame_len()
    }
}

/// Host classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Board,
    GenericComputer,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Board => "board",
            Platform::GenericComputer => "generic_computer",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A camera found by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub backend: CameraBackend,
    pub device_index: Option<u32>,
    pub name: String,
}

impl CameraDescriptor {
    pub fn generic(index: u32) -> Self {
        Self {
            backend: CameraBackend::Generic,
            device_index: Some(index),
            name: format!("Generic Camera {}", index),
        }
    }

    pub fn board() -> Self {
        Self {
            backend: CameraBackend::Board,
            device_index: None,
            name: "Board Camera".to_string(),
        }
    }
}

impl fmt::Display for CameraDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing_accepts_aliases() {
        assert_eq!("auto".parse::<CameraBackend>().unwrap(), CameraBackend::Auto);
        assert_eq!("OpenCV".parse::<CameraBackend>().unwrap(), CameraBackend::Generic);
        assert_eq!("picamera2".parse::<CameraBackend>().unwrap(), CameraBackend::Board);
        assert!("gopro".parse::<CameraBackend>().is_err());
    }

    #[test]
    fn test_camera_config_json_shape() {
        let config = CameraConfig::default().with_backend(CameraBackend::Generic);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["backend"], "generic");
        assert_eq!(json["deviceIndex"], 0);
        assert_eq!(json["width"], 640);
        assert_eq!(json["height"], 480);
        assert_eq!(json["fps"], 30);
    }

    #[test]
    fn test_camera_config_validation() {
        assert!(CameraConfig::default().validate().is_ok());
        assert!(CameraConfig::new(CameraBackend::Auto, 0, 480, 30).validate().is_err());
        assert!(CameraConfig::new(CameraBackend::Auto, 641, 480, 30).validate().is_err());
        assert!(CameraConfig::new(CameraBackend::Auto, 640, 480, 0).validate().is_err());
        assert!(CameraConfig::new(CameraBackend::Auto, 640, 480, 500).validate().is_err());
    }

    #[test]
    fn test_oversized_resolution_is_rejected() {
        let uhd = CameraConfig::new(CameraBackend::Generic, MAX_WIDTH, MAX_HEIGHT, 30);
        assert!(uhd.validate().is_ok());

        let huge = CameraConfig::new(CameraBackend::Generic, 1 << 20, 1 << 20, 30);
        assert!(matches!(huge.validate(), Err(CameraError::InvalidConfig(_))));
        assert!(CameraConfig::new(CameraBackend::Generic, MAX_WIDTH + 2, 480, 30)
            .validate()
            .is_err());
        assert!(CameraConfig::new(CameraBackend::Generic, 640, MAX_HEIGHT + 2, 30)
            .validate()
            .is_err());
    }

    #[test]
    fn test_time_base_seconds() {
        assert_eq!(TimeBase::VIDEO.seconds(90_000), 1.0);
        assert_eq!(TimeBase::VIDEO.seconds(3_000), 1.0 / 30.0);
    }

    #[test]
    fn test_descriptor_names() {
        assert_eq!(CameraDescriptor::generic(2).to_string(), "Generic Camera 2");
        assert_eq!(CameraDescriptor::board().to_string(), "Board Camera");
    }
}
