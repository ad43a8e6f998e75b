use super::board::{self, BoardCapture, RpicamDevice};
use super::generic::{GenericCapture, NokhwaDevice};
use super::{CameraSource, CaptureDevice, CaptureDrivers};
use crate::errors::CameraError;
use crate::platform::PlatformDetector;
use crate::types::{CameraBackend, CameraConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Drivers for real hardware: nokhwa for generic devices, the board capture
/// tool for the embedded camera.
#[derive(Debug, Clone)]
pub struct SystemDrivers {
    board_tool: Option<PathBuf>,
}

impl SystemDrivers {
    pub fn new() -> Self {
        let board_tool = board::locate_board_library();
        match &board_tool {
            Some(path) => log::debug!("Board camera tool found at {}", path.display()),
            None => log::debug!("Board camera tool not installed"),
        }
        Self { board_tool }
    }
}

impl Default for SystemDrivers {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDrivers for SystemDrivers {
    fn board_library_available(&self) -> bool {
        self.board_tool.is_some()
    }

    fn open_generic(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(NokhwaDevice::open(config)?))
    }

    fn open_board(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let tool = self
            .board_tool
            .as_deref()
            .ok_or(CameraError::BoardLibraryMissing)?;
        Ok(Box::new(RpicamDevice::open(tool, config)?))
    }
}

/// Builds camera sources, resolving `Auto` through platform detection.
#[derive(Clone)]
pub struct CameraSourceFactory {
    detector: PlatformDetector,
}

impl CameraSourceFactory {
    pub fn new(detector: PlatformDetector) -> Self {
        Self { detector }
    }

    /// Factory backed by the host's real camera drivers
    pub fn system() -> Self {
        Self::new(PlatformDetector::new(Arc::new(SystemDrivers::new())))
    }

    pub fn detector(&self) -> &PlatformDetector {
        &self.detector
    }

    fn drivers(&self) -> &dyn CaptureDrivers {
        self.detector.drivers()
    }

    /// Build and open a source for `config`.
    ///
    /// A board request on a host without a working board camera falls back
    /// to the generic device with the same dimensions and rate. Blocks while
    /// the device opens.
    pub fn build(&self, config: &CameraConfig) -> Result<CameraSource, CameraError> {
        config.validate()?;

        let backend = match config.backend {
            CameraBackend::Auto => {
                let resolved = self.detector.recommended_backend();
                log::info!("Auto camera backend resolved to {}", resolved);
                resolved
            }
            explicit => explicit,
        };

        match backend {
            CameraBackend::Board => match BoardCapture::open(self.drivers(), config) {
                Ok(capture) => Ok(CameraSource::Board(capture)),
                Err(CameraError::BoardLibraryMissing) => {
                    log::info!("Board camera stack not installed, using generic camera");
                    self.build_generic(config)
                }
                Err(e) => {
                    log::warn!("Board camera failed ({}), falling back to generic camera", e);
                    self.build_generic(config)
                }
            },
            _ => self.build_generic(config),
        }
    }

    fn build_generic(&self, config: &CameraConfig) -> Result<CameraSource, CameraError> {
        let config = config.clone().with_backend(CameraBackend::Generic);
        GenericCapture::open(self.drivers(), &config)
            .map(CameraSource::Generic)
            .map_err(|e| match e {
                CameraError::DeviceUnavailable(_) => e,
                other => CameraError::DeviceUnavailable(other.to_string()),
            })
    }
}

impl std::fmt::Debug for CameraSourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSourceFactory")
            .field("board_library_available", &self.detector.board_library_available())
            .finish()
    }
}
