//! Camera sources
//!
//! A [`CameraSource`] is one of a closed set of backend variants, chosen once
//! by [`CameraSourceFactory`]. Both variants share the same frame contract:
//! RGB24 frames at the configured resolution, paced at the configured rate,
//! with an error frame substituted whenever a single read fails.

pub mod board;
pub mod factory;
pub mod frame;
pub mod generic;

pub use board::BoardCapture;
pub use factory::{CameraSourceFactory, SystemDrivers};
pub use frame::ErrorMarker;
pub use generic::GenericCapture;

use crate::errors::CameraError;
use crate::timing::FrameClock;
use crate::types::{CameraBackend, CameraConfig, Frame, TimeBase};
use std::sync::Arc;

/// Native pixel layout delivered by a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb24,
    Bgr24,
    /// Packed 4:2:2, `Y0 U Y1 V`
    Yuyv,
    /// Planar 4:2:0
    I420,
}

/// A frame as read from the device, before normalization
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

/// Outcome of a failed device read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A single missed read; the device is still usable
    Transient(String),
    /// The device went away
    Disconnected(String),
}

/// Unblocks a device read from another thread.
///
/// Used when a session closes while its capture worker is parked inside
/// `read_frame`; the interrupted read must return promptly with an error.
pub trait DeviceInterrupt: Send + Sync {
    fn interrupt(&self);
}

/// Open handle to a physical or virtual capture device.
///
/// `read_frame` blocks until the device yields a frame and must only be
/// called from a blocking worker.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<RawFrame, DeviceError>;

    /// Release the underlying handle. Called exactly once by the owning source.
    fn release(&mut self);

    fn name(&self) -> String;

    /// Handle that can cut a blocked `read_frame` short without holding the
    /// device. `None` when reads always return on their own.
    fn interrupt_handle(&self) -> Option<Arc<dyn DeviceInterrupt>> {
        None
    }
}

/// Opens capture devices for the factory and the platform detector
pub trait CaptureDrivers: Send + Sync {
    /// Whether the board camera stack is installed on this host
    fn board_library_available(&self) -> bool;

    fn open_generic(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError>;

    fn open_board(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError>;

    /// Best-effort check that a generic device answers at `index`
    fn generic_answers(&self, index: u32) -> bool {
        let config = CameraConfig::default()
            .with_backend(CameraBackend::Generic)
            .with_device_index(index);
        match self.open_generic(&config) {
            Ok(mut device) => {
                device.release();
                true
            }
            Err(_) => false,
        }
    }

    /// Best-effort check that the board camera answers
    fn board_answers(&self) -> bool {
        if !self.board_library_available() {
            return false;
        }
        let config = CameraConfig::default().with_backend(CameraBackend::Board);
        match self.open_board(&config) {
            Ok(mut device) => {
                device.release();
                true
            }
            Err(_) => false,
        }
    }
}

/// State shared by every capture variant
pub(crate) struct CaptureCore {
    config: CameraConfig,
    device: Option<Box<dyn CaptureDevice>>,
    interrupt: Option<Arc<dyn DeviceInterrupt>>,
    clock: FrameClock,
    sequence: u64,
    lost: bool,
    consecutive_failures: u32,
    failure_marker: ErrorMarker,
}

impl CaptureCore {
    pub(crate) fn new(
        config: CameraConfig,
        device: Box<dyn CaptureDevice>,
        failure_marker: ErrorMarker,
    ) -> Self {
        Self {
            clock: FrameClock::new(config.fps),
            config,
            interrupt: device.interrupt_handle(),
            device: Some(device),
            sequence: 0,
            lost: false,
            consecutive_failures: 0,
            failure_marker,
        }
    }

    pub(crate) fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub(crate) fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub(crate) fn interrupt_handle(&self) -> Option<Arc<dyn DeviceInterrupt>> {
        self.interrupt.clone()
    }

    pub(crate) fn device_name(&self) -> Option<String> {
        self.device.as_ref().map(|d| d.name())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::SourceClosed);
        };

        let pts = self.clock.pace();
        let sequence = self.sequence;
        self.sequence += 1;

        if self.lost {
            return Ok(self.substitute(sequence, pts, ErrorMarker::NoSignal));
        }

        match device.read_frame() {
            Ok(raw) => match frame::to_rgb24(&raw, self.config.width, self.config.height) {
                Ok(data) => {
                    if self.consecutive_failures > 0 {
                        log::info!(
                            "Camera recovered after {} failed reads",
                            self.consecutive_failures
                        );
                    }
                    self.consecutive_failures = 0;
                    Ok(Frame {
                        data,
                        width: self.config.width,
                        height: self.config.height,
                        sequence,
                        pts,
                        time_base: TimeBase::VIDEO,
                        error_frame: false,
                    })
                }
                Err(reason) => {
                    self.note_failure(&reason);
                    Ok(self.substitute(sequence, pts, self.failure_marker))
                }
            },
            Err(DeviceError::Transient(reason)) => {
                self.note_failure(&reason);
                Ok(self.substitute(sequence, pts, self.failure_marker))
            }
            Err(DeviceError::Disconnected(reason)) => {
                self.lost = true;
                log::error!("Camera device disconnected: {}", reason);
                Err(CameraError::DeviceLost(reason))
            }
        }
    }

    fn note_failure(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == 1 || self.consecutive_failures % self.config.fps.max(1) == 0 {
            log::warn!(
                "Frame read failed ({} in a row), sending error frame: {}",
                self.consecutive_failures,
                reason
            );
        } else {
            log::debug!("Frame read failed: {}", reason);
        }
    }

    fn substitute(&self, sequence: u64, pts: u64, marker: ErrorMarker) -> Frame {
        Frame {
            data: frame::error_frame(self.config.width, self.config.height, marker),
            width: self.config.width,
            height: self.config.height,
            sequence,
            pts,
            time_base: TimeBase::VIDEO,
            error_frame: true,
        }
    }

    /// Release the device handle; later calls are no-ops.
    pub(crate) fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            let name = device.name();
            device.release();
            log::info!("Released camera {}", name);
        }
    }
}

impl Drop for CaptureCore {
    fn drop(&mut self) {
        self.close();
    }
}

/// A camera bound to exactly one session
pub enum CameraSource {
    Generic(GenericCapture),
    Board(BoardCapture),
}

impl CameraSource {
    fn core(&self) -> &CaptureCore {
        match self {
            CameraSource::Generic(c) => &c.core,
            CameraSource::Board(c) => &c.core,
        }
    }

    fn core_mut(&mut self) -> &mut CaptureCore {
        match self {
            CameraSource::Generic(c) => &mut c.core,
            CameraSource::Board(c) => &mut c.core,
        }
    }

    /// The backend actually serving frames (never `Auto`)
    pub fn backend(&self) -> CameraBackend {
        match self {
            CameraSource::Generic(_) => CameraBackend::Generic,
            CameraSource::Board(_) => CameraBackend::Board,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        self.core().config()
    }

    pub fn is_open(&self) -> bool {
        self.core().is_open()
    }

    pub fn describe(&self) -> String {
        let config = self.config();
        format!(
            "{} ({}x{}@{}fps)",
            self.core()
                .device_name()
                .unwrap_or_else(|| format!("closed {} camera", self.backend())),
            config.width,
            config.height,
            config.fps
        )
    }

    /// Block until the next frame slot and return a frame.
    ///
    /// Fails only with `DeviceLost` (reported once) or `SourceClosed`.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.core_mut().next_frame()
    }

    /// Handle for unblocking a pending `next_frame` from another thread.
    /// Take it before sharing the source behind a lock.
    pub fn interrupt_handle(&self) -> Option<Arc<dyn DeviceInterrupt>> {
        self.core().interrupt_handle()
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        self.core_mut().close();
    }
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("backend", &self.backend())
            .field("config", self.config())
            .field("open", &self.is_open())
            .finish()
    }
}
