use super::frame::ErrorMarker;
use super::{CaptureCore, CaptureDevice, CaptureDrivers, DeviceError, PixelLayout, RawFrame};
use crate::errors::CameraError;
use crate::types::CameraConfig;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};

/// Capture from a generic video device addressed by numeric index.
///
/// The device's native layout is converted to RGB24 on every frame.
pub struct GenericCapture {
    pub(super) core: CaptureCore,
}

impl GenericCapture {
    pub fn open(drivers: &dyn CaptureDrivers, config: &CameraConfig) -> Result<Self, CameraError> {
        let device = drivers.open_generic(config)?;
        log::info!(
            "Generic camera {} opened: {}x{}@{}fps",
            config.device_index,
            config.width,
            config.height,
            config.fps
        );
        Ok(Self {
            core: CaptureCore::new(config.clone(), device, ErrorMarker::NoSignal),
        })
    }
}

/// Generic capture device backed by nokhwa's native input backend
pub struct NokhwaDevice {
    camera: Camera,
    index: u32,
    name: String,
}

impl NokhwaDevice {
    /// Open the device and start streaming.
    ///
    /// Resolution and frame rate are requested as the closest supported
    /// format; the backend may clamp them.
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::MJPEG,
                config.fps,
            ),
        ));

        let mut camera = Camera::new(CameraIndex::Index(config.device_index), requested).map_err(|e| {
            CameraError::DeviceUnavailable(format!(
                "Failed to open generic camera {}: {}",
                config.device_index, e
            ))
        })?;

        camera.open_stream().map_err(|e| {
            CameraError::DeviceUnavailable(format!(
                "Failed to start stream on generic camera {}: {}",
                config.device_index, e
            ))
        })?;

        let name = camera.info().human_name();
        log::debug!(
            "Generic camera {} ({}) negotiated {:?}",
            config.device_index,
            name,
            camera.camera_format()
        );

        Ok(Self {
            camera,
            index: config.device_index,
            name,
        })
    }

    fn device_gone(&self) -> bool {
        if !self.camera.is_stream_open() {
            return true;
        }
        #[cfg(target_os = "linux")]
        {
            !std::path::Path::new(&format!("/dev/video{}", self.index)).exists()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

impl CaptureDevice for NokhwaDevice {
    fn read_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(e) if self.device_gone() => {
                return Err(DeviceError::Disconnected(format!(
                    "generic camera {}: {}",
                    self.index, e
                )))
            }
            Err(e) => return Err(DeviceError::Transient(e.to_string())),
        };

        let resolution = buffer.resolution();
        match buffer.source_frame_format() {
            // YUYV passes through and is converted in `frame::normalize`
            FrameFormat::YUYV => Ok(RawFrame {
                data: buffer.buffer_bytes().to_vec(),
                width: resolution.width_x,
                height: resolution.height_y,
                layout: PixelLayout::Yuyv,
            }),
            _ => {
                let decoded = buffer
                    .decode_image::<RgbFormat>()
                    .map_err(|e| DeviceError::Transient(format!("decode failed: {}", e)))?;
                Ok(RawFrame {
                    width: decoded.width(),
                    height: decoded.height(),
                    data: decoded.into_raw(),
                    layout: PixelLayout::Rgb24,
                })
            }
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop generic camera {}: {}", self.index, e);
        }
    }

    fn name(&self) -> String {
        format!("generic camera {} ({})", self.index, self.name)
    }
}

// The camera handle is only touched through the owning source's lock.
unsafe impl Send for NokhwaDevice {}
