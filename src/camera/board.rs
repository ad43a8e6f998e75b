use super::frame::ErrorMarker;
use super::{
    CaptureCore, CaptureDevice, CaptureDrivers, DeviceError, DeviceInterrupt, PixelLayout, RawFrame,
};
use crate::errors::CameraError;
use crate::types::CameraConfig;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

/// Capture tools shipped with the board camera stack, newest first
pub const BOARD_CAPTURE_TOOLS: [&str; 2] = ["rpicam-vid", "libcamera-vid"];

/// Capture from the embedded-board camera stack.
///
/// Only constructible when the stack is installed; the factory falls back to
/// [`GenericCapture`](super::GenericCapture) otherwise.
pub struct BoardCapture {
    pub(super) core: CaptureCore,
}

impl BoardCapture {
    pub fn open(drivers: &dyn CaptureDrivers, config: &CameraConfig) -> Result<Self, CameraError> {
        if !drivers.board_library_available() {
            return Err(CameraError::BoardLibraryMissing);
        }
        let device = drivers.open_board(config)?;
        log::info!(
            "Board camera opened: {}x{}@{}fps",
            config.width,
            config.height,
            config.fps
        );
        Ok(Self {
            core: CaptureCore::new(config.clone(), device, ErrorMarker::CaptureError),
        })
    }
}

/// Find the board capture tool on `PATH`
pub fn locate_board_library() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        BOARD_CAPTURE_TOOLS
            .iter()
            .map(|tool| dir.join(tool))
            .find(|candidate| candidate.is_file())
    })
}

/// The capture tool process, shared with the interrupt handle
type SharedChild = Arc<Mutex<Child>>;

fn lock_child(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Kills the capture tool so a read blocked on its stdout hits EOF
struct ToolKiller {
    child: SharedChild,
    tool: String,
}

impl DeviceInterrupt for ToolKiller {
    fn interrupt(&self) {
        if let Err(e) = lock_child(&self.child).kill() {
            log::debug!("{} already stopped: {}", self.tool, e);
        }
    }
}

/// Board camera read as raw I420 from the capture tool's stdout
pub struct RpicamDevice {
    child: SharedChild,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    tool: String,
}

impl RpicamDevice {
    pub fn open(tool: &Path, config: &CameraConfig) -> Result<Self, CameraError> {
        let mut child = Command::new(tool)
            .args(["-t", "0", "--nopreview", "--codec", "yuv420"])
            .arg("--width")
            .arg(config.width.to_string())
            .arg("--height")
            .arg(config.height.to_string())
            .arg("--framerate")
            .arg(config.fps.to_string())
            .args(["-o", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CameraError::DeviceUnavailable(format!(
                    "Failed to start {}: {}",
                    tool.display(),
                    e
                ))
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CameraError::DeviceUnavailable(
                "board capture tool has no stdout".to_string(),
            ));
        };

        let mut device = Self {
            child: Arc::new(Mutex::new(child)),
            stdout,
            width: config.width,
            height: config.height,
            tool: tool
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| tool.display().to_string()),
        };

        // The first frame proves the sensor is streaming
        if let Err(e) = device.read_frame() {
            device.release();
            return Err(CameraError::DeviceUnavailable(format!(
                "Board camera produced no frames: {:?}",
                e
            )));
        }

        Ok(device)
    }

    fn frame_len(&self) -> usize {
        let w = self.width as usize;
        let h = self.height as usize;
        w * h + 2 * ((w / 2) * (h / 2))
    }
}

impl CaptureDevice for RpicamDevice {
    fn read_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let mut data = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => Ok(RawFrame {
                data,
                width: self.width,
                height: self.height,
                layout: PixelLayout::I420,
            }),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(DeviceError::Disconnected(
                format!("{} stopped streaming", self.tool),
            )),
            Err(e) => match lock_child(&self.child).try_wait() {
                Ok(Some(status)) => Err(DeviceError::Disconnected(format!(
                    "{} exited with {}",
                    self.tool, status
                ))),
                _ => Err(DeviceError::Transient(e.to_string())),
            },
        }
    }

    fn release(&mut self) {
        let mut child = lock_child(&self.child);
        if let Err(e) = child.kill() {
            log::debug!("{} already stopped: {}", self.tool, e);
        }
        if let Err(e) = child.wait() {
            log::warn!("Failed to reap {}: {}", self.tool, e);
        }
    }

    fn name(&self) -> String {
        format!("board camera ({})", self.tool)
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn DeviceInterrupt>> {
        Some(Arc::new(ToolKiller {
            child: self.child.clone(),
            tool: self.tool.clone(),
        }))
    }
}
