//! Host platform detection and camera capability reporting

use crate::camera::CaptureDrivers;
use crate::types::{CameraBackend, CameraConfig, CameraDescriptor, Platform};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Generic device indices tried during enumeration
pub const GENERIC_SCAN_LIMIT: u32 = 5;

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";
const CPUINFO: &str = "/proc/cpuinfo";

/// Strings in the hardware description that identify an embedded board
const BOARD_SIGNATURES: [&str; 2] = ["Raspberry Pi", "BCM"];

/// Classifies the host and reports which cameras it can serve.
#[derive(Clone)]
pub struct PlatformDetector {
    drivers: Arc<dyn CaptureDrivers>,
    identity_files: Vec<PathBuf>,
    host_description: Option<String>,
    arch: String,
    linux: bool,
}

impl PlatformDetector {
    pub fn new(drivers: Arc<dyn CaptureDrivers>) -> Self {
        Self {
            drivers,
            identity_files: vec![PathBuf::from(DEVICE_TREE_MODEL), PathBuf::from(CPUINFO)],
            host_description: None,
            arch: std::env::consts::ARCH.to_string(),
            linux: cfg!(target_os = "linux"),
        }
    }

    /// Read the hardware description from these files instead of `/proc`
    pub fn with_identity_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.identity_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Use a fixed hardware description and architecture, as on a Linux host
    pub fn with_host_info(mut self, description: &str, arch: &str) -> Self {
        self.host_description = Some(description.to_string());
        self.arch = arch.to_string();
        self.linux = true;
        self
    }

    /// Treat the host as Linux on `arch`, keeping file-based detection
    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self.linux = true;
        self
    }

    pub fn drivers(&self) -> &dyn CaptureDrivers {
        self.drivers.as_ref()
    }

    fn description(&self) -> String {
        if let Some(description) = &self.host_description {
            return description.clone();
        }
        self.identity_files
            .iter()
            .filter_map(|path| std::fs::read(path).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Classify the host. Never fails; unreadable sources count as no match.
    pub fn detect_platform(&self) -> Platform {
        let description = self.description();
        if BOARD_SIGNATURES.iter().any(|sig| description.contains(sig)) {
            return Platform::Board;
        }
        if self.linux && (self.arch.starts_with("arm") || self.arch == "aarch64") {
            return Platform::Board;
        }
        Platform::GenericComputer
    }

    pub fn board_library_available(&self) -> bool {
        self.drivers.board_library_available()
    }

    /// `Board` only on a board host with the camera stack installed
    pub fn recommended_backend(&self) -> CameraBackend {
        if self.detect_platform() == Platform::Board && self.board_library_available() {
            CameraBackend::Board
        } else {
            CameraBackend::Generic
        }
    }

    /// List attached cameras. Opens and releases each device, so it
    /// blocks and must not run while a session holds the same device.
    pub fn enumerate_cameras(&self) -> Vec<CameraDescriptor> {
        let mut cameras: Vec<CameraDescriptor> = (0..GENERIC_SCAN_LIMIT)
            .filter(|&index| self.drivers.generic_answers(index))
            .map(CameraDescriptor::generic)
            .collect();

        if self.drivers.board_answers() {
            cameras.push(CameraDescriptor::board());
        }

        log::debug!("Enumerated {} camera(s)", cameras.len());
        cameras
    }

    pub fn capability_report(&self, current_config: &CameraConfig) -> CapabilityReport {
        CapabilityReport {
            platform: self.detect_platform(),
            board_library_available: self.board_library_available(),
            recommended_backend: self.recommended_backend(),
            available_cameras: self
                .enumerate_cameras()
                .into_iter()
                .map(|c| c.name)
                .collect(),
            current_config: current_config.clone(),
        }
    }
}

impl std::fmt::Debug for PlatformDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformDetector")
            .field("identity_files", &self.identity_files)
            .field("arch", &self.arch)
            .finish()
    }
}

/// What the host can do, as served on `/camera-info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub platform: Platform,
    pub board_library_available: bool,
    pub recommended_backend: CameraBackend,
    pub available_cameras: Vec<String>,
    pub current_config: CameraConfig,
}
