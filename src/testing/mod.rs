//! Testing utilities for crabgate
//!
//! Synthetic capture devices and drivers that stand in for real cameras, and
//! a scriptable transport that stands in for webrtc-rs, so the camera and
//! session layers can be exercised offline without hardware.

use crate::camera::{
    CaptureDevice, CaptureDrivers, DeviceError, DeviceInterrupt, PixelLayout, RawFrame,
};
use crate::errors::{CameraError, SessionError};
use crate::session::{
    MediaTransport, PeerLink, SessionDescription, SessionId, TransportEvents, TransportState,
    VideoSink,
};
use crate::types::{CameraConfig, Frame};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// RGB gradient that changes every frame
pub fn synthetic_rgb(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    data
}

/// Lay out a synthetic frame in the device's native pixel format
fn synthetic_raw(frame_number: u64, width: u32, height: u32, layout: PixelLayout) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let luma = |x: usize, y: usize| ((x + y + frame_number as usize) % 220 + 16) as u8;
    match layout {
        PixelLayout::Rgb24 => synthetic_rgb(frame_number, width, height),
        PixelLayout::Bgr24 => {
            let mut data = synthetic_rgb(frame_number, width, height);
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            data
        }
        PixelLayout::Yuyv => {
            let mut data = Vec::with_capacity(w * h * 2);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    data.extend_from_slice(&[luma(x, y), 128, luma(x + 1, y), 128]);
                }
            }
            data
        }
        PixelLayout::I420 => {
            let mut data = Vec::with_capacity(w * h + 2 * (w / 2) * (h / 2));
            for y in 0..h {
                for x in 0..w {
                    data.push(luma(x, y));
                }
            }
            data.resize(data.len() + 2 * (w / 2) * (h / 2), 128);
            data
        }
    }
}

/// Open/release bookkeeping shared by a driver and its devices
#[derive(Debug, Default)]
pub struct DeviceLedger {
    opened: AtomicUsize,
    released: AtomicUsize,
    interrupted: AtomicUsize,
    handles: Mutex<HashMap<String, usize>>,
}

impl DeviceLedger {
    fn open(&self, name: &str) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut handles) = self.handles.lock() {
            *handles.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    fn release(&self, name: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut handles) = self.handles.lock() {
            if let Some(count) = handles.get_mut(name) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Interrupts delivered to blocked reads
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Handles currently held open across all devices
    pub fn open_handles(&self) -> usize {
        self.handles
            .lock()
            .map(|handles| handles.values().sum())
            .unwrap_or(0)
    }
}

/// How a synthetic device behaves over its lifetime
#[derive(Debug, Clone)]
pub struct DeviceScript {
    pub layout: PixelLayout,
    /// Native resolution; `None` delivers the requested resolution
    pub native_size: Option<(u32, u32)>,
    /// Read indices (0-based) that fail transiently
    pub transient_failures: BTreeSet<u64>,
    /// Reads at or after this index report a disconnect
    pub disconnect_at: Option<u64>,
    /// Reads at or after this index hang until the device is interrupted
    pub block_at: Option<u64>,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self {
            layout: PixelLayout::Bgr24,
            native_size: None,
            transient_failures: BTreeSet::new(),
            disconnect_at: None,
            block_at: None,
        }
    }
}

/// Wakes a synthetic read parked by [`DeviceScript::block_at`]
#[derive(Debug, Default)]
struct ReadGate {
    interrupted: Mutex<bool>,
    wake: Condvar,
}

struct GateInterrupt {
    gate: Arc<ReadGate>,
    ledger: Arc<DeviceLedger>,
}

impl DeviceInterrupt for GateInterrupt {
    fn interrupt(&self) {
        let mut interrupted = self
            .gate
            .interrupted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*interrupted {
            *interrupted = true;
            self.ledger.interrupted.fetch_add(1, Ordering::SeqCst);
        }
        self.gate.wake.notify_all();
    }
}

/// Capture device that generates frames in memory
pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    script: DeviceScript,
    reads: u64,
    gate: Arc<ReadGate>,
    ledger: Arc<DeviceLedger>,
}

impl SyntheticDevice {
    pub fn new(name: &str, config: &CameraConfig, script: DeviceScript, ledger: Arc<DeviceLedger>) -> Self {
        let (width, height) = script.native_size.unwrap_or((config.width, config.height));
        ledger.open(name);
        Self {
            name: name.to_string(),
            width,
            height,
            script,
            reads: 0,
            gate: Arc::new(ReadGate::default()),
            ledger,
        }
    }

    /// Park until interrupted
    fn wait_for_interrupt(&self) {
        let mut interrupted = self
            .gate
            .interrupted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*interrupted {
            interrupted = self
                .gate
                .wake
                .wait(interrupted)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let index = self.reads;
        self.reads += 1;

        if self.script.block_at.is_some_and(|at| index >= at) {
            self.wait_for_interrupt();
            return Err(DeviceError::Disconnected(format!("{} interrupted", self.name)));
        }
        if self.script.disconnect_at.is_some_and(|at| index >= at) {
            return Err(DeviceError::Disconnected(format!("{} unplugged", self.name)));
        }
        if self.script.transient_failures.contains(&index) {
            return Err(DeviceError::Transient(format!("{} missed read {}", self.name, index)));
        }

        Ok(RawFrame {
            data: synthetic_raw(index, self.width, self.height, self.script.layout),
            width: self.width,
            height: self.height,
            layout: self.script.layout,
        })
    }

    fn release(&mut self) {
        // Counted every time so double releases are visible to tests
        self.ledger.release(&self.name);
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn DeviceInterrupt>> {
        Some(Arc::new(GateInterrupt {
            gate: self.gate.clone(),
            ledger: self.ledger.clone(),
        }))
    }
}

/// Drivers with a configurable set of working devices
#[derive(Debug, Clone)]
pub struct SyntheticDrivers {
    board_library: bool,
    board_camera: bool,
    generic_devices: BTreeSet<u32>,
    script: DeviceScript,
    ledger: Arc<DeviceLedger>,
}

impl SyntheticDrivers {
    /// No board library and no devices
    pub fn new() -> Self {
        Self {
            board_library: false,
            board_camera: false,
            generic_devices: BTreeSet::new(),
            script: DeviceScript::default(),
            ledger: Arc::new(DeviceLedger::default()),
        }
    }

    pub fn with_board_library(mut self, available: bool) -> Self {
        self.board_library = available;
        self
    }

    /// Whether the board camera opens once the library is present
    pub fn with_board_camera(mut self, working: bool) -> Self {
        self.board_camera = working;
        self
    }

    pub fn with_generic_devices(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.generic_devices = indices.into_iter().collect();
        self
    }

    pub fn with_script(mut self, script: DeviceScript) -> Self {
        self.script = script;
        self
    }

    pub fn ledger(&self) -> Arc<DeviceLedger> {
        self.ledger.clone()
    }

    pub fn opened(&self) -> usize {
        self.ledger.opened()
    }

    pub fn released(&self) -> usize {
        self.ledger.released()
    }

    pub fn open_handles(&self) -> usize {
        self.ledger.open_handles()
    }
}

impl Default for SyntheticDrivers {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDrivers for SyntheticDrivers {
    fn board_library_available(&self) -> bool {
        self.board_library
    }

    fn open_generic(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if !self.generic_devices.contains(&config.device_index) {
            return Err(CameraError::DeviceUnavailable(format!(
                "no synthetic camera at index {}",
                config.device_index
            )));
        }
        Ok(Box::new(SyntheticDevice::new(
            &format!("synthetic generic {}", config.device_index),
            config,
            self.script.clone(),
            self.ledger.clone(),
        )))
    }

    fn open_board(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if !self.board_library {
            return Err(CameraError::BoardLibraryMissing);
        }
        if !self.board_camera {
            return Err(CameraError::DeviceUnavailable(
                "synthetic board camera not connected".to_string(),
            ));
        }
        let script = DeviceScript {
            layout: PixelLayout::I420,
            ..self.script.clone()
        };
        Ok(Box::new(SyntheticDevice::new(
            "synthetic board",
            config,
            script,
            self.ledger.clone(),
        )))
    }
}

/// Counters shared by a fake transport and its peers
#[derive(Debug, Default)]
pub struct TransportStats {
    pub peers_opened: AtomicUsize,
    pub peers_closed: AtomicUsize,
    pub tracks_added: AtomicUsize,
    pub frames_written: AtomicU64,
    pub error_frames_written: AtomicU64,
}

/// Transport that answers every offer locally and lets tests inject state
/// changes
#[derive(Debug, Default)]
pub struct FakeTransport {
    fail_open: AtomicBool,
    fail_track: AtomicBool,
    fail_negotiation: AtomicBool,
    events: Mutex<HashMap<SessionId, TransportEvents>>,
    stats: Arc<TransportStats>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_track(&self, fail: bool) {
        self.fail_track.store(fail, Ordering::SeqCst);
    }

    pub fn fail_negotiation(&self, fail: bool) {
        self.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.events
            .lock()
            .map(|events| events.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Report a state change for `id` as the real transport would.
    /// Returns false if no peer was ever opened for that session.
    pub fn emit(&self, id: SessionId, state: TransportState) -> bool {
        let events = self
            .events
            .lock()
            .ok()
            .and_then(|events| events.get(&id).cloned());
        match events {
            Some(events) => {
                events.state_changed(state);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn open_peer(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerLink>, SessionError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::Internal("fake peer refused".to_string()));
        }
        if let Ok(mut registered) = self.events.lock() {
            registered.insert(id, events);
        }
        self.stats.peers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePeer {
            id,
            fail_track: self.fail_track.load(Ordering::SeqCst),
            fail_negotiation: self.fail_negotiation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            stats: self.stats.clone(),
        }))
    }
}

struct FakePeer {
    id: SessionId,
    fail_track: bool,
    fail_negotiation: bool,
    closed: AtomicBool,
    stats: Arc<TransportStats>,
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn add_video_track(&self, _config: &CameraConfig) -> Result<Box<dyn VideoSink>, SessionError> {
        if self.fail_track {
            return Err(SessionError::Negotiation("fake track refused".to_string()));
        }
        self.stats.tracks_added.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSink {
            stats: self.stats.clone(),
        }))
    }

    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, SessionError> {
        if self.fail_negotiation {
            return Err(SessionError::Negotiation("fake negotiation failure".to_string()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=x-offer-bytes:{}\r\n",
            self.id.as_uuid().as_u128() as u64,
            offer.sdp.len()
        )))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.peers_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct CountingSink {
    stats: Arc<TransportStats>,
}

#[async_trait]
impl VideoSink for CountingSink {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.stats.frames_written.fetch_add(1, Ordering::SeqCst);
        if frame.error_frame {
            self.stats.error_frames_written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
