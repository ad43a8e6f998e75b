use crabgate::camera::{CameraSource, CameraSourceFactory};
use crabgate::errors::CameraError;
use crabgate::platform::PlatformDetector;
use crabgate::testing::{DeviceScript, SyntheticDrivers};
use crabgate::types::{CameraBackend, CameraConfig, VIDEO_CLOCK_RATE};
use std::sync::Arc;

fn factory_on(host: &str, arch: &str, drivers: SyntheticDrivers) -> CameraSourceFactory {
    CameraSourceFactory::new(PlatformDetector::new(Arc::new(drivers)).with_host_info(host, arch))
}

fn pc_factory(drivers: SyntheticDrivers) -> CameraSourceFactory {
    factory_on("Generic PC", "x86_64", drivers)
}

fn small(backend: CameraBackend) -> CameraConfig {
    CameraConfig::new(backend, 32, 24, 240)
}

/// Colour at the centre of the frame, inside any status band
fn centre_pixel(source: &CameraSource, data: &[u8]) -> [u8; 3] {
    let config = source.config();
    let idx = ((config.height / 2 * config.width + config.width / 2) * 3) as usize;
    [data[idx], data[idx + 1], data[idx + 2]]
}

#[test]
fn test_frames_keep_shape_through_transient_failures() {
    let script = DeviceScript {
        transient_failures: [1, 3, 4].into_iter().collect(),
        ..Default::default()
    };
    let drivers = SyntheticDrivers::new()
        .with_generic_devices([0])
        .with_script(script);
    let mut source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();

    let step = (VIDEO_CLOCK_RATE / 240) as u64;
    for i in 0..8u64 {
        let frame = source.next_frame().unwrap();
        assert!(frame.matches(source.config()), "frame {} has wrong shape", i);
        assert_eq!(frame.sequence, i);
        assert_eq!(frame.pts, i * step);
        assert_eq!(frame.error_frame, [1, 3, 4].contains(&i), "frame {}", i);
    }
}

#[test]
fn test_generic_failure_marks_no_signal() {
    let script = DeviceScript {
        transient_failures: [0].into_iter().collect(),
        ..Default::default()
    };
    let drivers = SyntheticDrivers::new()
        .with_generic_devices([0])
        .with_script(script);
    let mut source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();

    let frame = source.next_frame().unwrap();
    assert!(frame.error_frame);
    assert_eq!(centre_pixel(&source, &frame.data), [255, 255, 255]);
    assert_eq!(&frame.data[0..3], &[16, 16, 16]);
}

#[test]
fn test_board_failure_marks_capture_error() {
    let script = DeviceScript {
        transient_failures: [0].into_iter().collect(),
        ..Default::default()
    };
    let drivers = SyntheticDrivers::new()
        .with_board_library(true)
        .with_board_camera(true)
        .with_script(script);
    let mut source = factory_on("Raspberry Pi 4 Model B", "aarch64", drivers)
        .build(&small(CameraBackend::Auto))
        .unwrap();
    assert_eq!(source.backend(), CameraBackend::Board);

    let frame = source.next_frame().unwrap();
    assert!(frame.error_frame);
    assert_eq!(centre_pixel(&source, &frame.data), [255, 0, 0]);

    let frame = source.next_frame().unwrap();
    assert!(!frame.error_frame);
    assert!(frame.matches(source.config()));
}

#[test]
fn test_clamped_resolution_is_resized() {
    let script = DeviceScript {
        native_size: Some((64, 48)),
        ..Default::default()
    };
    let drivers = SyntheticDrivers::new()
        .with_generic_devices([0])
        .with_script(script);
    let mut source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();

    let frame = source.next_frame().unwrap();
    assert!(!frame.error_frame);
    assert_eq!((frame.width, frame.height), (32, 24));
    assert_eq!(frame.data.len(), 32 * 24 * 3);
}

#[test]
fn test_disconnect_is_reported_once() {
    let script = DeviceScript {
        disconnect_at: Some(2),
        ..Default::default()
    };
    let drivers = SyntheticDrivers::new()
        .with_generic_devices([0])
        .with_script(script);
    let mut source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();

    assert!(!source.next_frame().unwrap().error_frame);
    assert!(!source.next_frame().unwrap().error_frame);
    assert!(matches!(source.next_frame(), Err(CameraError::DeviceLost(_))));

    let after = source.next_frame().unwrap();
    assert!(after.error_frame);
    assert!(after.matches(source.config()));
}

#[test]
fn test_close_is_idempotent() {
    let drivers = SyntheticDrivers::new().with_generic_devices([0]);
    let ledger = drivers.ledger();
    let mut source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();

    assert!(source.is_open());
    source.close();
    source.close();
    assert!(!source.is_open());
    assert_eq!(ledger.released(), 1);
    assert!(matches!(source.next_frame(), Err(CameraError::SourceClosed)));

    drop(source);
    assert_eq!(ledger.released(), 1);
}

#[test]
fn test_drop_releases_device() {
    let drivers = SyntheticDrivers::new().with_generic_devices([0]);
    let ledger = drivers.ledger();
    let source = pc_factory(drivers).build(&small(CameraBackend::Generic)).unwrap();
    drop(source);
    assert_eq!(ledger.opened(), 1);
    assert_eq!(ledger.released(), 1);
}

#[test]
fn test_reopen_after_close() {
    let drivers = SyntheticDrivers::new().with_generic_devices([0]);
    let ledger = drivers.ledger();
    let factory = pc_factory(drivers);

    let mut first = factory.build(&small(CameraBackend::Generic)).unwrap();
    first.next_frame().unwrap();
    first.close();

    let mut second = factory.build(&small(CameraBackend::Generic)).unwrap();
    assert!(!second.next_frame().unwrap().error_frame);
    assert_eq!(ledger.open_handles(), 1);
    second.close();
    assert_eq!(ledger.open_handles(), 0);
}

#[test]
fn test_board_camera_failure_falls_back_to_generic() {
    let drivers = SyntheticDrivers::new()
        .with_board_library(true)
        .with_board_camera(false)
        .with_generic_devices([0]);
    let source = factory_on("Raspberry Pi 5", "aarch64", drivers)
        .build(&CameraConfig::new(CameraBackend::Board, 320, 240, 15))
        .unwrap();

    assert_eq!(source.backend(), CameraBackend::Generic);
    assert_eq!(source.config().width, 320);
    assert_eq!(source.config().height, 240);
    assert_eq!(source.config().fps, 15);
}

#[test]
fn test_explicit_generic_on_board_host_stays_generic() {
    let drivers = SyntheticDrivers::new()
        .with_board_library(true)
        .with_board_camera(true)
        .with_generic_devices([1]);
    let source = factory_on("Raspberry Pi 4", "aarch64", drivers)
        .build(&small(CameraBackend::Generic).with_device_index(1))
        .unwrap();
    assert_eq!(source.backend(), CameraBackend::Generic);
    assert_eq!(source.config().device_index, 1);
}

#[test]
fn test_no_working_camera_is_device_unavailable() {
    let drivers = SyntheticDrivers::new().with_board_library(true);
    let ledger = drivers.ledger();
    let err = factory_on("Raspberry Pi 4", "aarch64", drivers)
        .build(&small(CameraBackend::Auto))
        .unwrap_err();
    assert!(matches!(err, CameraError::DeviceUnavailable(_)));
    assert_eq!(ledger.open_handles(), 0);
}
