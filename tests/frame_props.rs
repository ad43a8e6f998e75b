//! Property tests for frame normalization and substitute frames

use crabgate::camera::frame::{conform, error_frame, normalize, to_rgb24};
use crabgate::camera::{ErrorMarker, PixelLayout, RawFrame};
use proptest::prelude::*;

fn even(max: u32) -> impl Strategy<Value = u32> {
    (1u32..=max / 2).prop_map(|n| n * 2)
}

fn layout() -> impl Strategy<Value = PixelLayout> {
    prop_oneof![
        Just(PixelLayout::Rgb24),
        Just(PixelLayout::Bgr24),
        Just(PixelLayout::Yuyv),
        Just(PixelLayout::I420),
    ]
}

fn raw_len(layout: PixelLayout, width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    match layout {
        PixelLayout::Rgb24 | PixelLayout::Bgr24 => w * h * 3,
        PixelLayout::Yuyv => w * h * 2,
        PixelLayout::I420 => w * h + 2 * (w / 2) * (h / 2),
    }
}

proptest! {
    #[test]
    fn error_frames_have_frame_length(
        width in even(320),
        height in even(240),
        board in any::<bool>(),
    ) {
        let marker = if board { ErrorMarker::CaptureError } else { ErrorMarker::NoSignal };
        let data = error_frame(width, height, marker);
        prop_assert_eq!(data.len(), (width * height * 3) as usize);
        // Corners always keep the fill
        prop_assert_eq!(&data[0..3], &[16, 16, 16]);
        let last = data.len() - 3;
        prop_assert_eq!(&data[last..], &[16, 16, 16]);
    }

    #[test]
    fn normalize_yields_rgb24(
        layout in layout(),
        width in even(96),
        height in even(64),
        seed in any::<u8>(),
    ) {
        let data: Vec<u8> = (0..raw_len(layout, width, height))
            .map(|i| (i as u8).wrapping_add(seed))
            .collect();
        let raw = RawFrame { data, width, height, layout };
        let rgb = normalize(&raw).unwrap();
        prop_assert_eq!(rgb.len(), (width * height * 3) as usize);
    }

    #[test]
    fn truncated_frames_are_rejected(
        layout in layout(),
        width in even(64),
        height in even(64),
        missing in 1usize..16,
    ) {
        let len = raw_len(layout, width, height).saturating_sub(missing);
        let raw = RawFrame { data: vec![0; len], width, height, layout };
        prop_assert!(normalize(&raw).is_err());
    }

    #[test]
    fn conform_hits_target_size(
        src_w in even(128),
        src_h in even(96),
        dst_w in even(128),
        dst_h in even(96),
    ) {
        let rgb = vec![90u8; (src_w * src_h * 3) as usize];
        let out = conform(rgb, src_w, src_h, dst_w, dst_h).unwrap();
        prop_assert_eq!(out.len(), (dst_w * dst_h * 3) as usize);
    }

    #[test]
    fn to_rgb24_matches_requested_shape(
        layout in layout(),
        native_w in even(80),
        native_h in even(60),
    ) {
        let raw = RawFrame {
            data: vec![128; raw_len(layout, native_w, native_h)],
            width: native_w,
            height: native_h,
            layout,
        };
        let rgb = to_rgb24(&raw, 32, 24).unwrap();
        prop_assert_eq!(rgb.len(), 32 * 24 * 3);
    }
}
