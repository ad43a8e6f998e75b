//! Pixel normalization for captured frames
//!
//! Every backend's native layout is converted to packed RGB24 and conformed
//! to the source's configured resolution before it leaves the camera layer.

use super::{PixelLayout, RawFrame};

/// Fill value of substituted frames
const ERROR_FILL: [u8; 3] = [16, 16, 16];

/// Status marker drawn on a substituted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMarker {
    /// Device produced nothing this tick
    NoSignal,
    /// Device read raised an error
    CaptureError,
}

impl ErrorMarker {
    fn color(self) -> [u8; 3] {
        match self {
            ErrorMarker::NoSignal => [255, 255, 255],
            ErrorMarker::CaptureError => [255, 0, 0],
        }
    }
}

/// Convert a raw frame to RGB24 at `width` x `height`.
pub fn to_rgb24(raw: &RawFrame, width: u32, height: u32) -> Result<Vec<u8>, String> {
    let rgb = normalize(raw)?;
    conform(rgb, raw.width, raw.height, width, height)
}

/// Convert a raw frame to RGB24 at its native resolution.
pub fn normalize(raw: &RawFrame) -> Result<Vec<u8>, String> {
    let pixels = raw.width as usize * raw.height as usize;
    let expected = match raw.layout {
        PixelLayout::Rgb24 | PixelLayout::Bgr24 => pixels * 3,
        PixelLayout::Yuyv => pixels * 2,
        PixelLayout::I420 => pixels + 2 * ((raw.width as usize / 2) * (raw.height as usize / 2)),
    };
    if raw.data.len() != expected {
        return Err(format!(
            "{:?} frame {}x{} should be {} bytes, got {}",
            raw.layout,
            raw.width,
            raw.height,
            expected,
            raw.data.len()
        ));
    }

    Ok(match raw.layout {
        PixelLayout::Rgb24 => raw.data.clone(),
        PixelLayout::Bgr24 => bgr_to_rgb(&raw.data),
        PixelLayout::Yuyv => yuyv_to_rgb(&raw.data),
        PixelLayout::I420 => i420_to_rgb(&raw.data, raw.width, raw.height),
    })
}

/// Resize RGB24 data when the backend clamped the requested resolution
pub fn conform(
    rgb: Vec<u8>,
    src_width: u32,
    src_height: u32,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, String> {
    if src_width == width && src_height == height {
        return Ok(rgb);
    }

    log::debug!(
        "Resizing frame from {}x{} to {}x{}",
        src_width,
        src_height,
        width,
        height
    );

    let img = image::RgbImage::from_raw(src_width, src_height, rgb).ok_or_else(|| {
        format!(
            "Failed to create image buffer for {}x{} RGB frame",
            src_width, src_height
        )
    })?;

    let resized = image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
    Ok(resized.into_raw())
}

/// Build a substitute frame: uniform fill with a status band across the middle.
pub fn error_frame(width: u32, height: u32, marker: ErrorMarker) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut data = ERROR_FILL.repeat(w * h);

    let thickness = (h / 12).max(2).min(h);
    let top = (h - thickness) / 2;
    let left = w / 8;
    let right = w - w / 8;
    let color = marker.color();

    for y in top..top + thickness {
        for x in left..right {
            let idx = (y * w + x) * 3;
            data[idx..idx + 3].copy_from_slice(&color);
        }
    }

    data
}

fn bgr_to_rgb(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = bgr.to_vec();
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    rgb
}

/// BT.601 limited-range YUV to RGB for a single pixel
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn i420_to_rgb(yuv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let cw = w / 2;
    let (y_plane, chroma) = yuv.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(cw * (h / 2));

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            // Odd trailing rows/columns reuse the last chroma sample
            let cx = (x / 2).min(cw.saturating_sub(1));
            let cy = (y / 2).min((h / 2).saturating_sub(1));
            let uv = cy * cw + cx;
            rgb.extend_from_slice(&yuv_to_rgb(y_plane[y * w + x], u_plane[uv], v_plane[uv]));
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(layout: PixelLayout, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            data,
            width,
            height,
            layout,
        }
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let frame = raw(PixelLayout::Bgr24, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(normalize(&frame).unwrap(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_yuyv_black_and_white() {
        let frame = raw(PixelLayout::Yuyv, 2, 1, vec![16, 128, 235, 128]);
        assert_eq!(normalize(&frame).unwrap(), vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_i420_grey_plane() {
        let mut data = vec![126u8; 4 * 2];
        data.extend(vec![128u8; 2 * 2]);
        let frame = raw(PixelLayout::I420, 4, 2, data);
        let rgb = normalize(&frame).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert!(rgb.iter().all(|&v| v == rgb[0]));
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let frame = raw(PixelLayout::Rgb24, 4, 4, vec![0; 10]);
        assert!(normalize(&frame).is_err());
    }

    #[test]
    fn test_conform_resizes_to_target() {
        let rgb = vec![200u8; 8 * 6 * 3];
        let out = conform(rgb, 8, 6, 4, 2).unwrap();
        assert_eq!(out.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_error_frame_shape_and_marker() {
        let data = error_frame(64, 48, ErrorMarker::CaptureError);
        assert_eq!(data.len(), 64 * 48 * 3);
        assert_eq!(&data[0..3], &ERROR_FILL);
        let centre = ((24 * 64) + 32) * 3;
        assert_eq!(&data[centre..centre + 3], &[255, 0, 0]);
    }

    #[test]
    fn test_error_frame_tiny_resolution() {
        let data = error_frame(2, 2, ErrorMarker::NoSignal);
        assert_eq!(data.len(), 2 * 2 * 3);
    }
}
