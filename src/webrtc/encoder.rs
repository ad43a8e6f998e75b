use crate::types::Frame;
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

/// Convert RGB24 to YUV420 planar format
pub fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    // YUV420: Y plane (w*h) + U plane (w/2 * h/2) + V plane (w/2 * h/2)
    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let rgb_idx = (y * w + x) * 3;
            let r = rgb[rgb_idx] as i32;
            let g = rgb[rgb_idx + 1] as i32;
            let b = rgb[rgb_idx + 2] as i32;

            // BT.601 conversion
            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // Subsample U and V (2x2 blocks)
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// One encoded H.264 access unit
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub pts: u64,
    pub keyframe: bool,
}

/// H.264 encoder for a session's outbound track
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    keyframe_interval: u64,
    frame_count: u64,
}

impl H264Encoder {
    /// Create an encoder that forces an intra frame every `keyframe_interval`
    /// frames, so late-joining decoders recover quickly.
    pub fn new(width: u32, height: u32, keyframe_interval: u64) -> Result<Self, String> {
        let encoder = Encoder::new().map_err(|e| format!("Failed to create H.264 encoder: {}", e))?;

        Ok(Self {
            encoder,
            width,
            height,
            keyframe_interval: keyframe_interval.max(1),
            frame_count: 0,
        })
    }

    pub fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, String> {
        if frame.width != self.width || frame.height != self.height {
            return Err(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            ));
        }

        if self.frame_count > 0 && self.frame_count % self.keyframe_interval == 0 {
            self.encoder.force_intra_frame();
        }

        let yuv = rgb_to_yuv420(&frame.data, frame.width, frame.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| format!("H.264 encoding failed: {}", e))?;

        self.frame_count += 1;

        Ok(EncodedFrame {
            keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
            pts: frame.pts,
        })
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frame_count
    }
}

// Owned by one sink and only moved between its worker calls.
unsafe impl Send for H264Encoder {}
