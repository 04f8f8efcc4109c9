use crate::compose::frame::CanvasFrame;
use crate::foundation::core::Canvas;
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Canvas-sized frame in semi-planar 4:2:0 layout: a full-resolution Y plane followed by a
/// half-resolution plane of interleaved U,V pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nv12Frame {
    /// Frame dimensions (both even).
    pub canvas: Canvas,
    /// `width * height * 3 / 2` bytes.
    pub data: Vec<u8>,
}

impl Nv12Frame {
    /// Size in bytes of an NV12 frame for `canvas`.
    pub fn byte_len(canvas: Canvas) -> usize {
        canvas.pixel_count() * 3 / 2
    }

    /// Luma plane.
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.canvas.pixel_count()]
    }

    /// Interleaved chroma plane (U first).
    pub fn uv_plane(&self) -> &[u8] {
        &self.data[self.canvas.pixel_count()..]
    }
}

/// Convert an opaque canvas frame to NV12.
pub fn to_nv12(frame: &CanvasFrame) -> TimelapseResult<Nv12Frame> {
    let data = rgba8_to_nv12(&frame.rgba8, frame.canvas.width, frame.canvas.height)?;
    Ok(Nv12Frame {
        canvas: frame.canvas,
        data,
    })
}

/// Convert row-major RGBA8 pixels to NV12.
///
/// Luma is computed for every pixel; chroma is taken from the top-left pixel of every 2x2
/// block. Values are truncated toward zero and then clamped to `0..=255`. The alpha channel is
/// ignored.
pub fn rgba8_to_nv12(rgba8: &[u8], width: u32, height: u32) -> TimelapseResult<Vec<u8>> {
    if !width.is_multiple_of(2) || !height.is_multiple_of(2) || width == 0 || height == 0 {
        return Err(TimelapseError::invalid_input(format!(
            "nv12 needs even non-zero dimensions, got {width}x{height}"
        )));
    }
    let (w, h) = (width as usize, height as usize);
    if rgba8.len() != w * h * 4 {
        return Err(TimelapseError::invalid_input(format!(
            "rgba8 buffer has {} bytes, expected {}",
            rgba8.len(),
            w * h * 4
        )));
    }

    let y_size = w * h;
    let mut out = vec![0u8; y_size + y_size / 2];
    let (y_plane, uv_plane) = out.split_at_mut(y_size);
    let mut uv = 0;

    for (j, row) in rgba8.chunks_exact(w * 4).enumerate() {
        for (i, px) in row.chunks_exact(4).enumerate() {
            let (r, g, b) = (f64::from(px[0]), f64::from(px[1]), f64::from(px[2]));
            y_plane[j * w + i] = clamp_u8(0.299 * r + 0.587 * g + 0.114 * b);
            if j % 2 == 0 && i % 2 == 0 {
                uv_plane[uv] = clamp_u8((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0);
                uv_plane[uv + 1] = clamp_u8((0.500 * r - 0.419 * g - 0.081 * b) + 128.0);
                uv += 2;
            }
        }
    }

    Ok(out)
}

fn clamp_u8(v: f64) -> u8 {
    (v as i32).clamp(0, 255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/convert/nv12.rs"]
mod tests;
