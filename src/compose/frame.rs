use image::{RgbaImage, imageops};

use crate::assets::decode::SourceImage;
use crate::compose::crop::crop_rect;
use crate::foundation::core::Canvas;
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Canvas-sized opaque RGBA8 frame ready for color conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanvasFrame {
    /// Frame dimensions.
    pub canvas: Canvas,
    /// Row-major RGBA8 pixels; alpha is always 255.
    pub rgba8: Vec<u8>,
}

impl CanvasFrame {
    /// Frame filled with a single opaque color.
    pub fn filled(canvas: Canvas, rgb: [u8; 3]) -> Self {
        let px = [rgb[0], rgb[1], rgb[2], 255];
        Self {
            canvas,
            rgba8: px.iter().copied().cycle().take(canvas.pixel_count() * 4).collect(),
        }
    }
}

/// Fit `src` onto `canvas`: aspect-preserving center crop, bilinear scale, then flatten over an
/// opaque `background`.
pub fn compose(src: &SourceImage, canvas: Canvas, background: [u8; 3]) -> TimelapseResult<CanvasFrame> {
    let source = RgbaImage::from_raw(src.width, src.height, src.rgba8.clone())
        .ok_or_else(|| {
            TimelapseError::decode(format!(
                "source buffer of {} bytes does not hold {}x{} rgba8 pixels",
                src.rgba8.len(),
                src.width,
                src.height
            ))
        })?;
    if src.width == 0 || src.height == 0 {
        return Err(TimelapseError::decode("source image has no pixels"));
    }

    let crop = crop_rect(src.width, src.height, canvas);
    let cropped = imageops::crop_imm(&source, crop.x, crop.y, crop.width, crop.height).to_image();
    let scaled = if cropped.dimensions() == (canvas.width, canvas.height) {
        cropped
    } else {
        imageops::resize(
            &cropped,
            canvas.width,
            canvas.height,
            imageops::FilterType::Triangle,
        )
    };

    let mut frame = CanvasFrame::filled(canvas, background);
    flatten_over_background(&mut frame.rgba8, scaled.as_raw(), background)?;
    Ok(frame)
}

fn flatten_over_background(dst: &mut [u8], src: &[u8], bg: [u8; 3]) -> TimelapseResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(TimelapseError::protocol(
            "flatten_over_background expects equal-length rgba8 buffers",
        ));
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d[..3].copy_from_slice(&s[..3]);
        } else if a != 0 {
            let inv = 255 - a;
            for c in 0..3 {
                d[c] = (mul_div255(u16::from(s[c]), a) + mul_div255(u16::from(bg[c]), inv))
                    .min(255) as u8;
            }
        }
        d[3] = 255;
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

#[cfg(test)]
#[path = "../../tests/unit/compose/frame.rs"]
mod tests;
