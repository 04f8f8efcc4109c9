use crate::foundation::core::Canvas;

/// Source-space rectangle selected for scaling onto the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge in source pixels.
    pub x: u32,
    /// Top edge in source pixels.
    pub y: u32,
    /// Width in source pixels.
    pub width: u32,
    /// Height in source pixels.
    pub height: u32,
}

/// Centered crop of a `src_w`x`src_h` image that matches the canvas aspect ratio.
///
/// A wider source keeps its full height and loses columns on both sides; a taller source keeps
/// its full width and loses rows top and bottom. Equal aspects select the whole image.
pub fn crop_rect(src_w: u32, src_h: u32, canvas: Canvas) -> CropRect {
    let full = CropRect {
        x: 0,
        y: 0,
        width: src_w,
        height: src_h,
    };
    if src_w == 0 || src_h == 0 {
        return full;
    }

    let src_aspect = f64::from(src_w) / f64::from(src_h);
    let dst_aspect = canvas.aspect();

    if src_aspect > dst_aspect {
        let new_w = ((f64::from(src_h) * dst_aspect) as u32).clamp(1, src_w);
        CropRect {
            x: (src_w - new_w) / 2,
            width: new_w,
            ..full
        }
    } else if src_aspect < dst_aspect {
        let new_h = ((f64::from(src_w) / dst_aspect) as u32).clamp(1, src_h);
        CropRect {
            y: (src_h - new_h) / 2,
            height: new_h,
            ..full
        }
    } else {
        full
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/crop.rs"]
mod tests;
