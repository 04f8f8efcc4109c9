use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Zero-based index of a frame actually submitted to the encoder.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Output pixel dimensions every frame is normalized to.
///
/// Both dimensions are even and non-zero; hardware and software H.264 encoders reject odd
/// 4:2:0 frame sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    /// Largest accepted dimension (MP4 sample entries store 16-bit sizes).
    pub const MAX_DIMENSION: u32 = 65_534;

    /// Force both dimensions to the nearest even value at or below the input.
    pub fn even_floor(width: u32, height: u32) -> TimelapseResult<Self> {
        let width = width & !1;
        let height = height & !1;
        if width == 0 || height == 0 {
            return Err(TimelapseError::invalid_input(format!(
                "invalid output size {width}x{height}"
            )));
        }
        if width > Self::MAX_DIMENSION || height > Self::MAX_DIMENSION {
            return Err(TimelapseError::invalid_input(format!(
                "output size {width}x{height} exceeds {max}x{max}",
                max = Self::MAX_DIMENSION
            )));
        }
        Ok(Self { width, height })
    }

    /// Width divided by height.
    pub fn aspect(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Number of pixels on the canvas.
    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Requested frame rate in frames per second (positive, finite).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Fps(f64);

impl Fps {
    /// Validate a frames-per-second value.
    pub fn new(per_sec: f64) -> TimelapseResult<Self> {
        if !per_sec.is_finite() || per_sec <= 0.0 {
            return Err(TimelapseError::invalid_input(format!(
                "fps must be a positive number, got {per_sec}"
            )));
        }
        Ok(Self(per_sec))
    }

    /// Raw frames-per-second value.
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Integral rate advertised to the encoder (never below 1).
    pub fn encoder_rate(self) -> u32 {
        self.0.round().max(1.0).min(f64::from(u32::MAX)) as u32
    }

    /// Constant presentation-timestamp increment in microseconds (never below 1).
    pub fn frame_interval_us(self) -> u64 {
        (1_000_000.0 / self.0).round().max(1.0) as u64
    }

    /// Presentation timestamp of `frame` in microseconds.
    pub fn pts_us(self, frame: FrameIndex) -> u64 {
        frame.0.saturating_mul(self.frame_interval_us())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
