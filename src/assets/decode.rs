use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Decoded still image in straight (non-premultiplied) RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major, tightly packed RGBA8 pixels.
    pub rgba8: Vec<u8>,
}

impl SourceImage {
    /// Wrap an RGBA8 buffer, checking that it matches the given dimensions.
    pub fn from_rgba8(width: u32, height: u32, rgba8: Vec<u8>) -> TimelapseResult<Self> {
        if width == 0 || height == 0 {
            return Err(TimelapseError::decode(format!(
                "image has empty dimensions {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if rgba8.len() != expected {
            return Err(TimelapseError::decode(format!(
                "rgba8 buffer has {} bytes, expected {expected} for {width}x{height}",
                rgba8.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8,
        })
    }

    /// Solid-color image, handy for tests and placeholders.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let rgba8 = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            rgba8,
        }
    }
}

/// Capability that turns an image identifier into pixels.
pub trait ImageDecoder: Send + Sync {
    /// Decode the image at `path`. Failures are reported as [`TimelapseError::Decode`].
    fn decode(&self, path: &Path) -> TimelapseResult<SourceImage>;
}

/// Decoder reading files from disk through the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsImageDecoder;

impl ImageDecoder for FsImageDecoder {
    fn decode(&self, path: &Path) -> TimelapseResult<SourceImage> {
        let dyn_img = image::open(path).map_err(|e| {
            TimelapseError::decode(format!("failed to decode '{}': {e}", path.display()))
        })?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();
        SourceImage::from_rgba8(width, height, rgba.into_raw())
    }
}

/// Decoder serving pre-registered images, for tests and debugging.
///
/// Unknown paths fail to decode, which makes it easy to exercise skip-on-failure paths.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDecoder {
    images: HashMap<PathBuf, SourceImage>,
}

impl InMemoryDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image` under `path`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, image: SourceImage) -> &mut Self {
        self.images.insert(path.into(), image);
        self
    }
}

impl ImageDecoder for InMemoryDecoder {
    fn decode(&self, path: &Path) -> TimelapseResult<SourceImage> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| TimelapseError::decode(format!("no image at '{}'", path.display())))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/decode.rs"]
mod tests;
