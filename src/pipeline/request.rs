use std::path::PathBuf;

use crate::foundation::core::Canvas;
use crate::foundation::error::{TimelapseError, TimelapseResult};

fn default_fps() -> f64 {
    1.0
}

fn default_bitrate() -> u32 {
    6_000_000
}

/// One image-sequence-to-video job.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodeRequest {
    /// Source images in presentation order. Must be non-empty.
    #[serde(alias = "imagePaths")]
    pub image_paths: Vec<PathBuf>,
    /// Destination MP4 file. Parent directories are created; an existing file is replaced.
    #[serde(alias = "outputPath")]
    pub output_path: PathBuf,
    /// Frames per second (positive).
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Output width; defaults to the first image's width. Rounded down to even.
    #[serde(default)]
    pub width: Option<u32>,
    /// Output height; defaults to the first image's height. Rounded down to even.
    #[serde(default)]
    pub height: Option<u32>,
    /// Requested bitrate in bits per second; capped by `PipelineOpts::max_bitrate`.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

impl EncodeRequest {
    /// Request with default size and bitrate.
    pub fn new(image_paths: Vec<PathBuf>, output_path: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            image_paths,
            output_path: output_path.into(),
            fps,
            width: None,
            height: None,
            bitrate: default_bitrate(),
        }
    }

    /// Override the output size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Override the requested bitrate.
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Parse a JSON request document.
    pub fn from_json_str(s: &str) -> TimelapseResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| TimelapseError::invalid_input(format!("invalid request json: {e}")))
    }
}

/// Successful request result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeOutcome {
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// Canvas all frames were normalized to.
    pub canvas: Canvas,
    /// Frames handed to the encoder.
    pub frames_encoded: u64,
    /// Images skipped because they could not be decoded.
    pub images_skipped: u64,
    /// Compressed samples written to the container.
    pub samples_written: u64,
    /// Compressed payload bytes written to the container.
    pub bytes_written: u64,
}

/// Caller-facing result: exactly one success or failure per request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncodeResponse {
    /// The video was written.
    Success {
        /// Absolute output path.
        path: String,
    },
    /// The request failed.
    Failure {
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl EncodeResponse {
    /// `true` for [`EncodeResponse::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<&TimelapseResult<EncodeOutcome>> for EncodeResponse {
    fn from(res: &TimelapseResult<EncodeOutcome>) -> Self {
        match res {
            Ok(outcome) => Self::Success {
                path: outcome.path.display().to_string(),
            },
            Err(e) => Self::Failure {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<TimelapseResult<EncodeOutcome>> for EncodeResponse {
    fn from(res: TimelapseResult<EncodeOutcome>) -> Self {
        Self::from(&res)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/request.rs"]
mod tests;
