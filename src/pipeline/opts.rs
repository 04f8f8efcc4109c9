use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::encode::driver::DriverTimeouts;
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Tunables shared by every request a [`Pipeline`](crate::Pipeline) runs.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOpts {
    /// Wait for a free encoder input slot per attempt.
    pub submit_timeout_ms: u64,
    /// Wait per encoder output poll.
    pub drain_timeout_ms: u64,
    /// Longest time a retry loop or the end-of-stream drain may go without progress.
    pub stall_timeout_ms: u64,
    /// Canvas fill behind letterboxing and transparent pixels.
    pub background_rgb: [u8; 3],
    /// Ceiling applied to the requested bitrate.
    pub max_bitrate: u32,
    /// Seconds between forced key frames.
    pub keyframe_interval_secs: u32,
    /// Report success when no image could be encoded (the container is empty).
    pub allow_empty_output: bool,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 10,
            drain_timeout_ms: 10,
            stall_timeout_ms: 30_000,
            background_rgb: [0, 0, 0],
            max_bitrate: 2_000_000,
            keyframe_interval_secs: 2,
            allow_empty_output: false,
        }
    }
}

impl PipelineOpts {
    /// Load options from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> TimelapseResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read options file '{}'", path.display()))?;
        serde_json::from_str(&text).map_err(|e| {
            TimelapseError::invalid_input(format!("invalid options '{}': {e}", path.display()))
        })
    }

    /// Reject settings no request could run with.
    pub fn validate(&self) -> TimelapseResult<()> {
        if self.stall_timeout_ms == 0 {
            return Err(TimelapseError::invalid_input(
                "stall_timeout_ms must be non-zero",
            ));
        }
        if self.max_bitrate == 0 {
            return Err(TimelapseError::invalid_input("max_bitrate must be non-zero"));
        }
        if self.keyframe_interval_secs == 0 {
            return Err(TimelapseError::invalid_input(
                "keyframe_interval_secs must be non-zero",
            ));
        }
        Ok(())
    }

    /// Driver waits derived from these options.
    pub fn timeouts(&self) -> DriverTimeouts {
        DriverTimeouts {
            submit: Duration::from_millis(self.submit_timeout_ms),
            drain: Duration::from_millis(self.drain_timeout_ms),
            stall: self.stall(),
        }
    }

    pub(crate) fn stall(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}
