use std::time::Duration;

use crate::convert::nv12::Nv12Frame;
use crate::foundation::core::Canvas;
use crate::foundation::error::TimelapseResult;

/// Settings handed to an [`EncoderEngine`] before it is started.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
    /// Frame dimensions (even).
    pub canvas: Canvas,
    /// Integral frame rate advertised to the codec (at least 1).
    pub frame_rate: u32,
    /// Constant presentation-timestamp step in microseconds.
    pub frame_interval_us: u64,
    /// Target bitrate in bits per second (already capped).
    pub bitrate: u32,
    /// Seconds between forced key frames.
    pub keyframe_interval_secs: u32,
}

/// Bitstream description announced once by the encoder before its first sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    /// Coded frame dimensions.
    pub canvas: Canvas,
    /// H.264 sequence parameter set (NAL unit without start code).
    pub sps: Vec<u8>,
    /// H.264 picture parameter set (NAL unit without start code).
    pub pps: Vec<u8>,
    /// Constant sample duration in microseconds.
    pub frame_interval_us: u64,
}

/// One unit of compressed encoder output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedSample {
    /// Annex-B access unit bytes; empty for a bare end-of-stream marker.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub pts_us: u64,
    /// Access unit holds an IDR picture.
    pub key_frame: bool,
    /// Last sample the encoder will emit.
    pub end_of_stream: bool,
}

impl CompressedSample {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Result of offering input to the encoder.
#[derive(Debug)]
pub enum Submit<T> {
    /// The input was queued.
    Accepted,
    /// No input slot freed up within the wait; the input is handed back for a retry.
    Retry(T),
}

/// Result of polling the encoder's output queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    /// Nothing became ready within the wait.
    TryAgainLater,
    /// The encoder announced its output format. Happens exactly once per session.
    FormatChanged(OutputFormat),
    /// A compressed sample is ready.
    Sample(CompressedSample),
}

/// Narrow capability interface over an asynchronous video encoder.
///
/// Call order: `configure`, `start`, any number of `queue_input` / `dequeue_output`,
/// `queue_end_of_stream`, `dequeue_output` until a sample flagged end-of-stream, `stop`.
/// `stop` must be callable from any state and more than once.
pub trait EncoderEngine: Send {
    /// Apply settings. Called once, before `start`.
    fn configure(&mut self, cfg: &EncoderConfig) -> TimelapseResult<()>;
    /// Allocate the codec and begin accepting input.
    fn start(&mut self) -> TimelapseResult<()>;
    /// Offer one raw frame, waiting at most `timeout` for a free input slot.
    fn queue_input(
        &mut self,
        frame: Nv12Frame,
        pts_us: u64,
        timeout: Duration,
    ) -> TimelapseResult<Submit<Nv12Frame>>;
    /// Offer the end-of-stream marker, waiting at most `timeout` for a free input slot.
    fn queue_end_of_stream(&mut self, pts_us: u64, timeout: Duration)
    -> TimelapseResult<Submit<()>>;
    /// Wait at most `timeout` for the next output event.
    fn dequeue_output(&mut self, timeout: Duration) -> TimelapseResult<OutputEvent>;
    /// Release the codec. Idempotent.
    fn stop(&mut self) -> TimelapseResult<()>;
}
