use std::sync::{Arc, Mutex, MutexGuard};

use crate::encode::engine::{CompressedSample, OutputFormat};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::mux::writer::Muxer;

/// One call observed by an [`InMemoryMuxer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MuxCall {
    /// `add_video_track` with the announced format.
    AddTrack(OutputFormat),
    /// `start`.
    Start,
    /// `write_sample`.
    Sample {
        /// Track id the sample was written to.
        track: u32,
        /// Sample timestamp.
        pts_us: u64,
        /// Key-frame flag.
        key_frame: bool,
        /// Payload size.
        size: usize,
    },
    /// `finish`.
    Finish,
}

/// Shared view of everything an [`InMemoryMuxer`] was asked to do.
#[derive(Clone, Debug, Default)]
pub struct MuxRecording(Arc<Mutex<Vec<MuxCall>>>);

impl MuxRecording {
    fn lock(&self) -> MutexGuard<'_, Vec<MuxCall>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of all calls in order.
    pub fn calls(&self) -> Vec<MuxCall> {
        self.lock().clone()
    }

    /// Timestamps of the written samples, in write order.
    pub fn sample_pts(&self) -> Vec<u64> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                MuxCall::Sample { pts_us, .. } => Some(*pts_us),
                _ => None,
            })
            .collect()
    }
}

/// Muxer that records calls instead of writing a file, for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemoryMuxer {
    recording: MuxRecording,
    fail_finish: bool,
}

impl InMemoryMuxer {
    /// Create a muxer and the handle observing it.
    pub fn new() -> (Self, MuxRecording) {
        let muxer = Self::default();
        let recording = muxer.recording.clone();
        (muxer, recording)
    }

    /// Make `finish` report an error (after recording the call).
    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }
}

impl Muxer for InMemoryMuxer {
    fn add_video_track(&mut self, format: &OutputFormat) -> TimelapseResult<u32> {
        self.recording.lock().push(MuxCall::AddTrack(format.clone()));
        Ok(1)
    }

    fn start(&mut self) -> TimelapseResult<()> {
        self.recording.lock().push(MuxCall::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: u32, sample: &CompressedSample) -> TimelapseResult<()> {
        self.recording.lock().push(MuxCall::Sample {
            track,
            pts_us: sample.pts_us,
            key_frame: sample.key_frame,
            size: sample.size(),
        });
        Ok(())
    }

    fn finish(&mut self) -> TimelapseResult<()> {
        self.recording.lock().push(MuxCall::Finish);
        if self.fail_finish {
            return Err(TimelapseError::resource("in-memory muxer finish failure"));
        }
        Ok(())
    }
}
