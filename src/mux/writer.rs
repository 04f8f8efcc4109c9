use crate::encode::engine::{CompressedSample, OutputFormat};
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Capability interface over a container multiplexer.
///
/// Implementations only need to do the container work; call-order rules are enforced by
/// [`ContainerWriter`].
pub trait Muxer: Send {
    /// Register the single video track described by `format`; returns the muxer's track id.
    fn add_video_track(&mut self, format: &OutputFormat) -> TimelapseResult<u32>;
    /// Begin accepting samples.
    fn start(&mut self) -> TimelapseResult<()>;
    /// Append one compressed sample to `track`.
    fn write_sample(&mut self, track: u32, sample: &CompressedSample) -> TimelapseResult<()>;
    /// Write trailing metadata and close the output. Must work with zero samples written.
    fn finish(&mut self) -> TimelapseResult<()>;
}

/// Opaque handle to the track registered by [`ContainerWriter::add_track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackHandle(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Idle,
    TrackAdded(TrackHandle),
    Started(TrackHandle),
    Finished,
}

/// Order-enforcing front of a [`Muxer`]: exactly one `add_track`, then `start`, then samples in
/// strictly increasing timestamp order, then `finish`.
pub struct ContainerWriter {
    muxer: Box<dyn Muxer>,
    state: WriterState,
    last_pts_us: Option<u64>,
    samples_written: u64,
    bytes_written: u64,
}

impl ContainerWriter {
    /// Wrap `muxer`.
    pub fn new(muxer: Box<dyn Muxer>) -> Self {
        Self {
            muxer,
            state: WriterState::Idle,
            last_pts_us: None,
            samples_written: 0,
            bytes_written: 0,
        }
    }

    /// Register the video track. Only one track is ever accepted.
    pub fn add_track(&mut self, format: &OutputFormat) -> TimelapseResult<TrackHandle> {
        match self.state {
            WriterState::Idle => {
                let id = self.muxer.add_video_track(format)?;
                let handle = TrackHandle(id);
                self.state = WriterState::TrackAdded(handle);
                tracing::debug!(track = id, "container track added");
                Ok(handle)
            }
            WriterState::Finished => Err(TimelapseError::protocol(
                "container add_track after finish",
            )),
            _ => Err(TimelapseError::protocol("container track already added")),
        }
    }

    /// Start the container. Requires a prior `add_track`.
    pub fn start(&mut self) -> TimelapseResult<()> {
        match self.state {
            WriterState::TrackAdded(handle) => {
                self.muxer.start()?;
                self.state = WriterState::Started(handle);
                Ok(())
            }
            WriterState::Idle => Err(TimelapseError::protocol(
                "container start before add_track",
            )),
            WriterState::Started(_) => Err(TimelapseError::protocol("container already started")),
            WriterState::Finished => Err(TimelapseError::protocol("container start after finish")),
        }
    }

    /// Append a sample exactly as received.
    pub fn write_sample(
        &mut self,
        track: TrackHandle,
        sample: &CompressedSample,
    ) -> TimelapseResult<()> {
        let WriterState::Started(active) = self.state else {
            return Err(TimelapseError::protocol(
                "container write_sample before start",
            ));
        };
        if track != active {
            return Err(TimelapseError::protocol(format!(
                "unknown container track {track:?}"
            )));
        }
        if let Some(last) = self.last_pts_us
            && sample.pts_us <= last
        {
            return Err(TimelapseError::protocol(format!(
                "non-increasing sample timestamp {} after {last}",
                sample.pts_us
            )));
        }

        self.muxer.write_sample(track.0, sample)?;
        self.last_pts_us = Some(sample.pts_us);
        self.samples_written += 1;
        self.bytes_written += sample.size() as u64;
        Ok(())
    }

    /// Finalize the container. Safe to call in any state and more than once.
    pub fn finish(&mut self) -> TimelapseResult<()> {
        if self.state == WriterState::Finished {
            return Ok(());
        }
        self.state = WriterState::Finished;
        tracing::debug!(samples = self.samples_written, "finishing container");
        self.muxer.finish()
    }

    /// `true` once `start` succeeded and `finish` has not been called.
    pub fn is_started(&self) -> bool {
        matches!(self.state, WriterState::Started(_))
    }

    /// Number of samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Payload bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "container finish failed during drop");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mux/writer.rs"]
mod tests;
