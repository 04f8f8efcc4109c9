use std::time::{Duration, Instant};

use crate::convert::nv12::Nv12Frame;
use crate::encode::engine::{EncoderConfig, EncoderEngine, OutputEvent, Submit};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::mux::writer::{ContainerWriter, TrackHandle};

/// Joint encoder/container lifecycle as seen by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Engine created, no settings applied.
    Unconfigured,
    /// Settings applied, codec not started.
    Configured,
    /// Codec running; output format not announced yet.
    FormatPending,
    /// Format announced and the container started.
    MuxerStarted,
    /// End of stream accepted; remaining output is being collected.
    Draining,
    /// Engine stopped. Terminal.
    Finalized,
}

/// Bounded waits used when talking to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverTimeouts {
    /// Wait for a free input slot per `submit` attempt.
    pub submit: Duration,
    /// Wait per output poll.
    pub drain: Duration,
    /// Longest stretch without engine progress tolerated by a blocking drain.
    pub stall: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_millis(10),
            drain: Duration::from_millis(10),
            stall: Duration::from_secs(30),
        }
    }
}

/// What a single [`EncoderDriver::drain`] call moved into the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Samples written.
    pub samples: u64,
    /// Payload bytes written.
    pub bytes: u64,
    /// The end-of-stream sample was observed.
    pub end_of_stream: bool,
}

/// Owns one encoder engine and moves its output into a [`ContainerWriter`].
///
/// The output format announcement is routed to the container (`add_track` then `start`)
/// exactly once; a second announcement, or a sample arriving before it, fails with
/// [`TimelapseError::ProtocolViolation`].
pub struct EncoderDriver {
    engine: Box<dyn EncoderEngine>,
    state: PipelineState,
    timeouts: DriverTimeouts,
    track: Option<TrackHandle>,
    eos_seen: bool,
    frames_submitted: u64,
}

impl EncoderDriver {
    /// Wrap `engine`.
    pub fn new(engine: Box<dyn EncoderEngine>, timeouts: DriverTimeouts) -> Self {
        Self {
            engine,
            state: PipelineState::Unconfigured,
            timeouts,
            track: None,
            eos_seen: false,
            frames_submitted: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Frames accepted by the engine so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Apply encoder settings.
    pub fn configure(&mut self, cfg: &EncoderConfig) -> TimelapseResult<()> {
        if self.state != PipelineState::Unconfigured {
            return Err(TimelapseError::protocol(format!(
                "configure in state {:?}",
                self.state
            )));
        }
        self.engine.configure(cfg).map_err(as_resource)?;
        self.state = PipelineState::Configured;
        tracing::debug!(
            width = cfg.canvas.width,
            height = cfg.canvas.height,
            frame_rate = cfg.frame_rate,
            bitrate = cfg.bitrate,
            "encoder configured"
        );
        Ok(())
    }

    /// Start the codec.
    pub fn start(&mut self) -> TimelapseResult<()> {
        if self.state != PipelineState::Configured {
            return Err(TimelapseError::protocol(format!(
                "start in state {:?}",
                self.state
            )));
        }
        self.engine.start().map_err(as_resource)?;
        self.state = PipelineState::FormatPending;
        Ok(())
    }

    /// Offer one frame. A [`Submit::Retry`] hands the same frame back; the caller must
    /// resubmit it.
    pub fn submit(&mut self, frame: Nv12Frame, pts_us: u64) -> TimelapseResult<Submit<Nv12Frame>> {
        if !matches!(
            self.state,
            PipelineState::FormatPending | PipelineState::MuxerStarted
        ) {
            return Err(TimelapseError::protocol(format!(
                "submit in state {:?}",
                self.state
            )));
        }
        let res = self
            .engine
            .queue_input(frame, pts_us, self.timeouts.submit)?;
        if matches!(res, Submit::Accepted) {
            self.frames_submitted += 1;
            tracing::trace!(pts_us, "frame queued");
        }
        Ok(res)
    }

    /// Offer the end-of-stream marker. On acceptance the driver enters
    /// [`PipelineState::Draining`].
    pub fn signal_end_of_stream(&mut self, pts_us: u64) -> TimelapseResult<Submit<()>> {
        if !matches!(
            self.state,
            PipelineState::FormatPending | PipelineState::MuxerStarted
        ) {
            return Err(TimelapseError::protocol(format!(
                "end of stream in state {:?}",
                self.state
            )));
        }
        let res = self
            .engine
            .queue_end_of_stream(pts_us, self.timeouts.submit)?;
        if matches!(res, Submit::Accepted) {
            self.state = PipelineState::Draining;
            tracing::debug!(pts_us, "end of stream queued");
        }
        Ok(res)
    }

    /// Move ready output into `writer`.
    ///
    /// With `until_end_of_stream == false` this returns as soon as the engine has nothing
    /// ready. Otherwise it keeps polling until the end-of-stream sample shows up, failing with
    /// [`TimelapseError::ResourceUnavailable`] when the engine makes no progress for the stall
    /// timeout.
    pub fn drain(
        &mut self,
        until_end_of_stream: bool,
        writer: &mut ContainerWriter,
    ) -> TimelapseResult<DrainReport> {
        if matches!(
            self.state,
            PipelineState::Unconfigured | PipelineState::Configured | PipelineState::Finalized
        ) {
            return Err(TimelapseError::protocol(format!(
                "drain in state {:?}",
                self.state
            )));
        }
        if until_end_of_stream && self.state != PipelineState::Draining {
            return Err(TimelapseError::protocol(
                "blocking drain before end of stream was queued",
            ));
        }

        let mut report = DrainReport::default();
        if self.eos_seen {
            report.end_of_stream = true;
            return Ok(report);
        }

        let mut last_progress = Instant::now();
        loop {
            match self.engine.dequeue_output(self.timeouts.drain)? {
                OutputEvent::TryAgainLater => {
                    if !until_end_of_stream {
                        return Ok(report);
                    }
                    if last_progress.elapsed() >= self.timeouts.stall {
                        return Err(TimelapseError::resource(format!(
                            "encoder produced no output for {:?} while draining",
                            self.timeouts.stall
                        )));
                    }
                }
                OutputEvent::FormatChanged(format) => {
                    last_progress = Instant::now();
                    if self.track.is_some() {
                        return Err(TimelapseError::protocol(
                            "encoder announced its output format twice",
                        ));
                    }
                    tracing::debug!(
                        width = format.canvas.width,
                        height = format.canvas.height,
                        "encoder output format available"
                    );
                    let track = writer.add_track(&format)?;
                    writer.start()?;
                    self.track = Some(track);
                    if self.state == PipelineState::FormatPending {
                        self.state = PipelineState::MuxerStarted;
                    }
                }
                OutputEvent::Sample(sample) => {
                    last_progress = Instant::now();
                    if sample.size() > 0 {
                        let Some(track) = self.track else {
                            return Err(TimelapseError::protocol(
                                "encoder emitted a sample before announcing its format",
                            ));
                        };
                        writer.write_sample(track, &sample)?;
                        report.samples += 1;
                        report.bytes += sample.size() as u64;
                        tracing::trace!(
                            pts_us = sample.pts_us,
                            size = sample.size(),
                            key_frame = sample.key_frame,
                            "sample written"
                        );
                    }
                    if sample.end_of_stream {
                        self.eos_seen = true;
                        report.end_of_stream = true;
                        return Ok(report);
                    }
                }
            }
        }
    }

    /// Stop the engine. Safe to call from any state and more than once.
    pub fn stop(&mut self) -> TimelapseResult<()> {
        if self.state == PipelineState::Finalized {
            return Ok(());
        }
        self.state = PipelineState::Finalized;
        self.engine.stop()
    }
}

impl Drop for EncoderDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "encoder stop failed during drop");
        }
    }
}

fn as_resource(e: TimelapseError) -> TimelapseError {
    match e {
        TimelapseError::Other(err) => TimelapseError::resource(format!("{err:#}")),
        other => other,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/driver.rs"]
mod tests;
