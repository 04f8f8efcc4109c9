use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::convert::nv12::Nv12Frame;
use crate::encode::annexb::{NAL_AUD, NAL_IDR, NAL_SLICE};
use crate::encode::engine::{
    CompressedSample, EncoderConfig, EncoderEngine, OutputEvent, OutputFormat, Submit,
};
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Fixed parameter sets emitted by [`LoopbackEngine`] (baseline profile, level 3.0).
pub const LOOPBACK_SPS: &[u8] = &[0x67, 0x42, 0xc0, 0x1e, 0xda, 0x02, 0x80, 0xbf, 0xe5];
/// See [`LOOPBACK_SPS`].
pub const LOOPBACK_PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];

/// Behavior switches for [`LoopbackEngine`].
#[derive(Clone, Debug)]
pub struct LoopbackOpts {
    /// Frames that may be queued before `queue_input` asks for a retry.
    pub input_slots: usize,
    /// Announce the output format a second time after the first sample.
    pub duplicate_format: bool,
    /// Accept the end-of-stream marker but never emit the end-of-stream sample.
    pub swallow_end_of_stream: bool,
    /// Make `start` fail as if the codec could not be allocated.
    pub fail_start: bool,
    /// Make `stop` report an error after releasing the queues.
    pub fail_stop: bool,
}

impl Default for LoopbackOpts {
    fn default() -> Self {
        Self {
            input_slots: 2,
            duplicate_format: false,
            swallow_end_of_stream: false,
            fail_start: false,
            fail_stop: false,
        }
    }
}

/// Counters shared between a [`LoopbackEngine`] and the code observing it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// `configure` calls.
    pub configured: u32,
    /// Successful `start` calls.
    pub started: u32,
    /// Frames accepted by `queue_input`.
    pub frames_in: u64,
    /// `queue_input` calls answered with a retry.
    pub retries: u64,
    /// `stop` calls, including repeated ones.
    pub stop_calls: u32,
}

/// Observer handle for a [`LoopbackEngine`] that has been moved into a driver.
#[derive(Clone, Debug, Default)]
pub struct LoopbackProbe(Arc<Mutex<LoopbackStats>>);

impl LoopbackProbe {
    fn lock(&self) -> MutexGuard<'_, LoopbackStats> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> LoopbackStats {
        self.lock().clone()
    }
}

enum Pending {
    Frame { pts_us: u64 },
    EndOfStream { pts_us: u64 },
}

/// Deterministic in-process encoder producing synthetic Annex-B access units.
///
/// Every queued frame becomes one access unit, in order, with no reordering. The first access
/// unit of every GOP carries SPS, PPS and an IDR slice; the others carry one P slice.
pub struct LoopbackEngine {
    opts: LoopbackOpts,
    probe: LoopbackProbe,
    cfg: Option<EncoderConfig>,
    started: bool,
    stopped: bool,
    pending: VecDeque<Pending>,
    ready: VecDeque<OutputEvent>,
    format_announced: u32,
    encoded: u64,
    eos_queued: bool,
}

impl LoopbackEngine {
    /// Create an engine and its observer handle.
    pub fn new(opts: LoopbackOpts) -> (Self, LoopbackProbe) {
        let probe = LoopbackProbe::default();
        let engine = Self {
            opts,
            probe: probe.clone(),
            cfg: None,
            started: false,
            stopped: false,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            format_announced: 0,
            encoded: 0,
            eos_queued: false,
        };
        (engine, probe)
    }

    fn gop_len(cfg: &EncoderConfig) -> u64 {
        u64::from(cfg.frame_rate.max(1)) * u64::from(cfg.keyframe_interval_secs.max(1))
    }

    fn ensure_running(&self, op: &str) -> TimelapseResult<()> {
        if self.stopped {
            return Err(TimelapseError::protocol(format!(
                "loopback {op} after stop"
            )));
        }
        if !self.started {
            return Err(TimelapseError::protocol(format!(
                "loopback {op} before start"
            )));
        }
        Ok(())
    }

    fn format(cfg: &EncoderConfig) -> OutputFormat {
        OutputFormat {
            canvas: cfg.canvas,
            sps: LOOPBACK_SPS.to_vec(),
            pps: LOOPBACK_PPS.to_vec(),
            frame_interval_us: cfg.frame_interval_us,
        }
    }

    fn encode_next(&mut self, cfg: &EncoderConfig) {
        let Some(next) = self.pending.pop_front() else {
            return;
        };
        match next {
            Pending::Frame { pts_us } => {
                if self.format_announced == 0 {
                    self.ready.push_back(OutputEvent::FormatChanged(Self::format(cfg)));
                    self.format_announced += 1;
                }
                let key_frame = self.encoded.is_multiple_of(Self::gop_len(cfg));
                let data = synthetic_access_unit(self.encoded, key_frame);
                self.ready.push_back(OutputEvent::Sample(CompressedSample {
                    data,
                    pts_us,
                    key_frame,
                    end_of_stream: false,
                }));
                self.encoded += 1;
                if self.opts.duplicate_format && self.format_announced == 1 {
                    self.ready.push_back(OutputEvent::FormatChanged(Self::format(cfg)));
                    self.format_announced += 1;
                }
            }
            Pending::EndOfStream { pts_us } => {
                if !self.opts.swallow_end_of_stream {
                    self.ready.push_back(OutputEvent::Sample(CompressedSample {
                        data: Vec::new(),
                        pts_us,
                        key_frame: false,
                        end_of_stream: true,
                    }));
                }
            }
        }
    }
}

fn synthetic_access_unit(index: u64, key_frame: bool) -> Vec<u8> {
    let mut au = vec![0, 0, 0, 1, NAL_AUD, 0xf0];
    if key_frame {
        au.extend_from_slice(&[0, 0, 0, 1]);
        au.extend_from_slice(LOOPBACK_SPS);
        au.extend_from_slice(&[0, 0, 0, 1]);
        au.extend_from_slice(LOOPBACK_PPS);
        au.extend_from_slice(&[0, 0, 1, 0x60 | NAL_IDR, 0x88, 0x84]);
    } else {
        au.extend_from_slice(&[0, 0, 1, 0x40 | NAL_SLICE, 0x9a]);
    }
    // Payload bytes never form a start code: the high bit keeps every byte non-zero.
    au.extend(index.to_be_bytes().iter().map(|b| b | 0x80));
    au
}

impl EncoderEngine for LoopbackEngine {
    fn configure(&mut self, cfg: &EncoderConfig) -> TimelapseResult<()> {
        if self.started {
            return Err(TimelapseError::protocol("loopback configure after start"));
        }
        self.probe.lock().configured += 1;
        self.cfg = Some(cfg.clone());
        Ok(())
    }

    fn start(&mut self) -> TimelapseResult<()> {
        if self.cfg.is_none() {
            return Err(TimelapseError::protocol("loopback start before configure"));
        }
        if self.opts.fail_start {
            return Err(TimelapseError::resource("loopback codec unavailable"));
        }
        self.started = true;
        self.probe.lock().started += 1;
        Ok(())
    }

    fn queue_input(
        &mut self,
        frame: Nv12Frame,
        pts_us: u64,
        _timeout: Duration,
    ) -> TimelapseResult<Submit<Nv12Frame>> {
        self.ensure_running("queue_input")?;
        if self.eos_queued {
            return Err(TimelapseError::protocol(
                "loopback queue_input after end of stream",
            ));
        }
        if let Some(cfg) = &self.cfg
            && (frame.canvas != cfg.canvas || frame.data.len() != Nv12Frame::byte_len(cfg.canvas))
        {
            return Err(TimelapseError::invalid_input(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.canvas.width, frame.canvas.height, cfg.canvas.width, cfg.canvas.height
            )));
        }
        if self.pending.len() >= self.opts.input_slots {
            self.probe.lock().retries += 1;
            return Ok(Submit::Retry(frame));
        }
        self.pending.push_back(Pending::Frame { pts_us });
        self.probe.lock().frames_in += 1;
        Ok(Submit::Accepted)
    }

    fn queue_end_of_stream(
        &mut self,
        pts_us: u64,
        _timeout: Duration,
    ) -> TimelapseResult<Submit<()>> {
        self.ensure_running("queue_end_of_stream")?;
        if self.pending.len() >= self.opts.input_slots {
            return Ok(Submit::Retry(()));
        }
        self.eos_queued = true;
        self.pending.push_back(Pending::EndOfStream { pts_us });
        Ok(Submit::Accepted)
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> TimelapseResult<OutputEvent> {
        self.ensure_running("dequeue_output")?;
        if self.ready.is_empty()
            && let Some(cfg) = self.cfg.clone()
        {
            self.encode_next(&cfg);
        }
        Ok(self.ready.pop_front().unwrap_or(OutputEvent::TryAgainLater))
    }

    fn stop(&mut self) -> TimelapseResult<()> {
        self.probe.lock().stop_calls += 1;
        self.stopped = true;
        self.pending.clear();
        self.ready.clear();
        if self.opts.fail_stop {
            return Err(TimelapseError::resource("loopback codec release failed"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/loopback.rs"]
mod tests;
