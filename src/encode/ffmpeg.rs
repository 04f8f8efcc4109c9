use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::convert::nv12::Nv12Frame;
use crate::encode::annexb::{self, AccessUnitSplitter};
use crate::encode::engine::{
    CompressedSample, EncoderConfig, EncoderEngine, OutputEvent, OutputFormat, Submit,
};
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Environment variable overriding the `ffmpeg` executable.
pub const FFMPEG_ENV: &str = "TIMELAPSE_FFMPEG";

/// Options for [`FfmpegEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FfmpegEngineOpts {
    /// Executable to spawn.
    pub ffmpeg_bin: String,
    /// ffmpeg video encoder name.
    pub codec: String,
    /// x264 speed preset (only passed to `libx264*` encoders).
    pub preset: String,
    /// Frames that may wait for the feeder thread before `queue_input` asks for a retry.
    pub input_slots: usize,
}

impl Default for FfmpegEngineOpts {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            input_slots: 4,
        }
    }
}

/// `$TIMELAPSE_FFMPEG` if set and non-empty, else `ffmpeg`.
pub fn default_ffmpeg_bin() -> String {
    std::env::var(FFMPEG_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "ffmpeg".to_string())
}

/// Return `true` when `bin -version` runs successfully.
pub fn ffmpeg_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Return `true` when the default `ffmpeg` can be invoked.
pub fn is_ffmpeg_on_path() -> bool {
    ffmpeg_available(&default_ffmpeg_bin())
}

/// Return `true` when `bin -encoders` lists `encoder`.
pub fn ffmpeg_has_encoder(bin: &str, encoder: &str) -> bool {
    let Ok(out) = Command::new(bin)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
    else {
        return false;
    };
    out.status.success()
        && String::from_utf8_lossy(&out.stdout)
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(encoder))
}

enum FeedItem {
    Frame(Nv12Frame, u64),
    EndOfStream(u64),
}

enum Stamp {
    Frame(u64),
    EndOfStream(u64),
}

type EventResult = TimelapseResult<OutputEvent>;

struct Session {
    child: Child,
    input: Option<Sender<FeedItem>>,
    events: Receiver<EventResult>,
    feeder: Option<JoinHandle<std::io::Result<()>>>,
    reader: Option<JoinHandle<()>>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    eos_seen: bool,
}

/// Encoder engine backed by the system `ffmpeg` binary.
///
/// Raw NV12 frames go to ffmpeg's stdin through a bounded slot channel and a feeder thread; the
/// H.264 elementary stream comes back on stdout, where a reader thread cuts it into access
/// units and turns them into [`OutputEvent`]s. Timestamps are assigned in submission order,
/// which requires an encoder without frame reordering (`-bf 0`).
pub struct FfmpegEngine {
    opts: FfmpegEngineOpts,
    cfg: Option<EncoderConfig>,
    session: Option<Session>,
}

impl FfmpegEngine {
    /// Create an engine; nothing is spawned until [`EncoderEngine::start`].
    pub fn new(opts: FfmpegEngineOpts) -> Self {
        Self {
            opts,
            cfg: None,
            session: None,
        }
    }

    fn command(&self, cfg: &EncoderConfig) -> Command {
        let mut cmd = Command::new(&self.opts.ffmpeg_bin);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "nv12",
            "-s",
            &format!("{}x{}", cfg.canvas.width, cfg.canvas.height),
            // Input rate as a rational so the frame interval is carried exactly.
            "-r",
            &format!("1000000/{}", cfg.frame_interval_us),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            &self.opts.codec,
        ]);
        if self.opts.codec.starts_with("libx264") {
            cmd.args(["-preset", &self.opts.preset, "-tune", "zerolatency"]);
        }
        let gop = cfg.frame_rate.max(1).saturating_mul(cfg.keyframe_interval_secs.max(1));
        cmd.args([
            "-bf",
            "0",
            "-b:v",
            &cfg.bitrate.to_string(),
            "-g",
            &gop.to_string(),
            "-pix_fmt",
            "yuv420p",
            "-bsf:v",
            "h264_metadata=aud=insert",
            "-f",
            "h264",
            "pipe:1",
        ]);
        cmd
    }

    fn session_mut(&mut self, op: &str) -> TimelapseResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| TimelapseError::protocol(format!("ffmpeg {op} before start")))
    }
}

impl EncoderEngine for FfmpegEngine {
    fn configure(&mut self, cfg: &EncoderConfig) -> TimelapseResult<()> {
        if self.session.is_some() {
            return Err(TimelapseError::protocol("ffmpeg configure after start"));
        }
        if cfg.frame_interval_us == 0 || cfg.bitrate == 0 {
            return Err(TimelapseError::invalid_input(
                "frame interval and bitrate must be non-zero",
            ));
        }
        if self.opts.input_slots == 0 {
            return Err(TimelapseError::invalid_input(
                "ffmpeg engine needs at least one input slot",
            ));
        }
        self.cfg = Some(cfg.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn start(&mut self) -> TimelapseResult<()> {
        if self.session.is_some() {
            return Err(TimelapseError::protocol("ffmpeg engine already started"));
        }
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| TimelapseError::protocol("ffmpeg start before configure"))?;

        if !ffmpeg_available(&self.opts.ffmpeg_bin) {
            return Err(TimelapseError::resource(format!(
                "'{}' is required for H.264 encoding, but could not be run",
                self.opts.ffmpeg_bin
            )));
        }
        if !ffmpeg_has_encoder(&self.opts.ffmpeg_bin, &self.opts.codec) {
            return Err(TimelapseError::resource(format!(
                "ffmpeg encoder '{}' is not available",
                self.opts.codec
            )));
        }

        let mut child = self.command(&cfg).spawn().map_err(|e| {
            TimelapseError::resource(format!(
                "failed to spawn '{}': {e}",
                self.opts.ffmpeg_bin
            ))
        })?;
        let taken = (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        );
        let (Some(stdin), Some(stdout), Some(mut stderr)) = taken else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TimelapseError::resource("failed to open ffmpeg pipes"));
        };

        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        let (input_tx, input_rx) = crossbeam_channel::bounded::<FeedItem>(self.opts.input_slots);
        let (stamp_tx, stamp_rx) = crossbeam_channel::unbounded::<Stamp>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<EventResult>();

        let feeder = std::thread::Builder::new()
            .name("timelapse-ffmpeg-feed".to_string())
            .spawn(move || feed(stdin, input_rx, stamp_tx));
        let reader = std::thread::Builder::new()
            .name("timelapse-ffmpeg-read".to_string())
            .spawn(move || read_output(stdout, cfg, stamp_rx, event_tx));

        let (feeder, reader) = match (feeder, reader) {
            (Ok(f), Ok(r)) => (f, r),
            (f, r) => {
                let _ = child.kill();
                let _ = child.wait();
                let err = f.err().or(r.err()).map(|e| e.to_string()).unwrap_or_default();
                return Err(TimelapseError::resource(format!(
                    "failed to spawn ffmpeg helper thread: {err}"
                )));
            }
        };

        tracing::debug!(bin = %self.opts.ffmpeg_bin, codec = %self.opts.codec, "ffmpeg started");
        self.session = Some(Session {
            child,
            input: Some(input_tx),
            events: event_rx,
            feeder: Some(feeder),
            reader: Some(reader),
            stderr_drain: Some(stderr_drain),
            eos_seen: false,
        });
        Ok(())
    }

    fn queue_input(
        &mut self,
        frame: Nv12Frame,
        pts_us: u64,
        timeout: Duration,
    ) -> TimelapseResult<Submit<Nv12Frame>> {
        let expected = self.cfg.as_ref().map(|c| c.canvas);
        if expected != Some(frame.canvas) || frame.data.len() != Nv12Frame::byte_len(frame.canvas)
        {
            return Err(TimelapseError::invalid_input(format!(
                "frame {}x{} does not match the configured encoder size",
                frame.canvas.width, frame.canvas.height
            )));
        }
        let session = self.session_mut("queue_input")?;
        let input = session
            .input
            .as_ref()
            .ok_or_else(|| TimelapseError::protocol("ffmpeg queue_input after end of stream"))?;
        match input.send_timeout(FeedItem::Frame(frame, pts_us), timeout) {
            Ok(()) => Ok(Submit::Accepted),
            Err(SendTimeoutError::Timeout(FeedItem::Frame(frame, _))) => Ok(Submit::Retry(frame)),
            Err(SendTimeoutError::Timeout(FeedItem::EndOfStream(_))) => {
                Err(TimelapseError::protocol("ffmpeg input slot returned the wrong item"))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(TimelapseError::resource(
                "ffmpeg stopped accepting input",
            )),
        }
    }

    fn queue_end_of_stream(
        &mut self,
        pts_us: u64,
        timeout: Duration,
    ) -> TimelapseResult<Submit<()>> {
        let session = self.session_mut("queue_end_of_stream")?;
        let input = session
            .input
            .as_ref()
            .ok_or_else(|| TimelapseError::protocol("ffmpeg end of stream queued twice"))?;
        match input.send_timeout(FeedItem::EndOfStream(pts_us), timeout) {
            Ok(()) => {
                session.input = None;
                Ok(Submit::Accepted)
            }
            Err(SendTimeoutError::Timeout(_)) => Ok(Submit::Retry(())),
            Err(SendTimeoutError::Disconnected(_)) => Err(TimelapseError::resource(
                "ffmpeg stopped accepting input",
            )),
        }
    }

    fn dequeue_output(&mut self, timeout: Duration) -> TimelapseResult<OutputEvent> {
        let session = self.session_mut("dequeue_output")?;
        match session.events.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                if let OutputEvent::Sample(s) = &event
                    && s.end_of_stream
                {
                    session.eos_seen = true;
                }
                Ok(event)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(OutputEvent::TryAgainLater),
            Err(RecvTimeoutError::Disconnected) if session.eos_seen => {
                Ok(OutputEvent::TryAgainLater)
            }
            Err(RecvTimeoutError::Disconnected) => Err(TimelapseError::resource(
                "ffmpeg output ended before end of stream",
            )),
        }
    }

    fn stop(&mut self) -> TimelapseResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        drop(session.input.take());
        if !session.eos_seen {
            // Unblocks the feeder if ffmpeg is no longer reading stdin.
            let _ = session.child.kill();
        }

        let mut first_err: Option<TimelapseError> = None;
        if let Some(handle) = session.feeder.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                // A closed pipe after a kill is expected.
                Ok(Err(e)) if !session.eos_seen => {
                    tracing::debug!(error = %e, "ffmpeg feeder ended early");
                }
                Ok(Err(e)) => {
                    first_err.get_or_insert(TimelapseError::resource(format!(
                        "failed to write frames to ffmpeg: {e}"
                    )));
                }
                Err(_) => {
                    first_err.get_or_insert(TimelapseError::resource(
                        "ffmpeg feeder thread panicked",
                    ));
                }
            }
        }

        let status = session.child.wait();
        if session.reader.take().is_some_and(|h| h.join().is_err()) {
            first_err.get_or_insert(TimelapseError::resource("ffmpeg reader thread panicked"));
        }
        let stderr_bytes = match session.stderr_drain.take().map(|h| h.join()) {
            Some(Ok(Ok(bytes))) => bytes,
            _ => Vec::new(),
        };

        match status {
            Ok(status) if session.eos_seen => {
                if let Some(e) = exit_error(status, &stderr_bytes) {
                    first_err.get_or_insert(e);
                }
            }
            Ok(status) => {
                tracing::debug!(%status, "ffmpeg terminated before end of stream");
            }
            Err(e) => {
                first_err.get_or_insert(TimelapseError::resource(format!(
                    "failed to wait for ffmpeg to finish: {e}"
                )));
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "ffmpeg engine stop failed during drop");
        }
    }
}

fn exit_error(status: ExitStatus, stderr: &[u8]) -> Option<TimelapseError> {
    if status.success() {
        return None;
    }
    let stderr = String::from_utf8_lossy(stderr);
    Some(TimelapseError::resource(format!(
        "ffmpeg exited with status {}: {}",
        status,
        stderr.trim()
    )))
}

// Writes queued frames to ffmpeg. The timestamp goes to the reader before the frame bytes so
// it is always available when the matching access unit shows up.
fn feed(
    mut stdin: ChildStdin,
    input: Receiver<FeedItem>,
    stamps: Sender<Stamp>,
) -> std::io::Result<()> {
    for item in input.iter() {
        match item {
            FeedItem::Frame(frame, pts_us) => {
                let _ = stamps.send(Stamp::Frame(pts_us));
                stdin.write_all(&frame.data)?;
            }
            FeedItem::EndOfStream(pts_us) => {
                let _ = stamps.send(Stamp::EndOfStream(pts_us));
                break;
            }
        }
    }
    stdin.flush()?;
    Ok(())
}

struct OutputAssembler {
    cfg: EncoderConfig,
    stamps: Receiver<Stamp>,
    events: Sender<EventResult>,
    format_sent: bool,
}

impl OutputAssembler {
    fn emit(&mut self, unit: Vec<u8>) -> TimelapseResult<()> {
        if !self.format_sent {
            let (sps, pps) = annexb::parameter_sets(&unit).ok_or_else(|| {
                TimelapseError::protocol("first encoded access unit carries no SPS/PPS")
            })?;
            self.send(Ok(OutputEvent::FormatChanged(OutputFormat {
                canvas: self.cfg.canvas,
                sps,
                pps,
                frame_interval_us: self.cfg.frame_interval_us,
            })));
            self.format_sent = true;
        }
        let pts_us = match self.stamps.recv() {
            Ok(Stamp::Frame(pts)) => pts,
            Ok(Stamp::EndOfStream(_)) | Err(_) => {
                return Err(TimelapseError::protocol(
                    "ffmpeg produced more access units than frames submitted",
                ));
            }
        };
        let key_frame = annexb::is_key_frame(&unit);
        self.send(Ok(OutputEvent::Sample(CompressedSample {
            data: unit,
            pts_us,
            key_frame,
            end_of_stream: false,
        })));
        Ok(())
    }

    fn end_of_stream(&mut self) -> TimelapseResult<()> {
        let mut missing = 0u64;
        loop {
            match self.stamps.recv() {
                Ok(Stamp::Frame(_)) => missing += 1,
                Ok(Stamp::EndOfStream(pts_us)) => {
                    if missing > 0 {
                        tracing::warn!(missing, "ffmpeg emitted fewer access units than frames");
                    }
                    self.send(Ok(OutputEvent::Sample(CompressedSample {
                        data: Vec::new(),
                        pts_us,
                        key_frame: false,
                        end_of_stream: true,
                    })));
                    return Ok(());
                }
                Err(_) => {
                    return Err(TimelapseError::resource(
                        "ffmpeg output ended before end of stream was queued",
                    ));
                }
            }
        }
    }

    fn send(&self, event: EventResult) {
        // The engine may already be gone; nothing left to report to.
        let _ = self.events.send(event);
    }
}

fn read_output(
    mut stdout: ChildStdout,
    cfg: EncoderConfig,
    stamps: Receiver<Stamp>,
    events: Sender<EventResult>,
) {
    let mut asm = OutputAssembler {
        cfg,
        stamps,
        events,
        format_sent: false,
    };
    let mut splitter = AccessUnitSplitter::new();
    let mut buf = vec![0u8; 64 * 1024];

    let res = (|| -> TimelapseResult<()> {
        loop {
            let n = match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TimelapseError::resource(format!(
                        "failed to read ffmpeg output: {e}"
                    )));
                }
            };
            for unit in splitter.push(&buf[..n]) {
                asm.emit(unit)?;
            }
        }
        if let Some(unit) = splitter.finish() {
            asm.emit(unit)?;
        }
        asm.end_of_stream()
    })();

    if let Err(e) = res {
        asm.send(Err(e));
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
