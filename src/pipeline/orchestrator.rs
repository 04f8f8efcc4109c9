use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::assets::decode::{FsImageDecoder, ImageDecoder, SourceImage};
use crate::compose::frame::compose;
use crate::convert::nv12::{Nv12Frame, to_nv12};
use crate::encode::driver::{EncoderDriver, PipelineState};
use crate::encode::engine::{EncoderConfig, Submit};
use crate::foundation::core::{Canvas, Fps, FrameIndex};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::mux::writer::ContainerWriter;
use crate::pipeline::factory::{EngineFactory, FfmpegMp4Factory};
use crate::pipeline::opts::PipelineOpts;
use crate::pipeline::request::{EncodeOutcome, EncodeRequest};
use crate::pipeline::task::CancelToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Validating,
    Configuring,
    Encoding,
    Finalizing,
}

// Everything derived from a request before any engine exists.
struct Plan {
    fps: Fps,
    canvas: Canvas,
    bitrate: u32,
    output: PathBuf,
    first: SourceImage,
}

#[derive(Default)]
struct Progress {
    submitted: u64,
    skipped: u64,
}

/// Runs encode requests: validate, allocate engines, encode every image, then tear down.
///
/// A pipeline holds no per-request state; each [`Pipeline::run`] call creates its own encoder
/// and container through the configured [`EngineFactory`].
pub struct Pipeline {
    opts: PipelineOpts,
    decoder: Arc<dyn ImageDecoder>,
    engines: Arc<dyn EngineFactory>,
}

impl Pipeline {
    /// Pipeline decoding from the filesystem and encoding with `ffmpeg` into MP4.
    pub fn new(opts: PipelineOpts) -> Self {
        Self::with_backends(
            opts,
            Arc::new(FsImageDecoder),
            Arc::new(FfmpegMp4Factory::default()),
        )
    }

    /// Pipeline with explicit decoder and engine backends.
    pub fn with_backends(
        opts: PipelineOpts,
        decoder: Arc<dyn ImageDecoder>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            opts,
            decoder,
            engines,
        }
    }

    /// Options every request runs with.
    pub fn opts(&self) -> &PipelineOpts {
        &self.opts
    }

    /// Run `req` to completion on the calling thread.
    pub fn run(&self, req: &EncodeRequest) -> TimelapseResult<EncodeOutcome> {
        self.run_with_cancel(req, &CancelToken::new())
    }

    /// Run `req`, checking `cancel` between images.
    ///
    /// Teardown (end of stream, final drain, encoder stop, container finish) runs whenever the
    /// engines were allocated, whatever happened while encoding.
    #[tracing::instrument(
        name = "encode_request",
        skip_all,
        fields(images = req.image_paths.len(), output = %req.output_path.display())
    )]
    pub fn run_with_cancel(
        &self,
        req: &EncodeRequest,
        cancel: &CancelToken,
    ) -> TimelapseResult<EncodeOutcome> {
        let started = Instant::now();
        tracing::debug!(phase = ?Phase::Validating, "validating request");
        let plan = self.validate(req)?;
        prepare_output_path(&plan.output)?;

        tracing::info!(
            phase = ?Phase::Configuring,
            width = plan.canvas.width,
            height = plan.canvas.height,
            fps = plan.fps.as_f64(),
            bitrate = plan.bitrate,
            "allocating encoder and container"
        );
        let mut writer = ContainerWriter::new(self.engines.muxer(&plan.output)?);
        let mut driver = EncoderDriver::new(self.engines.encoder()?, self.opts.timeouts());

        let mut progress = Progress::default();
        let encoded = self.configure_and_encode(
            req,
            &plan,
            &mut driver,
            &mut writer,
            cancel,
            &mut progress,
        );

        tracing::debug!(phase = ?Phase::Finalizing, frames = progress.submitted, "finalizing");
        let eos_pts = plan.fps.pts_us(FrameIndex(progress.submitted));
        let teardown = self.finalize(&mut driver, &mut writer, eos_pts);

        if let Err(e) = encoded.and(teardown) {
            tracing::warn!(code = e.code(), error = %e, "encode request failed");
            return Err(e);
        }
        if progress.submitted == 0 && !self.opts.allow_empty_output {
            return Err(TimelapseError::invalid_input(
                "none of the images could be decoded; the output has no frames",
            ));
        }

        tracing::info!(
            frames = progress.submitted,
            skipped = progress.skipped,
            samples = writer.samples_written(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "encode request finished"
        );
        Ok(EncodeOutcome {
            path: plan.output.clone(),
            canvas: plan.canvas,
            frames_encoded: progress.submitted,
            images_skipped: progress.skipped,
            samples_written: writer.samples_written(),
            bytes_written: writer.bytes_written(),
        })
    }

    fn validate(&self, req: &EncodeRequest) -> TimelapseResult<Plan> {
        self.opts.validate()?;
        let Some(first_path) = req.image_paths.first() else {
            return Err(TimelapseError::invalid_input("no images provided"));
        };
        let fps = Fps::new(req.fps)?;
        if fps.frame_interval_us() > u64::from(u32::MAX) {
            return Err(TimelapseError::invalid_input(format!(
                "fps {} is too low; one frame would last longer than {} us",
                req.fps,
                u32::MAX
            )));
        }
        if req.bitrate == 0 {
            return Err(TimelapseError::invalid_input("bitrate must be positive"));
        }
        if req.width == Some(0) || req.height == Some(0) {
            return Err(TimelapseError::invalid_input(
                "output width and height must be positive",
            ));
        }
        if req.output_path.as_os_str().is_empty() {
            return Err(TimelapseError::invalid_input("output path is empty"));
        }

        let first = self.decoder.decode(first_path).map_err(|e| {
            TimelapseError::invalid_input(format!(
                "failed to decode first image '{}': {e}",
                first_path.display()
            ))
        })?;
        let canvas = Canvas::even_floor(
            req.width.unwrap_or(first.width),
            req.height.unwrap_or(first.height),
        )?;
        let output = std::path::absolute(&req.output_path).with_context(|| {
            format!("resolve output path '{}'", req.output_path.display())
        })?;

        Ok(Plan {
            fps,
            canvas,
            bitrate: req.bitrate.min(self.opts.max_bitrate),
            output,
            first,
        })
    }

    fn encoder_config(&self, plan: &Plan) -> EncoderConfig {
        EncoderConfig {
            canvas: plan.canvas,
            frame_rate: plan.fps.encoder_rate(),
            frame_interval_us: plan.fps.frame_interval_us(),
            bitrate: plan.bitrate,
            keyframe_interval_secs: self.opts.keyframe_interval_secs,
        }
    }

    fn configure_and_encode(
        &self,
        req: &EncodeRequest,
        plan: &Plan,
        driver: &mut EncoderDriver,
        writer: &mut ContainerWriter,
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> TimelapseResult<()> {
        driver.configure(&self.encoder_config(plan))?;
        driver.start()?;
        tracing::debug!(phase = ?Phase::Encoding, "encoding images");
        self.encode_images(req, plan, driver, writer, cancel, progress)
    }

    fn encode_images(
        &self,
        req: &EncodeRequest,
        plan: &Plan,
        driver: &mut EncoderDriver,
        writer: &mut ContainerWriter,
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> TimelapseResult<()> {
        for (index, path) in req.image_paths.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TimelapseError::cancelled(format!(
                    "cancelled after {} of {} images",
                    index,
                    req.image_paths.len()
                )));
            }

            let decoded;
            let source = if index == 0 {
                &plan.first
            } else {
                match self.decoder.decode(path) {
                    Ok(img) => {
                        decoded = img;
                        &decoded
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping image");
                        progress.skipped += 1;
                        continue;
                    }
                }
            };

            let frame = match compose(source, plan.canvas, self.opts.background_rgb)
                .and_then(|composed| to_nv12(&composed))
            {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping image");
                    progress.skipped += 1;
                    continue;
                }
            };

            let pts_us = plan.fps.pts_us(FrameIndex(progress.submitted));
            self.submit_with_retry(driver, writer, frame, pts_us)?;
            progress.submitted += 1;
            tracing::debug!(index, pts_us, "frame submitted");

            driver.drain(false, writer)?;
        }
        Ok(())
    }

    fn submit_with_retry(
        &self,
        driver: &mut EncoderDriver,
        writer: &mut ContainerWriter,
        mut frame: Nv12Frame,
        pts_us: u64,
    ) -> TimelapseResult<()> {
        let mut last_progress = Instant::now();
        loop {
            match driver.submit(frame, pts_us)? {
                Submit::Accepted => return Ok(()),
                Submit::Retry(back) => {
                    frame = back;
                    if driver.drain(false, writer)?.samples > 0 {
                        last_progress = Instant::now();
                    }
                    if last_progress.elapsed() >= self.opts.stall() {
                        return Err(TimelapseError::resource(format!(
                            "encoder accepted no input for {:?}",
                            self.opts.stall()
                        )));
                    }
                }
            }
        }
    }

    fn signal_end_of_stream(
        &self,
        driver: &mut EncoderDriver,
        writer: &mut ContainerWriter,
        pts_us: u64,
    ) -> TimelapseResult<()> {
        let mut last_progress = Instant::now();
        loop {
            match driver.signal_end_of_stream(pts_us)? {
                Submit::Accepted => return Ok(()),
                Submit::Retry(()) => {
                    if driver.drain(false, writer)?.samples > 0 {
                        last_progress = Instant::now();
                    }
                    if last_progress.elapsed() >= self.opts.stall() {
                        return Err(TimelapseError::resource(format!(
                            "encoder did not accept end of stream within {:?}",
                            self.opts.stall()
                        )));
                    }
                }
            }
        }
    }

    // Every step runs even if an earlier one failed; the first failure is returned.
    fn finalize(
        &self,
        driver: &mut EncoderDriver,
        writer: &mut ContainerWriter,
        eos_pts_us: u64,
    ) -> TimelapseResult<()> {
        let mut first_err: Option<TimelapseError> = None;
        let mut note = |step: &'static str, res: TimelapseResult<()>| {
            if let Err(e) = res {
                tracing::warn!(step, error = %e, "teardown step failed");
                first_err.get_or_insert(e);
            }
        };

        if matches!(
            driver.state(),
            PipelineState::FormatPending | PipelineState::MuxerStarted
        ) {
            note(
                "end_of_stream",
                self.signal_end_of_stream(driver, writer, eos_pts_us),
            );
        }
        if driver.state() == PipelineState::Draining {
            note("drain", driver.drain(true, writer).map(|_| ()));
        }
        note("stop", driver.stop());
        note("finish", writer.finish());

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Create missing parent directories and remove a file already at `path`.
pub fn prepare_output_path(path: &Path) -> TimelapseResult<()> {
    if path.is_dir() {
        return Err(TimelapseError::invalid_input(format!(
            "output path '{}' is a directory",
            path.display()
        )));
    }
    ensure_parent_dir(path)?;
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove existing output '{}'", path.display()))?;
    }
    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> TimelapseResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/orchestrator.rs"]
mod tests;
