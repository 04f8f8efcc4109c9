use std::path::Path;

use crate::encode::engine::EncoderEngine;
use crate::encode::ffmpeg::{FfmpegEngine, FfmpegEngineOpts};
use crate::foundation::error::TimelapseResult;
use crate::mux::mp4::Mp4Muxer;
use crate::mux::writer::Muxer;

/// Creates the per-request encoder and muxer. Engines are never shared between requests.
pub trait EngineFactory: Send + Sync {
    /// New, unconfigured encoder engine.
    fn encoder(&self) -> TimelapseResult<Box<dyn EncoderEngine>>;
    /// New muxer writing to `output`.
    fn muxer(&self, output: &Path) -> TimelapseResult<Box<dyn Muxer>>;
}

/// Default backends: system `ffmpeg` for H.264 and the `mp4` crate for the container.
#[derive(Clone, Debug, Default)]
pub struct FfmpegMp4Factory {
    /// Options for every spawned [`FfmpegEngine`].
    pub ffmpeg: FfmpegEngineOpts,
}

impl FfmpegMp4Factory {
    /// Factory using `ffmpeg` options `opts`.
    pub fn new(ffmpeg: FfmpegEngineOpts) -> Self {
        Self { ffmpeg }
    }
}

impl EngineFactory for FfmpegMp4Factory {
    fn encoder(&self) -> TimelapseResult<Box<dyn EncoderEngine>> {
        Ok(Box::new(FfmpegEngine::new(self.ffmpeg.clone())))
    }

    fn muxer(&self, output: &Path) -> TimelapseResult<Box<dyn Muxer>> {
        Ok(Box::new(Mp4Muxer::create(output)?))
    }
}
