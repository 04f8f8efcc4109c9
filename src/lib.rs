//! Timelapse turns an ordered list of still images into a single H.264 video in an MP4 file.
//!
//! Every image is center-cropped to the output aspect ratio, scaled onto a fixed canvas,
//! converted to NV12 and handed to an encoder engine; the compressed samples are multiplexed
//! into the container in emission order.
//!
//! - Describe the job with an [`EncodeRequest`]
//! - Run it with a [`Pipeline`], either inline ([`Pipeline::run`]) or on a worker thread
//!   ([`Pipeline::spawn`])
//! - Map the result to an [`EncodeResponse`] at the host boundary
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Source image decoding.
pub mod assets;
pub mod compose;
pub mod convert;
pub mod encode;
pub mod mux;
pub mod pipeline;

pub use crate::foundation::core::{Canvas, Fps, FrameIndex};
pub use crate::foundation::error::{TimelapseError, TimelapseResult};

pub use crate::assets::decode::{FsImageDecoder, ImageDecoder, InMemoryDecoder, SourceImage};
pub use crate::encode::driver::{DrainReport, DriverTimeouts, EncoderDriver, PipelineState};
pub use crate::encode::engine::{
    CompressedSample, EncoderConfig, EncoderEngine, OutputEvent, OutputFormat, Submit,
};
pub use crate::encode::ffmpeg::{FfmpegEngine, FfmpegEngineOpts, is_ffmpeg_on_path};
pub use crate::encode::loopback::{LoopbackEngine, LoopbackOpts, LoopbackProbe};
pub use crate::mux::memory::{InMemoryMuxer, MuxCall, MuxRecording};
pub use crate::mux::mp4::Mp4Muxer;
pub use crate::mux::writer::{ContainerWriter, Muxer, TrackHandle};
pub use crate::pipeline::factory::{EngineFactory, FfmpegMp4Factory};
pub use crate::pipeline::opts::PipelineOpts;
pub use crate::pipeline::orchestrator::Pipeline;
pub use crate::pipeline::request::{EncodeOutcome, EncodeRequest, EncodeResponse};
pub use crate::pipeline::task::{CancelToken, EncodeHandle};
