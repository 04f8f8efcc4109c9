use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use mp4::{
    AvcConfig, FourCC, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType,
};

use crate::encode::annexb;
use crate::encode::engine::{CompressedSample, OutputFormat};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::mux::writer::Muxer;

/// Movie header timescale (milliseconds).
pub const MOVIE_TIMESCALE: u32 = 1_000;
/// Video track timescale; sample timestamps are stored in microseconds.
pub const TRACK_TIMESCALE: u32 = 1_000_000;

struct VideoTrack {
    id: u32,
    sample_duration: u32,
}

/// MP4 file muxer producing a single H.264 (`avc1`) track.
///
/// Incoming samples are Annex-B access units; they are re-framed as length-prefixed NAL units
/// and the parameter sets are carried in the track's `avcC` box.
pub struct Mp4Muxer {
    path: PathBuf,
    writer: Option<Mp4Writer<BufWriter<File>>>,
    track: Option<VideoTrack>,
}

impl std::fmt::Debug for Mp4Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Muxer")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("track", &self.track.as_ref().map(|t| t.id))
            .finish()
    }
}

fn fourcc(code: &str) -> TimelapseResult<FourCC> {
    code.parse::<FourCC>()
        .with_context(|| format!("invalid fourcc '{code}'"))
        .map_err(TimelapseError::from)
}

impl Mp4Muxer {
    /// Create (truncate) the output file and write the file header.
    #[tracing::instrument(level = "debug")]
    pub fn create(path: &Path) -> TimelapseResult<Self> {
        let file = File::create(path).map_err(|e| {
            TimelapseError::resource(format!(
                "create container file '{}': {e}",
                path.display()
            ))
        })?;
        let config = Mp4Config {
            major_brand: fourcc("isom")?,
            minor_version: 512,
            compatible_brands: vec![
                fourcc("isom")?,
                fourcc("iso2")?,
                fourcc("avc1")?,
                fourcc("mp41")?,
            ],
            timescale: MOVIE_TIMESCALE,
        };
        let writer = Mp4Writer::write_start(BufWriter::new(file), &config).map_err(|e| {
            TimelapseError::resource(format!(
                "start container '{}': {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            track: None,
        })
    }

    fn writer_mut(&mut self) -> TimelapseResult<&mut Mp4Writer<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| TimelapseError::protocol("mp4 muxer already finished"))
    }
}

impl Muxer for Mp4Muxer {
    fn add_video_track(&mut self, format: &OutputFormat) -> TimelapseResult<u32> {
        let width = u16::try_from(format.canvas.width)
            .map_err(|_| TimelapseError::invalid_input("mp4 track width exceeds 16 bits"))?;
        let height = u16::try_from(format.canvas.height)
            .map_err(|_| TimelapseError::invalid_input("mp4 track height exceeds 16 bits"))?;
        let sample_duration = u32::try_from(format.frame_interval_us)
            .map_err(|_| TimelapseError::invalid_input("frame interval too long for mp4"))?;

        let config = TrackConfig {
            track_type: TrackType::Video,
            timescale: TRACK_TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width,
                height,
                seq_param_set: format.sps.clone(),
                pic_param_set: format.pps.clone(),
            }),
        };
        let writer = self.writer_mut()?;
        writer
            .add_track(&config)
            .context("add mp4 video track")?;

        // Tracks are numbered from 1 in insertion order; this muxer only ever adds one.
        let id = 1;
        self.track = Some(VideoTrack {
            id,
            sample_duration,
        });
        Ok(id)
    }

    fn start(&mut self) -> TimelapseResult<()> {
        if self.track.is_none() {
            return Err(TimelapseError::protocol("mp4 muxer started without a track"));
        }
        Ok(())
    }

    fn write_sample(&mut self, track: u32, sample: &CompressedSample) -> TimelapseResult<()> {
        let duration = match &self.track {
            Some(t) if t.id == track => t.sample_duration,
            _ => {
                return Err(TimelapseError::protocol(format!(
                    "mp4 muxer has no track {track}"
                )));
            }
        };
        let payload = annexb::to_avcc(&sample.data);
        if payload.is_empty() {
            return Err(TimelapseError::protocol(
                "sample carries no coded slice data",
            ));
        }
        let mp4_sample = Mp4Sample {
            start_time: sample.pts_us,
            duration,
            rendering_offset: 0,
            is_sync: sample.key_frame,
            bytes: Bytes::from(payload),
        };
        let pts = sample.pts_us;
        self.writer_mut()?
            .write_sample(track, &mp4_sample)
            .with_context(|| format!("write mp4 sample at {pts}us"))?;
        Ok(())
    }

    fn finish(&mut self) -> TimelapseResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.write_end().context("write mp4 trailer")?;
        let mut out = writer.into_writer();
        out.flush()
            .with_context(|| format!("flush '{}'", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "mp4 container finalized");
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mux/mp4.rs"]
mod tests;
