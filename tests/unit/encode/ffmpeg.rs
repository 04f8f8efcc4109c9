use super::*;
use crate::foundation::core::Canvas;

fn config() -> EncoderConfig {
    EncoderConfig {
        canvas: Canvas::even_floor(64, 48).unwrap(),
        frame_rate: 2,
        frame_interval_us: 500_000,
        bitrate: 500_000,
        keyframe_interval_secs: 2,
    }
}

fn arg_after(cmd: &Command, flag: &str) -> Option<String> {
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn libx264_available() -> bool {
    let bin = default_ffmpeg_bin();
    ffmpeg_available(&bin) && ffmpeg_has_encoder(&bin, "libx264")
}

#[test]
fn command_streams_nv12_in_and_annexb_out() {
    let engine = FfmpegEngine::new(FfmpegEngineOpts::default());
    let cmd = engine.command(&config());

    assert_eq!(arg_after(&cmd, "-pix_fmt").as_deref(), Some("nv12"));
    assert_eq!(arg_after(&cmd, "-s").as_deref(), Some("64x48"));
    assert_eq!(arg_after(&cmd, "-r").as_deref(), Some("1000000/500000"));
    assert_eq!(arg_after(&cmd, "-c:v").as_deref(), Some("libx264"));
    assert_eq!(arg_after(&cmd, "-b:v").as_deref(), Some("500000"));
    assert_eq!(arg_after(&cmd, "-g").as_deref(), Some("4"));
    assert_eq!(arg_after(&cmd, "-bf").as_deref(), Some("0"));
    assert_eq!(arg_after(&cmd, "-f").as_deref(), Some("rawvideo"));
    assert_eq!(
        cmd.get_args().last().map(|a| a.to_string_lossy().into_owned()),
        Some("pipe:1".to_string())
    );
}

#[test]
fn x264_tuning_is_only_passed_to_x264() {
    let engine = FfmpegEngine::new(FfmpegEngineOpts {
        codec: "h264_nvenc".to_string(),
        ..FfmpegEngineOpts::default()
    });
    let cmd = engine.command(&config());
    assert_eq!(arg_after(&cmd, "-tune"), None);
    assert_eq!(arg_after(&cmd, "-preset"), None);
}

#[test]
fn configure_rejects_degenerate_settings() {
    let mut engine = FfmpegEngine::new(FfmpegEngineOpts::default());
    let mut cfg = config();
    cfg.bitrate = 0;
    assert!(matches!(
        engine.configure(&cfg),
        Err(TimelapseError::InvalidInput(_))
    ));

    let mut engine = FfmpegEngine::new(FfmpegEngineOpts {
        input_slots: 0,
        ..FfmpegEngineOpts::default()
    });
    assert!(engine.configure(&config()).is_err());
}

#[test]
fn io_before_start_is_a_protocol_violation() {
    let mut engine = FfmpegEngine::new(FfmpegEngineOpts::default());
    engine.configure(&config()).unwrap();
    assert!(matches!(
        engine.dequeue_output(Duration::from_millis(1)),
        Err(TimelapseError::ProtocolViolation(_))
    ));
    assert!(matches!(
        engine.queue_end_of_stream(0, Duration::from_millis(1)),
        Err(TimelapseError::ProtocolViolation(_))
    ));
    engine.stop().unwrap();
    engine.stop().unwrap();
}

#[test]
fn missing_binary_is_resource_unavailable() {
    assert!(!ffmpeg_available("timelapse-no-such-ffmpeg-binary"));
    let mut engine = FfmpegEngine::new(FfmpegEngineOpts {
        ffmpeg_bin: "timelapse-no-such-ffmpeg-binary".to_string(),
        ..FfmpegEngineOpts::default()
    });
    engine.configure(&config()).unwrap();
    assert!(matches!(
        engine.start(),
        Err(TimelapseError::ResourceUnavailable(_))
    ));
}

#[test]
fn encodes_frames_into_ordered_samples() {
    if !libx264_available() {
        eprintln!("skipping: ffmpeg with libx264 not found");
        return;
    }
    let cfg = config();
    let mut engine = FfmpegEngine::new(FfmpegEngineOpts::default());
    engine.configure(&cfg).unwrap();
    engine.start().unwrap();

    let wait = Duration::from_millis(100);
    for i in 0..3u64 {
        let mut frame = Nv12Frame {
            canvas: cfg.canvas,
            data: vec![(i * 60) as u8; Nv12Frame::byte_len(cfg.canvas)],
        };
        loop {
            match engine.queue_input(frame, i * 500_000, wait).unwrap() {
                Submit::Accepted => break,
                Submit::Retry(back) => frame = back,
            }
        }
    }
    while let Submit::Retry(()) = engine.queue_end_of_stream(1_500_000, wait).unwrap() {}

    let mut formats = 0;
    let mut samples = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    loop {
        assert!(std::time::Instant::now() < deadline, "ffmpeg did not finish");
        match engine.dequeue_output(wait).unwrap() {
            OutputEvent::TryAgainLater => {}
            OutputEvent::FormatChanged(format) => {
                assert!(samples.is_empty());
                assert_eq!(format.canvas, cfg.canvas);
                assert_eq!(annexb::nal_type(&format.sps), Some(annexb::NAL_SPS));
                formats += 1;
            }
            OutputEvent::Sample(s) if s.end_of_stream => {
                assert_eq!(s.pts_us, 1_500_000);
                break;
            }
            OutputEvent::Sample(s) => samples.push(s),
        }
    }
    engine.stop().unwrap();

    assert_eq!(formats, 1);
    let pts: Vec<_> = samples.iter().map(|s| s.pts_us).collect();
    assert_eq!(pts, vec![0, 500_000, 1_000_000]);
    assert!(samples[0].key_frame);
}
