use std::sync::Mutex;

use super::*;
use crate::assets::decode::InMemoryDecoder;
use crate::encode::engine::EncoderEngine;
use crate::encode::loopback::{LoopbackEngine, LoopbackOpts, LoopbackProbe};
use crate::mux::memory::{InMemoryMuxer, MuxCall, MuxRecording};
use crate::mux::writer::Muxer;

#[derive(Default)]
struct LoopbackFactory {
    opts: LoopbackOpts,
    finish_fails: bool,
    probes: Mutex<Vec<LoopbackProbe>>,
    recordings: Mutex<Vec<MuxRecording>>,
}

impl LoopbackFactory {
    fn with_opts(opts: LoopbackOpts) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    fn probe(&self) -> LoopbackProbe {
        self.probes.lock().unwrap()[0].clone()
    }

    fn recording(&self) -> MuxRecording {
        self.recordings.lock().unwrap()[0].clone()
    }

    fn engines_created(&self) -> (usize, usize) {
        (
            self.probes.lock().unwrap().len(),
            self.recordings.lock().unwrap().len(),
        )
    }
}

impl EngineFactory for LoopbackFactory {
    fn encoder(&self) -> TimelapseResult<Box<dyn EncoderEngine>> {
        let (engine, probe) = LoopbackEngine::new(self.opts.clone());
        self.probes.lock().unwrap().push(probe);
        Ok(Box::new(engine))
    }

    fn muxer(&self, _output: &Path) -> TimelapseResult<Box<dyn Muxer>> {
        let (mut muxer, rec) = InMemoryMuxer::new();
        if self.finish_fails {
            muxer = muxer.failing_finish();
        }
        self.recordings.lock().unwrap().push(rec);
        Ok(Box::new(muxer))
    }
}

fn out_path(name: &str) -> PathBuf {
    PathBuf::from("target").join("unit_pipeline").join(name)
}

fn decoder(images: &[(&str, SourceImage)]) -> Arc<InMemoryDecoder> {
    let mut dec = InMemoryDecoder::new();
    for (path, img) in images {
        dec.insert(*path, img.clone());
    }
    Arc::new(dec)
}

fn opts() -> PipelineOpts {
    PipelineOpts {
        submit_timeout_ms: 1,
        drain_timeout_ms: 1,
        stall_timeout_ms: 200,
        ..PipelineOpts::default()
    }
}

fn gray() -> SourceImage {
    SourceImage::solid(8, 6, [128, 128, 128, 255])
}

fn request(paths: &[&str], out: &str, fps: f64) -> EncodeRequest {
    EncodeRequest::new(paths.iter().map(PathBuf::from).collect(), out_path(out), fps)
}

#[test]
fn three_images_become_three_samples() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", gray()), ("b", gray()), ("c", gray())]),
        factory.clone(),
    );

    let outcome = pipeline
        .run(&request(&["a", "b", "c"], "three.mp4", 1.0))
        .unwrap();
    assert!(outcome.path.is_absolute());
    assert_eq!(outcome.canvas, Canvas::even_floor(8, 6).unwrap());
    assert_eq!(outcome.frames_encoded, 3);
    assert_eq!(outcome.samples_written, 3);
    assert_eq!(outcome.images_skipped, 0);

    let rec = factory.recording();
    assert_eq!(rec.sample_pts(), vec![0, 1_000_000, 2_000_000]);
    let calls = rec.calls();
    assert!(matches!(calls[0], MuxCall::AddTrack(_)));
    assert_eq!(calls.last(), Some(&MuxCall::Finish));
    assert_eq!(factory.probe().stats().stop_calls, 1);
}

#[test]
fn empty_image_list_allocates_nothing() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(opts(), decoder(&[]), factory.clone());
    let err = pipeline.run(&request(&[], "empty.mp4", 1.0)).unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidInput(_)));
    assert_eq!(factory.engines_created(), (0, 0));
}

#[test]
fn undecodable_first_image_is_invalid_input() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("b", gray())]), factory.clone());
    let err = pipeline
        .run(&request(&["missing", "b"], "first.mp4", 1.0))
        .unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidInput(_)));
    assert_eq!(factory.engines_created(), (0, 0));
}

#[test]
fn odd_requested_size_is_rounded_down_to_even() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    let req = request(&["a"], "odd.mp4", 1.0).with_size(7, 5);
    let outcome = pipeline.run(&req).unwrap();
    assert_eq!(outcome.canvas, Canvas::even_floor(6, 4).unwrap());

    let MuxCall::AddTrack(format) = &factory.recording().calls()[0] else {
        panic!("expected track first");
    };
    assert_eq!((format.canvas.width, format.canvas.height), (6, 4));
}

#[test]
fn skipped_images_leave_no_timestamp_gap() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", gray()), ("c", gray())]),
        factory.clone(),
    );
    let outcome = pipeline
        .run(&request(&["a", "broken", "c"], "skip.mp4", 2.0))
        .unwrap();
    assert_eq!(outcome.frames_encoded, 2);
    assert_eq!(outcome.images_skipped, 1);
    assert_eq!(factory.recording().sample_pts(), vec![0, 500_000]);
}

#[test]
fn busy_encoder_still_receives_every_frame() {
    let factory = Arc::new(LoopbackFactory::with_opts(LoopbackOpts {
        input_slots: 1,
        ..LoopbackOpts::default()
    }));
    let images: Vec<(&str, SourceImage)> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|p| (p, gray()))
        .collect();
    let pipeline = Pipeline::with_backends(opts(), decoder(&images), factory.clone());
    let outcome = pipeline
        .run(&request(&["a", "b", "c", "d", "e"], "busy.mp4", 1.0))
        .unwrap();
    assert_eq!(outcome.samples_written, 5);
    assert_eq!(factory.probe().stats().frames_in, 5);
}

#[test]
fn duplicate_format_fails_but_still_tears_down() {
    let factory = Arc::new(LoopbackFactory::with_opts(LoopbackOpts {
        duplicate_format: true,
        ..LoopbackOpts::default()
    }));
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", gray()), ("b", gray())]),
        factory.clone(),
    );
    let err = pipeline
        .run(&request(&["a", "b"], "dup.mp4", 1.0))
        .unwrap_err();
    assert!(matches!(err, TimelapseError::ProtocolViolation(_)));
    assert_eq!(factory.probe().stats().stop_calls, 1);
    assert_eq!(factory.recording().calls().last(), Some(&MuxCall::Finish));
}

#[test]
fn failing_stop_still_finishes_the_container() {
    let factory = Arc::new(LoopbackFactory::with_opts(LoopbackOpts {
        fail_stop: true,
        ..LoopbackOpts::default()
    }));
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", gray()), ("b", gray())]),
        factory.clone(),
    );
    let err = pipeline
        .run(&request(&["a", "b"], "stopfail.mp4", 1.0))
        .unwrap_err();
    assert!(matches!(err, TimelapseError::ResourceUnavailable(_)));
    assert_eq!(factory.probe().stats().stop_calls, 1);
    let rec = factory.recording();
    assert_eq!(rec.sample_pts(), vec![0, 1_000_000]);
    assert_eq!(rec.calls().last(), Some(&MuxCall::Finish));
}

#[test]
fn failing_finish_after_clean_encode_fails_the_request() {
    let factory = Arc::new(LoopbackFactory {
        finish_fails: true,
        ..LoopbackFactory::default()
    });
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    let err = pipeline
        .run(&request(&["a"], "finishfail.mp4", 1.0))
        .unwrap_err();
    assert!(matches!(err, TimelapseError::ResourceUnavailable(_)));
    assert_eq!(factory.recording().sample_pts(), vec![0]);
    assert_eq!(factory.probe().stats().stop_calls, 1);
}

#[test]
fn encoding_error_wins_over_teardown_errors() {
    let factory = Arc::new(LoopbackFactory {
        opts: LoopbackOpts {
            duplicate_format: true,
            fail_stop: true,
            ..LoopbackOpts::default()
        },
        finish_fails: true,
        ..LoopbackFactory::default()
    });
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", gray()), ("b", gray())]),
        factory.clone(),
    );
    let err = pipeline
        .run(&request(&["a", "b"], "errorder.mp4", 1.0))
        .unwrap_err();
    assert!(matches!(err, TimelapseError::ProtocolViolation(_)));
    assert_eq!(factory.probe().stats().stop_calls, 1);
    assert_eq!(factory.recording().calls().last(), Some(&MuxCall::Finish));
}

#[test]
fn encoder_start_failure_is_resource_unavailable() {
    let factory = Arc::new(LoopbackFactory::with_opts(LoopbackOpts {
        fail_start: true,
        ..LoopbackOpts::default()
    }));
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    let err = pipeline.run(&request(&["a"], "nostart.mp4", 1.0)).unwrap_err();
    assert!(matches!(err, TimelapseError::ResourceUnavailable(_)));
    assert_eq!(factory.recording().calls(), vec![MuxCall::Finish]);
    assert_eq!(factory.probe().stats().stop_calls, 1);
}

#[test]
fn missing_end_of_stream_times_out_after_teardown() {
    let factory = Arc::new(LoopbackFactory::with_opts(LoopbackOpts {
        swallow_end_of_stream: true,
        ..LoopbackOpts::default()
    }));
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    let err = pipeline.run(&request(&["a"], "stall.mp4", 1.0)).unwrap_err();
    assert!(matches!(err, TimelapseError::ResourceUnavailable(_)));
    assert_eq!(factory.recording().calls().last(), Some(&MuxCall::Finish));
}

#[test]
fn cancelled_request_finalizes_and_reports_cancelled() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline
        .run_with_cancel(&request(&["a"], "cancel.mp4", 1.0), &cancel)
        .unwrap_err();
    assert!(matches!(err, TimelapseError::Cancelled(_)));
    assert_eq!(factory.recording().calls(), vec![MuxCall::Finish]);
}

#[test]
fn zero_encoded_frames_is_an_error_unless_allowed() {
    let unusable = SourceImage {
        width: 4,
        height: 4,
        rgba8: Vec::new(),
    };

    let factory = Arc::new(LoopbackFactory::default());
    let pipeline =
        Pipeline::with_backends(opts(), decoder(&[("a", unusable.clone())]), factory.clone());
    let err = pipeline.run(&request(&["a"], "zero.mp4", 1.0)).unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidInput(_)));
    assert_eq!(factory.recording().calls(), vec![MuxCall::Finish]);

    let pipeline = Pipeline::with_backends(
        PipelineOpts {
            allow_empty_output: true,
            ..opts()
        },
        decoder(&[("a", unusable)]),
        Arc::new(LoopbackFactory::default()),
    );
    let outcome = pipeline.run(&request(&["a"], "zero_ok.mp4", 1.0)).unwrap();
    assert_eq!(outcome.frames_encoded, 0);
    assert_eq!(outcome.images_skipped, 1);
}

#[test]
fn plan_caps_bitrate_and_derives_encoder_settings() {
    let pipeline = Pipeline::with_backends(
        opts(),
        decoder(&[("a", SourceImage::solid(641, 481, [0, 0, 0, 255]))]),
        Arc::new(LoopbackFactory::default()),
    );
    let plan = pipeline.validate(&request(&["a"], "plan.mp4", 29.97)).unwrap();
    let cfg = pipeline.encoder_config(&plan);
    assert_eq!(cfg.canvas, Canvas::even_floor(640, 480).unwrap());
    assert_eq!(cfg.bitrate, 2_000_000);
    assert_eq!(cfg.frame_rate, 30);
    assert_eq!(cfg.frame_interval_us, 33_367);
    assert_eq!(cfg.keyframe_interval_secs, 2);
}

#[test]
fn invalid_request_fields_are_rejected() {
    let factory = Arc::new(LoopbackFactory::default());
    let pipeline = Pipeline::with_backends(opts(), decoder(&[("a", gray())]), factory.clone());
    for req in [
        request(&["a"], "bad.mp4", 0.0),
        request(&["a"], "bad.mp4", f64::NAN),
        request(&["a"], "bad.mp4", 1.0).with_bitrate(0),
        request(&["a"], "bad.mp4", 1.0).with_size(0, 4),
        request(&["a"], "bad.mp4", 1.0).with_size(1, 4),
        request(&["a"], "bad.mp4", 0.0001),
    ] {
        assert!(matches!(
            pipeline.run(&req),
            Err(TimelapseError::InvalidInput(_))
        ));
    }
    assert_eq!(factory.engines_created(), (0, 0));
}

#[test]
fn output_path_is_prepared() {
    let dir = PathBuf::from("target").join("unit_pipeline").join("prep").join("nested");
    let _ = std::fs::remove_dir_all(&dir);
    let path = dir.join("out.mp4");
    prepare_output_path(&path).unwrap();
    assert!(dir.is_dir());

    std::fs::write(&path, b"stale").unwrap();
    prepare_output_path(&path).unwrap();
    assert!(!path.exists());

    assert!(matches!(
        prepare_output_path(&dir),
        Err(TimelapseError::InvalidInput(_))
    ));
}
