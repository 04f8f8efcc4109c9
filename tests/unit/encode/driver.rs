use super::*;
use crate::encode::loopback::{LoopbackEngine, LoopbackOpts, LoopbackProbe};
use crate::foundation::core::Canvas;
use crate::mux::memory::{InMemoryMuxer, MuxCall, MuxRecording};

fn config() -> EncoderConfig {
    EncoderConfig {
        canvas: Canvas::even_floor(4, 2).unwrap(),
        frame_rate: 2,
        frame_interval_us: 500_000,
        bitrate: 1_000_000,
        keyframe_interval_secs: 2,
    }
}

fn frame() -> Nv12Frame {
    let canvas = config().canvas;
    Nv12Frame {
        canvas,
        data: vec![16; Nv12Frame::byte_len(canvas)],
    }
}

fn timeouts() -> DriverTimeouts {
    DriverTimeouts {
        submit: Duration::from_millis(1),
        drain: Duration::from_millis(1),
        stall: Duration::from_millis(50),
    }
}

fn setup(opts: LoopbackOpts) -> (EncoderDriver, LoopbackProbe, ContainerWriter, MuxRecording) {
    let (engine, probe) = LoopbackEngine::new(opts);
    let mut driver = EncoderDriver::new(Box::new(engine), timeouts());
    driver.configure(&config()).unwrap();
    driver.start().unwrap();
    let (muxer, rec) = InMemoryMuxer::new();
    (driver, probe, ContainerWriter::new(Box::new(muxer)), rec)
}

fn submit_with_retry(
    driver: &mut EncoderDriver,
    writer: &mut ContainerWriter,
    pts_us: u64,
) {
    let mut frame = frame();
    loop {
        match driver.submit(frame, pts_us).unwrap() {
            Submit::Accepted => return,
            Submit::Retry(back) => {
                frame = back;
                driver.drain(false, writer).unwrap();
            }
        }
    }
}

fn finish_stream(driver: &mut EncoderDriver, writer: &mut ContainerWriter, pts_us: u64) {
    while let Submit::Retry(()) = driver.signal_end_of_stream(pts_us).unwrap() {
        driver.drain(false, writer).unwrap();
    }
}

#[test]
fn format_starts_the_container_once_and_samples_follow() {
    let (mut driver, _probe, mut writer, rec) = setup(LoopbackOpts::default());
    assert_eq!(driver.state(), PipelineState::FormatPending);

    for i in 0..3u64 {
        submit_with_retry(&mut driver, &mut writer, i * 500_000);
        driver.drain(false, &mut writer).unwrap();
    }
    assert_eq!(driver.state(), PipelineState::MuxerStarted);

    finish_stream(&mut driver, &mut writer, 1_500_000);
    assert_eq!(driver.state(), PipelineState::Draining);
    let report = driver.drain(true, &mut writer).unwrap();
    assert!(report.end_of_stream);

    driver.stop().unwrap();
    writer.finish().unwrap();

    let calls = rec.calls();
    let adds = calls
        .iter()
        .filter(|c| matches!(c, MuxCall::AddTrack(_)))
        .count();
    assert_eq!(adds, 1);
    assert_eq!(calls[1], MuxCall::Start);
    assert_eq!(rec.sample_pts(), vec![0, 500_000, 1_000_000]);
    assert_eq!(writer.samples_written(), 3);
    assert_eq!(driver.frames_submitted(), 3);
}

#[test]
fn busy_engine_gets_the_same_frame_again() {
    let (mut driver, probe, mut writer, rec) = setup(LoopbackOpts {
        input_slots: 1,
        ..LoopbackOpts::default()
    });
    for i in 0..4u64 {
        submit_with_retry(&mut driver, &mut writer, i * 500_000);
    }
    finish_stream(&mut driver, &mut writer, 2_000_000);
    driver.drain(true, &mut writer).unwrap();

    assert!(probe.stats().retries > 0);
    assert_eq!(probe.stats().frames_in, 4);
    assert_eq!(rec.sample_pts(), vec![0, 500_000, 1_000_000, 1_500_000]);
}

#[test]
fn second_format_announcement_is_fatal() {
    let (mut driver, _probe, mut writer, _rec) = setup(LoopbackOpts {
        duplicate_format: true,
        ..LoopbackOpts::default()
    });
    submit_with_retry(&mut driver, &mut writer, 0);
    assert!(matches!(
        driver.drain(false, &mut writer),
        Err(TimelapseError::ProtocolViolation(_))
    ));
}

#[test]
fn blocking_drain_without_end_of_stream_sample_times_out() {
    let (mut driver, _probe, mut writer, _rec) = setup(LoopbackOpts {
        swallow_end_of_stream: true,
        ..LoopbackOpts::default()
    });
    submit_with_retry(&mut driver, &mut writer, 0);
    finish_stream(&mut driver, &mut writer, 500_000);
    assert!(matches!(
        driver.drain(true, &mut writer),
        Err(TimelapseError::ResourceUnavailable(_))
    ));
}

#[test]
fn zero_frames_drain_to_end_of_stream_without_a_track() {
    let (mut driver, _probe, mut writer, rec) = setup(LoopbackOpts::default());
    finish_stream(&mut driver, &mut writer, 0);
    let report = driver.drain(true, &mut writer).unwrap();
    assert_eq!(
        report,
        DrainReport {
            samples: 0,
            bytes: 0,
            end_of_stream: true
        }
    );
    writer.finish().unwrap();
    assert_eq!(rec.calls(), vec![MuxCall::Finish]);
}

#[test]
fn blocking_drain_requires_end_of_stream_first() {
    let (mut driver, _probe, mut writer, _rec) = setup(LoopbackOpts::default());
    assert!(matches!(
        driver.drain(true, &mut writer),
        Err(TimelapseError::ProtocolViolation(_))
    ));
}

#[test]
fn stop_is_idempotent_and_runs_once_on_the_engine() {
    let (mut driver, probe, _writer, _rec) = setup(LoopbackOpts::default());
    driver.stop().unwrap();
    driver.stop().unwrap();
    assert_eq!(driver.state(), PipelineState::Finalized);
    drop(driver);
    assert_eq!(probe.stats().stop_calls, 1);
}

#[test]
fn start_failure_is_reported_as_resource_unavailable() {
    let (engine, _probe) = LoopbackEngine::new(LoopbackOpts {
        fail_start: true,
        ..LoopbackOpts::default()
    });
    let mut driver = EncoderDriver::new(Box::new(engine), timeouts());
    driver.configure(&config()).unwrap();
    assert!(matches!(
        driver.start(),
        Err(TimelapseError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        driver.submit(frame(), 0),
        Err(TimelapseError::ProtocolViolation(_))
    ));
}
