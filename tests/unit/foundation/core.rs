use super::*;

#[test]
fn canvas_rounds_odd_dimensions_down() {
    let c = Canvas::even_floor(641, 481).unwrap();
    assert_eq!(c, Canvas { width: 640, height: 480 });

    let c = Canvas::even_floor(640, 480).unwrap();
    assert_eq!(c, Canvas { width: 640, height: 480 });
}

#[test]
fn canvas_rejects_degenerate_sizes() {
    assert!(matches!(
        Canvas::even_floor(1, 100),
        Err(TimelapseError::InvalidInput(_))
    ));
    assert!(matches!(
        Canvas::even_floor(100, 0),
        Err(TimelapseError::InvalidInput(_))
    ));
    assert!(Canvas::even_floor(70_000, 10).is_err());
}

#[test]
fn fps_rejects_non_positive_values() {
    assert!(Fps::new(0.0).is_err());
    assert!(Fps::new(-1.0).is_err());
    assert!(Fps::new(f64::NAN).is_err());
    assert!(Fps::new(f64::INFINITY).is_err());
}

#[test]
fn fps_two_gives_half_second_steps() {
    let fps = Fps::new(2.0).unwrap();
    assert_eq!(fps.frame_interval_us(), 500_000);
    assert_eq!(fps.pts_us(FrameIndex(0)), 0);
    assert_eq!(fps.pts_us(FrameIndex(1)), 500_000);
    assert_eq!(fps.pts_us(FrameIndex(3)), 1_500_000);
}

#[test]
fn fps_interval_is_rounded_and_floored_at_one() {
    assert_eq!(Fps::new(3.0).unwrap().frame_interval_us(), 333_333);
    assert_eq!(Fps::new(0.5).unwrap().frame_interval_us(), 2_000_000);
    assert_eq!(Fps::new(5_000_000.0).unwrap().frame_interval_us(), 1);
}

#[test]
fn encoder_rate_never_drops_below_one() {
    assert_eq!(Fps::new(0.25).unwrap().encoder_rate(), 1);
    assert_eq!(Fps::new(29.97).unwrap().encoder_rate(), 30);
}
