//! H.264 encoding: the engine capability interface, its backends and the driver that moves
//! encoder output into a container.

/// H.264 Annex-B helpers.
pub mod annexb;
/// Encoder driver and joint lifecycle state.
pub mod driver;
/// Engine capability interface and its value types.
pub mod engine;
/// `ffmpeg` subprocess engine.
pub mod ffmpeg;
/// Deterministic in-process engine.
pub mod loopback;
