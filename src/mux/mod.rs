//! Container writing: the order-enforcing [`writer::ContainerWriter`] and its muxer backends.

/// Recording muxer for tests.
pub mod memory;
/// MP4 file muxer.
pub mod mp4;
/// Muxer capability trait and the order-enforcing writer.
pub mod writer;
