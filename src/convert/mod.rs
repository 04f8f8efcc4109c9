//! Color converter producing the encoder's native input layout.

/// RGBA8 to semi-planar 4:2:0 (NV12).
pub mod nv12;
