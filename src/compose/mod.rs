//! Frame compositor: fits arbitrary stills onto the fixed output canvas.

/// Aspect-preserving crop geometry.
pub mod crop;
/// Crop, scale and background flattening.
pub mod frame;
