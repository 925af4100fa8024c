//! Resolution math for the SDXL staging workflow.
//!
//! The model works best with the shortest side at its native 1024 px, so
//! the input is pre-scaled to that size and an optional final upscale
//! brings the result to the requested resolution.

/// Shortest-side resolution the model natively generates at.
pub const NATIVE_RESOLUTION: u32 = 1024;

/// Dimensions assumed when the input image cannot be read.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (NATIVE_RESOLUTION, NATIVE_RESOLUTION);

/// A target within this many pixels of native counts as native.
pub const NATIVE_RESOLUTION_TOLERANCE: f64 = 1.0;

/// Factor that brings the input's shortest side to [`NATIVE_RESOLUTION`].
///
/// Degenerate zero-sized inputs yield a neutral `1.0`.
pub fn input_scale(width: u32, height: u32) -> f64 {
    let shortest = width.min(height);
    if shortest == 0 {
        return 1.0;
    }
    f64::from(NATIVE_RESOLUTION) / f64::from(shortest)
}

/// Factor applied by the final upscale stage.
pub fn final_scale(target_resolution: u32) -> f64 {
    f64::from(target_resolution) / f64::from(NATIVE_RESOLUTION)
}

/// Whether the final upscale stage can be skipped entirely.
pub fn is_native_resolution(target_resolution: u32) -> bool {
    (f64::from(target_resolution) - f64::from(NATIVE_RESOLUTION)).abs()
        < NATIVE_RESOLUTION_TOLERANCE
}
