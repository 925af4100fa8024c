//! Advisory image dimension probing.
//!
//! Only the image header is decoded. Dimensions steer the pre-scale
//! factor but are not safety-critical, so callers normally use
//! [`dimensions_or_default`].

use std::path::Path;

use crate::error::CoreError;
use crate::scaling::DEFAULT_DIMENSIONS;

/// Read `(width, height)` from an image header.
pub fn read_dimensions(path: &Path) -> Result<(u32, u32), CoreError> {
    image::image_dimensions(path).map_err(|e| {
        CoreError::Validation(format!(
            "Could not read image dimensions from {}: {e}",
            path.display()
        ))
    })
}

/// Read image dimensions, falling back to [`DEFAULT_DIMENSIONS`] when the
/// file is missing, truncated, or not a supported image.
pub fn dimensions_or_default(path: &Path) -> (u32, u32) {
    match read_dimensions(path) {
        Ok(dims) => dims,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                default_width = DEFAULT_DIMENSIONS.0,
                default_height = DEFAULT_DIMENSIONS.1,
                "Falling back to default image dimensions",
            );
            DEFAULT_DIMENSIONS
        }
    }
}
