//! SSD raster algebra: `ssd = 8 × height_m × slope_multiplier`.

use crate::error::Result;
use crate::raster::Raster;

/// Constant factor applied to vegetation height.
pub const SSD_FACTOR: f64 = 8.0;

pub fn ssd_value(height_m: f32, multiplier: f32) -> f32 {
    (SSD_FACTOR * height_m as f64 * multiplier as f64) as f32
}

/// Combine heights (metres) and slope multipliers over their common footprint.
/// Fails with `GridMismatch` when the grids are not aligned.
pub fn compute_ssd(heights: &Raster, multipliers: &Raster) -> Result<Raster> {
    heights.zip_with(multipliers, ssd_value)
}
