//! Binary compliance map and safest-point extraction.

use serde::Serialize;

use crate::raster::{CellKind, Raster};

/// pSSD above which a cell meets its separation requirement.
pub const COMPLIANCE_THRESHOLD: f32 = 1.0;

/// 1 where `minimum_pssd > 1.0`, 0 elsewhere; nodata stays nodata.
pub fn compliance(minimum_pssd: &Raster) -> Raster {
    minimum_pssd
        .map_valid(|v| if v > COMPLIANCE_THRESHOLD { 1.0 } else { 0.0 })
        .as_kind(CellKind::Integer)
}

/// The cell with the largest minimum pSSD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafestPoint {
    /// Cell centre in the raster's CRS.
    pub x: f64,
    pub y: f64,
    pub row: usize,
    pub col: usize,
    pub value: f32,
    /// Cells sharing the maximum, including this one.
    pub tied_cells: usize,
}

/// Locate the maximum of `minimum_pssd`. Ties resolve to the first cell in
/// row-major order. None when every cell is nodata.
pub fn safest_point(minimum_pssd: &Raster) -> Option<SafestPoint> {
    let max = minimum_pssd.max_value()?;
    let mut tied = minimum_pssd.data.iter().enumerate().filter(|&(_, &v)| v == max);
    let (first, _) = tied.next()?;
    let tied_cells = 1 + tied.count();

    let (row, col) = (first / minimum_pssd.width, first % minimum_pssd.width);
    let (x, y) = minimum_pssd.cell_center(row, col);
    Some(SafestPoint { x, y, row, col, value: max, tied_cells })
}
