//! Georeferenced single-band raster grid.
//!
//! Values are f32, row-major, row 0 = north edge. Nodata cells are NaN in
//! memory; the on-disk sentinel is applied by the I/O layer. Coordinate math
//! uses f64.

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Result, SsdError};

/// Fraction of a cell tolerated when comparing grid origins and sizes.
const ALIGN_TOLERANCE: f64 = 1e-6;

/// Axis-aligned bounding box in CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// True when `other` lies entirely inside `self` (shared edges allowed).
    pub fn contains(&self, other: &Extent) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let e = Extent::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        (e.min_x < e.max_x && e.min_y < e.max_y).then_some(e)
    }

    /// Grow every side by `d`.
    pub fn expand(&self, d: f64) -> Extent {
        Extent::new(self.min_x - d, self.min_y - d, self.max_x + d, self.max_y + d)
    }
}

/// Cell value type carried to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    Float,
    Integer,
}

/// A 2D raster of f32 cells with extent and CRS.
#[derive(Debug, Clone)]
pub struct Raster {
    /// Row-major values; NaN = nodata.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    pub crs: Option<Crs>,
    pub kind: CellKind,
}

impl Raster {
    /// Create a float raster filled with the given value.
    pub fn new(width: usize, height: usize, extent: Extent, crs: Option<Crs>, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            extent,
            crs,
            kind: CellKind::Float,
        }
    }

    /// Raster on the same grid as `self` with new data.
    pub fn with_data(&self, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), self.width * self.height);
        Self {
            data,
            width: self.width,
            height: self.height,
            extent: self.extent,
            crs: self.crs,
            kind: CellKind::Float,
        }
    }

    /// Same grid, every cell set to `fill`.
    pub fn like(&self, fill: f32) -> Self {
        self.with_data(vec![fill; self.width * self.height])
    }

    pub fn as_kind(mut self, kind: CellKind) -> Self {
        self.kind = kind;
        self
    }

    /// Cell size `(x, y)` in CRS units.
    pub fn cell_size(&self) -> (f64, f64) {
        (
            self.extent.width() / self.width as f64,
            self.extent.height() / self.height as f64,
        )
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// Centre of cell `(row, col)` in CRS units.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let (cx, cy) = self.cell_size();
        (
            self.extent.min_x + (col as f64 + 0.5) * cx,
            self.extent.max_y - (row as f64 + 0.5) * cy,
        )
    }

    /// Cell containing `(x, y)`, or None outside the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (cx, cy) = self.cell_size();
        let fc = (x - self.extent.min_x) / cx;
        let fr = (self.extent.max_y - y) / cy;
        if fc < 0.0 || fr < 0.0 || fc >= self.width as f64 || fr >= self.height as f64 {
            return None;
        }
        Some((fr as usize, fc as usize))
    }

    /// Nearest-neighbour sample; None outside the grid or on nodata.
    pub fn sample_nearest(&self, x: f64, y: f64) -> Option<f32> {
        let (r, c) = self.cell_at(x, y)?;
        let v = self.get(r, c);
        (!v.is_nan()).then_some(v)
    }

    /// Sample at `(x, y)` using bilinear interpolation between cell centres.
    /// Returns None outside the grid. Falls back to the nearest cell when any
    /// of the four neighbours is nodata.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<f32> {
        let nearest = self.sample_nearest(x, y)?;
        let (cx, cy) = self.cell_size();

        let fx = ((x - self.extent.min_x) / cx - 0.5).clamp(0.0, (self.width - 1) as f64);
        let fy = ((self.extent.max_y - y) / cy - 0.5).clamp(0.0, (self.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let tx = (fx - x0 as f64) as f32;
        let ty = (fy - y0 as f64) as f32;

        let v00 = self.get(y0, x0);
        let v10 = self.get(y0, x1);
        let v01 = self.get(y1, x0);
        let v11 = self.get(y1, x1);
        if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
            return Some(nearest);
        }

        let v = v00 * (1.0 - tx) * (1.0 - ty)
            + v10 * tx * (1.0 - ty)
            + v01 * (1.0 - tx) * ty
            + v11 * tx * ty;

        Some(v)
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().copied().filter(|v| !v.is_nan())
    }

    pub fn valid_count(&self) -> usize {
        self.valid_values().count()
    }

    pub fn min_value(&self) -> Option<f32> {
        self.valid_values().reduce(f32::min)
    }

    pub fn max_value(&self) -> Option<f32> {
        self.valid_values().reduce(f32::max)
    }

    pub fn mean_value(&self) -> Option<f32> {
        let (sum, n) = self
            .valid_values()
            .fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
        (n > 0).then(|| (sum / n as f64) as f32)
    }

    /// True when both rasters share CRS, dimensions and extent.
    pub fn same_grid(&self, other: &Raster) -> bool {
        let (cx, cy) = self.cell_size();
        let tol_x = cx * ALIGN_TOLERANCE;
        let tol_y = cy * ALIGN_TOLERANCE;
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && (self.extent.min_x - other.extent.min_x).abs() <= tol_x
            && (self.extent.max_x - other.extent.max_x).abs() <= tol_x
            && (self.extent.min_y - other.extent.min_y).abs() <= tol_y
            && (self.extent.max_y - other.extent.max_y).abs() <= tol_y
    }

    /// True when both grids share CRS and cell size and their cell edges
    /// line up, so that one can be cropped onto the other without resampling.
    pub fn aligned_with(&self, other: &Raster) -> bool {
        let (ax, ay) = self.cell_size();
        let (bx, by) = other.cell_size();
        let on_lattice = |offset: f64, cell: f64| {
            let k = offset / cell;
            (k - k.round()).abs() <= ALIGN_TOLERANCE * 1e3
        };
        self.crs == other.crs
            && (ax - bx).abs() <= ax * ALIGN_TOLERANCE
            && (ay - by).abs() <= ay * ALIGN_TOLERANCE
            && on_lattice(self.extent.min_x - other.extent.min_x, ax)
            && on_lattice(self.extent.max_y - other.extent.max_y, ay)
    }

    /// Inclusive row/column window of cells whose centres lie inside `e`.
    pub fn window_for(&self, e: &Extent) -> Option<CellWindow> {
        let (cx, cy) = self.cell_size();
        let c0 = ((e.min_x - self.extent.min_x) / cx - 0.5).ceil().max(0.0);
        let c1 = ((e.max_x - self.extent.min_x) / cx - 0.5).floor();
        let r0 = ((self.extent.max_y - e.max_y) / cy - 0.5).ceil().max(0.0);
        let r1 = ((self.extent.max_y - e.min_y) / cy - 0.5).floor();
        if c1 < 0.0 || r1 < 0.0 {
            return None;
        }
        let c1 = (c1 as usize).min(self.width - 1);
        let r1 = (r1 as usize).min(self.height - 1);
        let (c0, r0) = (c0 as usize, r0 as usize);
        (c0 <= c1 && r0 <= r1).then_some(CellWindow { row0: r0, col0: c0, rows: r1 - r0 + 1, cols: c1 - c0 + 1 })
    }

    /// Copy of the cells inside `win`, georeferenced to that window.
    pub fn window(&self, win: &CellWindow) -> Raster {
        let (cx, cy) = self.cell_size();
        let extent = Extent::new(
            self.extent.min_x + win.col0 as f64 * cx,
            self.extent.max_y - (win.row0 + win.rows) as f64 * cy,
            self.extent.min_x + (win.col0 + win.cols) as f64 * cx,
            self.extent.max_y - win.row0 as f64 * cy,
        );
        let mut data = Vec::with_capacity(win.rows * win.cols);
        for r in win.row0..win.row0 + win.rows {
            let start = self.index(r, win.col0);
            data.extend_from_slice(&self.data[start..start + win.cols]);
        }
        Raster {
            data,
            width: win.cols,
            height: win.rows,
            extent,
            crs: self.crs,
            kind: self.kind,
        }
    }

    /// Crop to the cells whose centres fall inside `e`.
    pub fn crop(&self, e: &Extent) -> Option<Raster> {
        self.window_for(e).map(|w| self.window(&w))
    }

    /// Apply `f` to every valid cell; nodata stays nodata.
    pub fn map_valid<F: Fn(f32) -> f32>(&self, f: F) -> Raster {
        self.with_data(
            self.data
                .iter()
                .map(|&v| if v.is_nan() { f32::NAN } else { f(v) })
                .collect(),
        )
    }

    /// Keep cells where `mask` is true, nodata elsewhere.
    pub fn masked(&self, mask: &[bool]) -> Raster {
        debug_assert_eq!(mask.len(), self.data.len());
        self.with_data(
            self.data
                .iter()
                .zip(mask)
                .map(|(&v, &keep)| if keep { v } else { f32::NAN })
                .collect(),
        )
    }

    /// Combine two rasters cell by cell over their common footprint.
    ///
    /// Identical grids are combined directly; aligned grids are first cropped
    /// to their intersection. Nodata in either input gives nodata.
    pub fn zip_with<F: Fn(f32, f32) -> f32>(&self, other: &Raster, f: F) -> Result<Raster> {
        let (a, b) = if self.same_grid(other) {
            (self.clone(), other.clone())
        } else if self.aligned_with(other) {
            let common = self
                .extent
                .intersection(&other.extent)
                .ok_or_else(|| SsdError::GridMismatch("rasters do not overlap".into()))?;
            let a = self.crop(&common);
            let b = other.crop(&common);
            match (a, b) {
                (Some(a), Some(b)) if a.width == b.width && a.height == b.height => (a, b),
                _ => return Err(SsdError::GridMismatch("empty common footprint".into())),
            }
        } else {
            return Err(SsdError::GridMismatch(format!(
                "{}x{} grid in {:?} vs {}x{} grid in {:?}",
                self.width, self.height, self.crs, other.width, other.height, other.crs
            )));
        };

        let data = a
            .data
            .iter()
            .zip(&b.data)
            .map(|(&x, &y)| if x.is_nan() || y.is_nan() { f32::NAN } else { f(x, y) })
            .collect();
        Ok(a.with_data(data))
    }
}

/// Inclusive block of cells addressed by its top-left cell and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWindow {
    pub row0: usize,
    pub col0: usize,
    pub rows: usize,
    pub cols: usize,
}

impl CellWindow {
    /// Smallest window covering both.
    pub fn union(&self, other: &CellWindow) -> CellWindow {
        let row0 = self.row0.min(other.row0);
        let col0 = self.col0.min(other.col0);
        let row1 = (self.row0 + self.rows).max(other.row0 + other.rows);
        let col1 = (self.col0 + self.cols).max(other.col0 + other.cols);
        CellWindow { row0, col0, rows: row1 - row0, cols: col1 - col0 }
    }

    /// Window covering the true cells of a row-major mask.
    pub fn of_mask(mask: &[bool], width: usize) -> Option<CellWindow> {
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for (i, _) in mask.iter().enumerate().filter(|&(_, &m)| m) {
            let (r, c) = (i / width, i % width);
            bounds = Some(match bounds {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            });
        }
        bounds.map(|(r0, r1, c0, c1)| CellWindow { row0: r0, col0: c0, rows: r1 - r0 + 1, cols: c1 - c0 + 1 })
    }
}

/// Build a row-major grid by evaluating `f(row, col)` for every cell.
/// Rows are filled in parallel with the `threading` feature.
pub(crate) fn fill_cells<T, F>(width: usize, height: usize, init: T, f: F) -> Vec<T>
where
    T: Copy + Send + Sync,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    let mut data = vec![init; width * height];
    if width == 0 {
        return data;
    }

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        data.par_chunks_mut(width).enumerate().for_each(|(r, row)| {
            for (c, v) in row.iter_mut().enumerate() {
                *v = f(r, c);
            }
        });
    }

    #[cfg(not(feature = "threading"))]
    for (r, row) in data.chunks_mut(width).enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = f(r, c);
        }
    }

    data
}
