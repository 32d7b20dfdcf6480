//! Buffer regions around the safety zone, evaluated on a raster grid.
//!
//! Buffers are exact distance regions (round joins, dissolved): a cell lies
//! in `buffer(zone, d)` when its centre is within `d` of the zone. Extraction
//! by a buffer keeps the cells whose centres fall inside it.

use tracing::debug;

use crate::error::{Result, SsdError};
use crate::raster::{fill_cells, Extent, Raster};
use crate::zone::SafetyZone;

/// Upper bound on any physically meaningful SSD, in metres.
pub const MAX_SSD_RADIUS_M: f64 = 9280.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSide {
    /// Zone interior included.
    Full,
    /// Zone interior excluded (a donut).
    OutsideOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Buffer {
    pub distance_m: f64,
    pub side: BufferSide,
}

impl Buffer {
    pub fn full(distance_m: f64) -> Self {
        Self { distance_m, side: BufferSide::Full }
    }

    pub fn donut(distance_m: f64) -> Self {
        Self { distance_m, side: BufferSide::OutsideOnly }
    }

    /// Membership of a cell whose centre is `d` metres from the zone.
    #[inline]
    pub fn includes(&self, d: f64) -> bool {
        match self.side {
            BufferSide::Full => d <= self.distance_m,
            BufferSide::OutsideOnly => d > 0.0 && d <= self.distance_m,
        }
    }
}

/// Distance from every cell centre of a grid to the safety zone.
#[derive(Debug, Clone)]
pub struct ZoneDistance {
    /// Row-major metres; 0 for centres inside the zone.
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
}

impl ZoneDistance {
    /// Evaluate on the grid of `grid`. The zone must already be in the
    /// grid's CRS.
    pub fn compute(zone: &SafetyZone, grid: &Raster) -> Self {
        let data = fill_cells(grid.width, grid.height, f64::INFINITY, |r, c| {
            let (x, y) = grid.cell_center(r, c);
            zone.distance_to(x, y)
        });
        Self { data, width: grid.width, height: grid.height }
    }

    pub fn mask(&self, buffer: &Buffer) -> Vec<bool> {
        self.data.iter().map(|&d| buffer.includes(d)).collect()
    }

    /// Cells whose centres lie inside the zone.
    pub fn zone_mask(&self) -> Vec<bool> {
        self.data.iter().map(|&d| d == 0.0).collect()
    }
}

/// The nested buffers of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonutSet {
    pub max_with_zone: Buffer,
    pub max_donut: Buffer,
    /// Largest SSD found in `max_donut`.
    pub max_ssd: f32,
    pub shrink_donut: Buffer,
}

/// Result of building the donuts against an SSD raster.
#[derive(Debug, Clone)]
pub struct DonutExtraction {
    pub donuts: DonutSet,
    /// SSD restricted to the zone plus the maximal buffer.
    pub ssd_with_zone: Raster,
    /// SSD restricted to the shrink-to-fit donut.
    pub ssd_shrink: Raster,
}

/// Fail with `ExtentCoverage` unless `raster_extent` contains the whole zone.
pub fn check_coverage(zone: &Extent, raster_extent: &Extent, raster: &'static str) -> Result<()> {
    if raster_extent.contains(zone) {
        debug!(raster, "raster contains the safety zone");
        Ok(())
    } else {
        Err(SsdError::ExtentCoverage { raster })
    }
}

/// Build the maximal buffers, find the largest SSD in the maximal donut and
/// shrink the donut to that radius.
///
/// `dist` must be computed on the grid of `ssd`. Fails with `NoSegments`
/// when the donut holds no positive SSD.
pub fn build_donuts(ssd: &Raster, dist: &ZoneDistance, max_radius_m: f64) -> Result<DonutExtraction> {
    if dist.width != ssd.width || dist.height != ssd.height {
        return Err(SsdError::GridMismatch("zone distances and SSD differ in shape".into()));
    }

    let max_with_zone = Buffer::full(max_radius_m);
    let max_donut = Buffer::donut(max_radius_m);

    let ssd_with_zone = ssd.masked(&dist.mask(&max_with_zone));
    let max_ssd = ssd
        .masked(&dist.mask(&max_donut))
        .max_value()
        .filter(|&m| m > 0.0)
        .ok_or(SsdError::NoSegments)?;

    let shrink_donut = Buffer::donut((max_ssd as f64).min(max_radius_m));
    let ssd_shrink = ssd.masked(&dist.mask(&shrink_donut));
    debug!(max_ssd, radius = shrink_donut.distance_m, "shrink-to-fit donut");

    Ok(DonutExtraction {
        donuts: DonutSet { max_with_zone, max_donut, max_ssd, shrink_donut },
        ssd_with_zone,
        ssd_shrink,
    })
}
