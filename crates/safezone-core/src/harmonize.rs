//! Coordinate harmonisation: choose the working UTM CRS and bring every
//! input onto one aligned grid in it.

use tracing::{debug, info};

use crate::buffer::check_coverage;
use crate::crs::{working_crs_for, Crs, Transformer};
use crate::error::{Result, SsdError};
use crate::raster::{fill_cells, Extent, Raster};
use crate::zone::SafetyZone;

/// Metres per degree of latitude (and of longitude at the equator).
const METRES_PER_DEGREE: f64 = 111_320.0;
/// Samples per edge when projecting a raster footprint.
const EDGE_SAMPLES: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    /// For categorical rasters.
    Nearest,
    /// For continuous surfaces.
    Bilinear,
}

/// Inputs expressed in the working CRS on the vegetation grid.
#[derive(Debug, Clone)]
pub struct Harmonized {
    pub crs: Crs,
    pub vegetation: Raster,
    pub terrain: Raster,
    pub zone: Option<SafetyZone>,
    /// Extent shared by both rasters.
    pub extent: Extent,
}

/// Isotropic cell size in metres. Geographic cells are converted at the
/// extent's mid-latitude.
pub fn cell_size_m(r: &Raster) -> f64 {
    let (cx, cy) = r.cell_size();
    match r.crs {
        Some(crs) if crs.is_geographic() => {
            let mid_lat = (r.extent.min_y + r.extent.max_y) / 2.0;
            let mx = cx * METRES_PER_DEGREE * mid_lat.to_radians().cos();
            let my = cy * METRES_PER_DEGREE;
            (mx + my) / 2.0
        }
        _ => (cx + cy) / 2.0,
    }
}

/// Bounding box of a raster's footprint after projection into `to`.
pub fn projected_extent(r: &Raster, from: &Crs, to: &Crs) -> Result<Extent> {
    if from == to {
        return Ok(r.extent);
    }
    let t = Transformer::new(from, to)?;
    let e = r.extent;
    let mut out = Extent::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut add = |x: f64, y: f64| -> Result<()> {
        let (px, py) = t.apply(x, y)?;
        out.min_x = out.min_x.min(px);
        out.min_y = out.min_y.min(py);
        out.max_x = out.max_x.max(px);
        out.max_y = out.max_y.max(py);
        Ok(())
    };
    for i in 0..EDGE_SAMPLES {
        let f = i as f64 / (EDGE_SAMPLES - 1) as f64;
        let x = e.min_x + f * e.width();
        let y = e.min_y + f * e.height();
        add(x, e.min_y)?;
        add(x, e.max_y)?;
        add(e.min_x, y)?;
        add(e.max_x, y)?;
    }
    Ok(out)
}

/// Empty raster of square `cell` cells covering `extent`, snapped outward to
/// multiples of the cell size.
fn snapped_grid(extent: &Extent, cell: f64, crs: Crs) -> Result<Raster> {
    let e = Extent::new(
        (extent.min_x / cell).floor() * cell,
        (extent.min_y / cell).floor() * cell,
        (extent.max_x / cell).ceil() * cell,
        (extent.max_y / cell).ceil() * cell,
    );
    let width = (e.width() / cell).round() as usize;
    let height = (e.height() / cell).round() as usize;
    if width == 0 || height == 0 {
        return Err(SsdError::InvalidInput("reprojected raster is empty".into()));
    }
    Ok(Raster::new(width, height, e, Some(crs), f32::NAN))
}

/// Resample `src` onto the grid of `template`.
pub fn resample_onto(src: &Raster, template: &Raster, resampling: Resampling) -> Result<Raster> {
    let from = src
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution("source raster".into()))?;
    let to = template
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution("target grid".into()))?;

    // Inverse mapping: every target cell centre is located in the source.
    let inverse = Transformer::new(&to, &from)?;
    let data = fill_cells(template.width, template.height, f32::NAN, |r, c| {
        let (x, y) = template.cell_center(r, c);
        let Ok((sx, sy)) = inverse.apply(x, y) else {
            return f32::NAN;
        };
        let v = match resampling {
            Resampling::Nearest => src.sample_nearest(sx, sy),
            Resampling::Bilinear => src.sample_bilinear(sx, sy),
        };
        v.unwrap_or(f32::NAN)
    });
    Ok(template.with_data(data).as_kind(src.kind))
}

/// Bring `src` into `to`, optionally limited to `limit` (in `to`).
///
/// Rasters already in `to` are only cropped, never resampled.
pub fn reproject_raster(
    src: &Raster,
    to: &Crs,
    resampling: Resampling,
    limit: Option<&Extent>,
) -> Result<Raster> {
    let from = src
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution("source raster".into()))?;

    if from == *to {
        return match limit {
            None => Ok(src.clone()),
            Some(l) => src
                .crop(l)
                .ok_or_else(|| SsdError::InvalidInput("raster does not overlap the processing extent".into())),
        };
    }

    let mut extent = projected_extent(src, &from, to)?;
    if let Some(l) = limit {
        extent = extent
            .intersection(l)
            .ok_or_else(|| SsdError::InvalidInput("raster does not overlap the processing extent".into()))?;
    }
    let template = snapped_grid(&extent, cell_size_m(src), *to)?;
    debug!(from = %from, to = %to, width = template.width, height = template.height, "reprojecting raster");
    resample_onto(src, &template, resampling)
}

/// Harmonise vegetation, terrain and (optionally) the safety zone.
///
/// The working CRS is the UTM zone of the safety-zone centroid, or of the
/// vegetation raster's centre when no zone is given. With a zone, both
/// rasters must cover it and are limited to its bounding box grown by
/// `clip_distance` plus one cell. Terrain is always resampled (bilinear) onto the
/// vegetation grid unless it already matches it.
pub fn harmonize(
    vegetation: &Raster,
    terrain: &Raster,
    zone: Option<&SafetyZone>,
    clip_distance: Option<f64>,
) -> Result<Harmonized> {
    let veg_crs = vegetation
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution("vegetation height raster".into()))?;
    let dtm_crs = terrain
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution("terrain raster".into()))?;

    let reference = match zone {
        Some(z) => {
            let (x, y) = z.centroid()?;
            z.crs()?.unproject(x, y)?
        }
        None => {
            let (x, y) = vegetation.extent.center();
            veg_crs.unproject(x, y)?
        }
    };
    let crs = working_crs_for(reference);
    info!(working_crs = %crs, lon = reference.lon, lat = reference.lat, "selected working CRS");

    let zone = zone.map(|z| z.reprojected(&crs)).transpose()?;
    let limit = match &zone {
        Some(z) => {
            let ze = z.extent()?;
            check_coverage(&ze, &projected_extent(vegetation, &veg_crs, &crs)?, "vegetation height")?;
            check_coverage(&ze, &projected_extent(terrain, &dtm_crs, &crs)?, "terrain")?;
            // One cell beyond the clip distance.
            let margin = cell_size_m(vegetation);
            clip_distance.map(|d| ze.expand(d + margin))
        }
        None => None,
    };

    let vegetation = reproject_raster(vegetation, &crs, Resampling::Nearest, limit.as_ref())?;
    let terrain = if terrain.crs == Some(crs) && terrain.same_grid(&vegetation) {
        terrain.clone()
    } else {
        resample_onto(terrain, &vegetation, Resampling::Bilinear)?
    };

    Ok(Harmonized {
        crs,
        extent: vegetation.extent,
        vegetation,
        terrain,
        zone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::LonLat;
    use crate::raster::CellKind;
    use geo::polygon;

    fn utm12() -> Crs {
        Crs::from_epsg(26912).unwrap()
    }

    fn utm_raster(fill: f32) -> Raster {
        Raster::new(
            40,
            40,
            Extent::new(400_000.0, 4_000_000.0, 401_200.0, 4_001_200.0),
            Some(utm12()),
            fill,
        )
    }

    fn zone_at(x: f64, y: f64, size: f64) -> SafetyZone {
        SafetyZone::new(
            polygon![
                (x: x, y: y),
                (x: x + size, y: y),
                (x: x + size, y: y + size),
                (x: x, y: y + size),
                (x: x, y: y),
            ],
            Some(utm12()),
        )
    }

    #[test]
    fn rasters_in_working_crs_pass_through() {
        let veg = utm_raster(150.0).as_kind(CellKind::Integer);
        let dtm = utm_raster(1000.0);
        let h = harmonize(&veg, &dtm, None, None).unwrap();
        assert_eq!(h.crs, utm12());
        assert!(h.vegetation.same_grid(&veg));
        assert_eq!(h.vegetation.kind, CellKind::Integer);
        assert!(h.terrain.same_grid(&veg));
    }

    #[test]
    fn clip_distance_limits_the_processing_extent() {
        let veg = utm_raster(150.0);
        let zone = zone_at(400_600.0, 4_000_600.0, 30.0);
        let h = harmonize(&veg, &veg, Some(&zone), Some(90.0)).unwrap();
        assert_eq!(h.extent, Extent::new(400_480.0, 4_000_480.0, 400_750.0, 4_000_750.0));
        assert_eq!((h.vegetation.width, h.vegetation.height), (9, 9));
    }

    #[test]
    fn clipped_extent_covers_the_whole_clip_buffer() {
        // Zone edges off the 30 m grid: the buffer reaches into partial cells.
        let veg = utm_raster(150.0);
        let zone = zone_at(400_610.0, 4_000_610.0, 20.0);
        let clip = 100.0;
        let h = harmonize(&veg, &veg, Some(&zone), Some(clip)).unwrap();
        let wanted = zone.extent().unwrap().expand(clip);
        assert!(h.extent.min_x <= wanted.min_x && h.extent.min_y <= wanted.min_y);
        assert!(h.extent.max_x >= wanted.max_x && h.extent.max_y >= wanted.max_y);
    }

    #[test]
    fn zone_outside_raster_fails_coverage() {
        let veg = utm_raster(150.0);
        let zone = zone_at(401_190.0, 4_000_600.0, 30.0);
        assert!(matches!(
            harmonize(&veg, &veg, Some(&zone), None),
            Err(SsdError::ExtentCoverage { raster: "vegetation height" })
        ));
    }

    #[test]
    fn missing_crs_is_a_coordinate_error() {
        let mut veg = utm_raster(150.0);
        veg.crs = None;
        assert!(matches!(
            harmonize(&veg, &utm_raster(0.0), None, None),
            Err(SsdError::CoordinateResolution(_))
        ));
    }

    #[test]
    fn geographic_raster_is_projected_with_metre_cells() {
        // ~0.001° cells around 111.5°W, 36.1°N (zone 12).
        let geo = Crs::from_epsg(4269).unwrap();
        let mut veg = Raster::new(100, 100, Extent::new(-111.55, 36.05, -111.45, 36.15), Some(geo), 0.0);
        for r in 0..100 {
            for c in 0..100 {
                veg.set(r, c, if c < 50 { 105.0 } else { 150.0 });
            }
        }
        let h = harmonize(&veg, &veg, None, None).unwrap();
        assert_eq!(h.crs, utm12());
        let (cx, cy) = h.vegetation.cell_size();
        assert!((cx - cy).abs() < 1e-9, "cells must be square");
        assert!((cx - cell_size_m(&veg)).abs() < 1e-9);
        assert!(cx > 90.0 && cx < 112.0, "cell size {cx}");

        // Nearest-neighbour keeps codes categorical.
        let c = Crs::from_epsg(26912).unwrap();
        let (x, y) = c.project(LonLat::new(-111.52, 36.1)).unwrap();
        let (r, col) = h.vegetation.cell_at(x, y).unwrap();
        assert_eq!(h.vegetation.get(r, col), 105.0);
        assert!(h
            .vegetation
            .valid_values()
            .all(|v| v == 105.0 || v == 150.0));
    }
}
