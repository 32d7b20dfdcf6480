//! Percent-rise slope (Horn method) and slope-bin multiplier classification.

use crate::conditions::{MultiplierRow, SLOPE_BIN_COUNT};
use crate::raster::{fill_cells, Raster};

/// Lower edges of slope bins 1..=3, in percent rise. Bin 0 starts at 0.
pub const SLOPE_BREAKS: [f32; SLOPE_BIN_COUNT - 1] = [7.5, 22.5, 41.0];

/// Bin index for a percent-rise slope. Boundary values go to the upper bin.
///
/// Negative slopes cannot come out of [`percent_rise`]; they are clamped into
/// bin 0. NaN has no bin.
pub fn slope_bin(percent: f32) -> Option<usize> {
    if percent.is_nan() {
        return None;
    }
    Some(SLOPE_BREAKS.iter().filter(|&&b| percent >= b).count())
}

/// Horn (1981) weighted 3×3 gradient at cell `(r, c)`.
///
/// Returns `(dz_dx, dz_dy)` as rise/run. Neighbours outside the grid or
/// holding nodata take the centre value, so edge cells get a one-sided
/// estimate instead of disappearing.
///
/// ```text
///   NW  N  NE
///   W   *  E
///   SW  S  SE
/// ```
///
/// `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · cx)`
/// `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · cy)`
pub(crate) fn horn_gradient(dem: &Raster, r: usize, c: usize, cx: f64, cy: f64) -> (f64, f64) {
    let centre = dem.get(r, c) as f64;
    let at = |dr: isize, dc: isize| -> f64 {
        let rr = r as isize + dr;
        let cc = c as isize + dc;
        if rr < 0 || cc < 0 || rr >= dem.height as isize || cc >= dem.width as isize {
            return centre;
        }
        let v = dem.get(rr as usize, cc as usize);
        if v.is_nan() { centre } else { v as f64 }
    };

    let nw = at(-1, -1);
    let n  = at(-1,  0);
    let ne = at(-1,  1);
    let w  = at( 0, -1);
    let e  = at( 0,  1);
    let sw = at( 1, -1);
    let s  = at( 1,  0);
    let se = at( 1,  1);

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cx);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cy);
    (dz_dx, dz_dy)
}

/// Slope in percent rise for every cell of a projected terrain raster.
///
/// `z_factor` converts elevation units into the raster's linear unit
/// (1.0 when both are metres). Nodata terrain gives nodata slope.
pub fn percent_rise(dem: &Raster, z_factor: f64) -> Raster {
    let (cx, cy) = dem.cell_size();
    let data = fill_cells(dem.width, dem.height, f32::NAN, |r, c| {
        if dem.get(r, c).is_nan() {
            return f32::NAN;
        }
        let (dx, dy) = horn_gradient(dem, r, c, cx, cy);
        (100.0 * z_factor * (dx * dx + dy * dy).sqrt()) as f32
    });
    dem.with_data(data)
}

/// Replace each slope cell with the multiplier of its bin.
pub fn classify_slope(slope: &Raster, row: &MultiplierRow) -> Raster {
    slope.map_valid(|s| slope_bin(s.max(0.0)).map_or(f32::NAN, |b| row[b]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Extent;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize, cell: f64, rise_per_col: f32) -> Raster {
        let extent = Extent::new(0.0, 0.0, width as f64 * cell, height as f64 * cell);
        let mut r = Raster::new(width, height, extent, None, 0.0);
        for row in 0..height {
            for col in 0..width {
                r.set(row, col, col as f32 * rise_per_col);
            }
        }
        r
    }

    #[test]
    fn bins_partition_non_negative_slopes() {
        let cases = [
            (0.0, 0),
            (7.49, 0),
            (7.5, 1),
            (22.49, 1),
            (22.5, 2),
            (40.99, 2),
            (41.0, 3),
            (400.0, 3),
        ];
        for (pct, bin) in cases {
            assert_eq!(slope_bin(pct), Some(bin), "slope {pct}% should be bin {bin}");
        }
        assert_eq!(slope_bin(f32::NAN), None);
    }

    #[test]
    fn flat_terrain_has_zero_slope_everywhere() {
        let dem = ramp(5, 4, 30.0, 0.0).like(1234.0);
        let s = percent_rise(&dem, 1.0);
        assert!(s.data.iter().all(|&v| v == 0.0), "flat field gave {:?}", s.data);
    }

    #[test]
    fn uniform_ramp_gives_constant_percent_rise() {
        // 3 m rise per 30 m cell = 10%.
        let dem = ramp(6, 6, 30.0, 3.0);
        let s = percent_rise(&dem, 1.0);
        for r in 1..5 {
            for c in 1..5 {
                assert_relative_eq!(s.get(r, c), 10.0, epsilon = 1e-4);
            }
        }
        // Edge columns see a one-sided difference: half the interior value.
        assert_relative_eq!(s.get(2, 0), 5.0, epsilon = 1e-4);
    }

    #[test]
    fn z_factor_scales_slope() {
        let dem = ramp(5, 5, 10.0, 1.0);
        let feet = percent_rise(&dem, 0.3048);
        let metres = percent_rise(&dem, 1.0);
        assert_relative_eq!(feet.get(2, 2), metres.get(2, 2) * 0.3048, epsilon = 1e-4);
    }

    #[test]
    fn nodata_neighbours_do_not_poison_slope() {
        let mut dem = ramp(5, 5, 10.0, 0.0);
        dem.set(1, 1, f32::NAN);
        let s = percent_rise(&dem, 1.0);
        assert!(s.get(1, 1).is_nan());
        assert_eq!(s.get(2, 2), 0.0);
    }

    #[test]
    fn classification_uses_upper_bin_on_boundaries() {
        let slope = ramp(5, 1, 1.0, 0.0).with_data(vec![0.0, 7.5, 22.5, 41.0, f32::NAN]);
        let out = classify_slope(&slope, &[0.8, 1.0, 1.5, 2.0]);
        assert_eq!(&out.data[..4], &[0.8, 1.0, 1.5, 2.0]);
        assert!(out.data[4].is_nan());
    }

    #[test]
    fn nodata_terrain_stays_nodata_through_classification() {
        let mut dem = ramp(5, 5, 10.0, 0.0);
        dem.set(2, 2, f32::NAN);
        let out = classify_slope(&percent_rise(&dem, 1.0), &[1.0, 2.0, 3.0, 4.0]);
        assert!(out.get(2, 2).is_nan());
        assert_eq!(out.valid_values().count(), 24);
        assert!(out.valid_values().all(|v| v == 1.0));
    }
}
