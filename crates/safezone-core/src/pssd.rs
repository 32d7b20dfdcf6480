//! Potential SSD: distance to each fuel segment divided by that segment's
//! mean SSD, reduced by cell-wise minimum over all segments.
//!
//! Distances are exact Euclidean distances between cell centres, in metres,
//! computed with the separable Felzenszwalb–Huttenlocher transform on the
//! window spanning the segment and the safety zone.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SsdError};
use crate::raster::{CellWindow, Raster};
use crate::segment::Segmentation;

/// Stand-in for "no site" in the distance transform. Finite so that parabola
/// intersections never produce NaN.
const FAR: f64 = 1e20;

/// What to do with a segment whose mean SSD is zero or undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegenerateSegmentPolicy {
    /// Abort with `DegenerateSegment`.
    #[default]
    Fail,
    /// Skip the segment with a warning.
    Ignore,
}

/// Per-segment summary gathered in one pass over the labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    pub id: u32,
    pub cells: usize,
    /// None when no labelled cell holds a valid SSD.
    pub mean_ssd: Option<f64>,
    pub window: CellWindow,
}

impl SegmentStats {
    pub fn is_degenerate(&self) -> bool {
        !matches!(self.mean_ssd, Some(m) if m > 0.0)
    }
}

/// Output of the reduction.
#[derive(Debug, Clone)]
pub struct PssdReduction {
    /// Cell-wise minimum pSSD over the zone's bounding window; nodata
    /// outside the zone.
    pub minimum: Raster,
    /// Placement of `minimum` within the working grid.
    pub window: CellWindow,
    pub segments_used: usize,
    pub skipped: Vec<u32>,
}

pub fn segment_stats(seg: &Segmentation, ssd: &Raster) -> Vec<SegmentStats> {
    let n = seg.count as usize;
    let mut cells = vec![0usize; n];
    let mut valid = vec![0usize; n];
    let mut sum = vec![0.0f64; n];
    let mut bounds: Vec<Option<(usize, usize, usize, usize)>> = vec![None; n];

    for (i, &label) in seg.labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let s = label as usize - 1;
        let (r, c) = (i / seg.width, i % seg.width);
        cells[s] += 1;
        let v = ssd.data[i];
        if !v.is_nan() {
            valid[s] += 1;
            sum[s] += v as f64;
        }
        bounds[s] = Some(match bounds[s] {
            None => (r, r, c, c),
            Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
        });
    }

    (0..n)
        .filter_map(|s| {
            let (r0, r1, c0, c1) = bounds[s]?;
            Some(SegmentStats {
                id: s as u32 + 1,
                cells: cells[s],
                mean_ssd: (valid[s] > 0).then(|| sum[s] / valid[s] as f64),
                window: CellWindow { row0: r0, col0: c0, rows: r1 - r0 + 1, cols: c1 - c0 + 1 },
            })
        })
        .collect()
}

/// pSSD of one segment at every cell of `zone_win`, row-major.
///
/// `mean_ssd` must be positive.
pub fn segment_pssd(
    seg: &Segmentation,
    stats: &SegmentStats,
    mean_ssd: f64,
    zone_win: &CellWindow,
    cell: (f64, f64),
) -> Vec<f32> {
    let win = stats.window.union(zone_win);
    let (cx, cy) = cell;

    // Squared distance, initialised with segment sites.
    let mut f = vec![FAR; win.rows * win.cols];
    for r in 0..win.rows {
        for c in 0..win.cols {
            let i = (win.row0 + r) * seg.width + win.col0 + c;
            if seg.labels[i] == stats.id {
                f[r * win.cols + c] = 0.0;
            }
        }
    }

    let mut scratch = Scratch::new(win.rows.max(win.cols));

    // Columns, spacing = cell height.
    let mut col = vec![0.0; win.rows];
    let mut out = vec![0.0; win.rows];
    for c in 0..win.cols {
        for r in 0..win.rows {
            col[r] = f[r * win.cols + c];
        }
        edt_1d(&col, cy, &mut out, &mut scratch);
        for r in 0..win.rows {
            f[r * win.cols + c] = out[r];
        }
    }

    // Rows, only those overlapping the zone.
    let zr0 = zone_win.row0 - win.row0;
    let zc0 = zone_win.col0 - win.col0;
    let mut row_out = vec![0.0; win.cols];
    let mut result = Vec::with_capacity(zone_win.rows * zone_win.cols);
    for r in zr0..zr0 + zone_win.rows {
        let row = &f[r * win.cols..(r + 1) * win.cols];
        edt_1d(row, cx, &mut row_out, &mut scratch);
        result.extend(
            row_out[zc0..zc0 + zone_win.cols]
                .iter()
                .map(|&d2| (d2.sqrt() / mean_ssd) as f32),
        );
    }
    result
}

/// Per-segment pSSD over the zone, reduced by cell-wise minimum.
///
/// `ssd` is the SSD raster already restricted to the shrink-to-fit donut and
/// `zone_mask` flags the cells whose centres lie in the safety zone.
pub fn reduce_pssd(
    ssd: &Raster,
    seg: &Segmentation,
    zone_mask: &[bool],
    policy: DegenerateSegmentPolicy,
) -> Result<PssdReduction> {
    if seg.width != ssd.width || seg.height != ssd.height || zone_mask.len() != ssd.data.len() {
        return Err(SsdError::GridMismatch("segments, SSD and zone mask differ in shape".into()));
    }
    let zone_win = CellWindow::of_mask(zone_mask, ssd.width).ok_or(SsdError::EmptyZone)?;

    // Degeneracy is settled in id order so the first failure is stable.
    let mut used = Vec::new();
    let mut skipped = Vec::new();
    for s in segment_stats(seg, ssd) {
        match (s.is_degenerate(), policy) {
            (false, _) => used.push(s),
            (true, DegenerateSegmentPolicy::Fail) => {
                return Err(SsdError::DegenerateSegment { segment: s.id })
            }
            (true, DegenerateSegmentPolicy::Ignore) => {
                warn!(segment = s.id, cells = s.cells, "skipping segment with zero mean SSD");
                skipped.push(s.id);
            }
        }
    }
    if used.is_empty() {
        return Err(SsdError::NoSegments);
    }

    let cell = ssd.cell_size();
    let pssd_of = |s: &SegmentStats| {
        let mean = s.mean_ssd.unwrap_or(f64::NAN);
        debug!(segment = s.id, cells = s.cells, mean_ssd = mean, "segment pSSD");
        segment_pssd(seg, s, mean, &zone_win, cell)
    };
    let cellwise_min = |mut a: Vec<f32>, b: Vec<f32>| {
        for (x, y) in a.iter_mut().zip(b) {
            *x = x.min(y);
        }
        a
    };
    let init = || vec![f32::INFINITY; zone_win.rows * zone_win.cols];

    #[cfg(feature = "threading")]
    let mut minimum = {
        use rayon::prelude::*;
        used.par_iter().map(pssd_of).reduce(init, cellwise_min)
    };
    #[cfg(not(feature = "threading"))]
    let mut minimum = used.iter().map(pssd_of).fold(init(), cellwise_min);

    for r in 0..zone_win.rows {
        for c in 0..zone_win.cols {
            let i = (zone_win.row0 + r) * ssd.width + zone_win.col0 + c;
            if !zone_mask[i] {
                minimum[r * zone_win.cols + c] = f32::NAN;
            }
        }
    }

    Ok(PssdReduction {
        minimum: ssd.window(&zone_win).with_data(minimum),
        window: zone_win,
        segments_used: used.len(),
        skipped,
    })
}

// ── 1-D distance transform ───────────────────────────────────────────────────

struct Scratch {
    v: Vec<usize>,
    z: Vec<f64>,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Self { v: vec![0; n], z: vec![0.0; n + 1] }
    }
}

/// Lower envelope of parabolas rooted at samples spaced `spacing` apart.
/// `f` holds squared distances; `out[q] = min_p (f[p] + ((q − p)·spacing)²)`.
fn edt_1d(f: &[f64], spacing: f64, out: &mut [f64], s: &mut Scratch) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let pos = |q: usize| q as f64 * spacing;
    let meet = |q: usize, p: usize| {
        ((f[q] + pos(q) * pos(q)) - (f[p] + pos(p) * pos(p))) / (2.0 * (pos(q) - pos(p)))
    };

    let mut k = 0usize;
    s.v[0] = 0;
    s.z[0] = f64::NEG_INFINITY;
    s.z[1] = f64::INFINITY;
    for q in 1..n {
        let mut x = meet(q, s.v[k]);
        while x <= s.z[k] {
            k -= 1;
            x = meet(q, s.v[k]);
        }
        k += 1;
        s.v[k] = q;
        s.z[k] = x;
        s.z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, o) in out.iter_mut().enumerate().take(n) {
        while s.z[k + 1] < pos(q) {
            k += 1;
        }
        let d = pos(q) - pos(s.v[k]);
        *o = d * d + f[s.v[k]];
    }
}
