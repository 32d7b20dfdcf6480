//! Mean-shift segmentation of the SSD raster.
//!
//! Pipeline:
//! 1. Joint spatial/range mean-shift filtering (flat kernels) pulls every
//!    cell's value towards the mode of its neighbourhood.
//! 2. 4-connected region growing on the filtered values.
//! 3. Regions smaller than `min_segment_size` merge into the adjacent region
//!    with the closest mean value, bounded by `max_segment_size`.
//! 4. Labels are renumbered 1..=n in row-major order of first appearance.
//!
//! Nodata cells are never labelled (label 0).

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SsdError};
use crate::raster::{fill_cells, CellKind, Raster};

const MAX_SHIFT_ITERATIONS: usize = 10;
/// Convergence threshold for the spatial shift, in cells.
const SHIFT_EPSILON: f64 = 0.1;
const DETAIL_RANGE: std::ops::RangeInclusive<f64> = 1.0..=20.0;

/// Segmentation controls. Details follow the usual 1–20 scale, where higher
/// values keep finer features apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    pub spectral_detail: f64,
    pub spatial_detail: u32,
    /// Minimum cells per segment.
    pub min_segment_size: usize,
    /// None = unbounded.
    pub max_segment_size: Option<usize>,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            spectral_detail: 8.0,
            spatial_detail: 8,
            min_segment_size: 20,
            max_segment_size: None,
        }
    }
}

impl SegmentParams {
    pub fn validate(&self) -> Result<()> {
        if !DETAIL_RANGE.contains(&self.spectral_detail) {
            return Err(SsdError::InvalidInput(format!(
                "spectral detail {} outside 1..=20",
                self.spectral_detail
            )));
        }
        if !DETAIL_RANGE.contains(&(self.spatial_detail as f64)) {
            return Err(SsdError::InvalidInput(format!(
                "spatial detail {} outside 1..=20",
                self.spatial_detail
            )));
        }
        if let Some(max) = self.max_segment_size {
            if max < self.min_segment_size {
                return Err(SsdError::InvalidInput(format!(
                    "max segment size {max} below min segment size {}",
                    self.min_segment_size
                )));
            }
        }
        Ok(())
    }

    /// Range bandwidth for a raster whose values span `span`.
    pub fn range_bandwidth(&self, span: f32) -> f32 {
        (span as f64 * (21.0 - self.spectral_detail) / 40.0) as f32
    }

    /// Spatial radius in cells.
    pub fn spatial_radius(&self) -> usize {
        (20 - self.spatial_detail as usize) / 4 + 1
    }
}

/// Integer labels over a raster grid. 0 = not segmented.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub labels: Vec<u32>,
    pub width: usize,
    pub height: usize,
    /// Labels run 1..=count.
    pub count: u32,
}

impl Segmentation {
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        1..=self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Label raster on the grid of `like`; unlabelled cells are nodata.
    pub fn to_raster(&self, like: &Raster) -> Raster {
        like.with_data(
            self.labels
                .iter()
                .map(|&l| if l == 0 { f32::NAN } else { l as f32 })
                .collect(),
        )
        .as_kind(CellKind::Integer)
    }
}

/// Segment the valid cells of `ssd`.
pub fn segment_mean_shift(ssd: &Raster, params: &SegmentParams) -> Result<Segmentation> {
    params.validate()?;
    let (w, h) = (ssd.width, ssd.height);

    let (Some(lo), Some(hi)) = (ssd.min_value(), ssd.max_value()) else {
        return Ok(Segmentation { labels: vec![0; w * h], width: w, height: h, count: 0 });
    };
    let hr = params.range_bandwidth(hi - lo);
    let hs = params.spatial_radius();

    let filtered = mean_shift_filter(ssd, hs, hr);
    let mut regions = grow_regions(&filtered, w, h, hr / 2.0);
    merge_small_regions(&mut regions, ssd, params);
    Ok(relabel(&regions, w, h))
}

// ── Filtering ────────────────────────────────────────────────────────────────

fn mean_shift_filter(src: &Raster, hs: usize, hr: f32) -> Vec<f32> {
    fill_cells(src.width, src.height, f32::NAN, |r, c| {
        if src.get(r, c).is_nan() {
            f32::NAN
        } else {
            shift_cell(src, r, c, hs, hr)
        }
    })
}

/// Follow the joint spatial/range mean shift from `(r, c)` and return the
/// converged value.
fn shift_cell(src: &Raster, r: usize, c: usize, hs: usize, hr: f32) -> f32 {
    let mut pr = r as f64;
    let mut pc = c as f64;
    let mut v = src.get(r, c);

    for _ in 0..MAX_SHIFT_ITERATIONS {
        let cr = pr.round() as usize;
        let cc = pc.round() as usize;
        let (mut sr, mut sc, mut sv, mut n) = (0.0f64, 0.0f64, 0.0f64, 0usize);
        for rr in cr.saturating_sub(hs)..=(cr + hs).min(src.height - 1) {
            for cc2 in cc.saturating_sub(hs)..=(cc + hs).min(src.width - 1) {
                let x = src.get(rr, cc2);
                if x.is_nan() || (x - v).abs() > hr {
                    continue;
                }
                sr += rr as f64;
                sc += cc2 as f64;
                sv += x as f64;
                n += 1;
            }
        }
        if n == 0 {
            break;
        }
        let nr = sr / n as f64;
        let nc = sc / n as f64;
        let nv = (sv / n as f64) as f32;
        let moved = (nr - pr).abs() + (nc - pc).abs();
        let dv = (nv - v).abs();
        pr = nr;
        pc = nc;
        v = nv;
        if moved < SHIFT_EPSILON && dv <= hr * 0.01 {
            break;
        }
    }
    v
}

// ── Region growing ───────────────────────────────────────────────────────────

/// Connected regions of similar filtered value.
struct Regions {
    /// Row-major region index; `usize::MAX` = none.
    cell_region: Vec<usize>,
    /// Union-find parent per region.
    parent: Vec<usize>,
    size: Vec<usize>,
    sum: Vec<f64>,
    neighbours: Vec<FxHashSet<usize>>,
}

const NO_REGION: usize = usize::MAX;

impl Regions {
    fn find(&mut self, mut r: usize) -> usize {
        while self.parent[r] != r {
            self.parent[r] = self.parent[self.parent[r]];
            r = self.parent[r];
        }
        r
    }

    fn mean(&self, root: usize) -> f64 {
        self.sum[root] / self.size[root] as f64
    }

    /// Merge `small` into `into`; both must be roots.
    fn absorb(&mut self, into: usize, small: usize) {
        self.parent[small] = into;
        self.size[into] += self.size[small];
        self.sum[into] += self.sum[small];
        let moved = std::mem::take(&mut self.neighbours[small]);
        self.neighbours[into].extend(moved);
    }
}

fn grow_regions(filtered: &[f32], w: usize, h: usize, join: f32) -> Regions {
    let mut cell_region = vec![NO_REGION; w * h];
    let mut count = 0usize;
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if filtered[start].is_nan() || cell_region[start] != NO_REGION {
            continue;
        }
        cell_region[start] = count;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            let (r, c) = (i / w, i % w);
            for j in neighbours4(r, c, w, h) {
                if cell_region[j] == NO_REGION
                    && !filtered[j].is_nan()
                    && (filtered[j] - filtered[i]).abs() <= join
                {
                    cell_region[j] = count;
                    queue.push_back(j);
                }
            }
        }
        count += 1;
    }

    Regions {
        cell_region,
        parent: (0..count).collect(),
        size: vec![0; count],
        sum: vec![0.0; count],
        neighbours: vec![FxHashSet::default(); count],
    }
}

fn neighbours4(r: usize, c: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let up = (r > 0).then(|| (r - 1) * w + c);
    let down = (r + 1 < h).then(|| (r + 1) * w + c);
    let left = (c > 0).then(|| r * w + c - 1);
    let right = (c + 1 < w).then(|| r * w + c + 1);
    [up, down, left, right].into_iter().flatten()
}

// ── Small-region merging ─────────────────────────────────────────────────────

fn merge_small_regions(regions: &mut Regions, src: &Raster, params: &SegmentParams) {
    let (w, h) = (src.width, src.height);

    // Statistics use the unfiltered values.
    for (i, &reg) in regions.cell_region.iter().enumerate() {
        if reg == NO_REGION {
            continue;
        }
        regions.size[reg] += 1;
        regions.sum[reg] += src.data[i] as f64;
        let (r, c) = (i / w, i % w);
        for j in neighbours4(r, c, w, h) {
            let other = regions.cell_region[j];
            if other != NO_REGION && other != reg {
                regions.neighbours[reg].insert(other);
            }
        }
    }

    let max = params.max_segment_size.unwrap_or(usize::MAX);
    loop {
        let mut small: Vec<usize> = (0..regions.parent.len())
            .filter(|&r| regions.parent[r] == r && regions.size[r] < params.min_segment_size)
            .collect();
        small.sort_by_key(|&r| (regions.size[r], r));

        let mut merged = false;
        for r in small {
            if regions.parent[r] != r || regions.size[r] >= params.min_segment_size {
                continue;
            }
            let mean = regions.mean(r);
            let adjacent: Vec<usize> = regions.neighbours[r].iter().copied().collect();
            let mut best: Option<(f64, usize)> = None;
            for n in adjacent {
                let root = regions.find(n);
                if root == r || regions.size[root] + regions.size[r] > max {
                    continue;
                }
                let diff = (regions.mean(root) - mean).abs();
                let better = match best {
                    None => true,
                    Some((d, id)) => diff < d || (diff == d && root < id),
                };
                if better {
                    best = Some((diff, root));
                }
            }
            if let Some((_, into)) = best {
                regions.absorb(into, r);
                merged = true;
            }
        }
        if !merged {
            break;
        }
    }
}

fn relabel(regions: &Regions, w: usize, h: usize) -> Segmentation {
    let mut parent = regions.parent.clone();
    let mut root_of = |mut r: usize| {
        while parent[r] != r {
            parent[r] = parent[parent[r]];
            r = parent[r];
        }
        r
    };

    let mut label_of_root = vec![0u32; regions.parent.len()];
    let mut next = 0u32;
    let labels = regions
        .cell_region
        .iter()
        .map(|&reg| {
            if reg == NO_REGION {
                return 0;
            }
            let root = root_of(reg);
            if label_of_root[root] == 0 {
                next += 1;
                label_of_root[root] = next;
            }
            label_of_root[root]
        })
        .collect();

    Segmentation { labels, width: w, height: h, count: next }
}
