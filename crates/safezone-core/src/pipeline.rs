//! Pipeline orchestrator: runs every stage in order for one run.
//!
//! Stage order:
//!   1. Coordinate harmonisation
//!   2. Slope and multiplier classification
//!   3. Vegetation height normalisation
//!   4. SSD algebra
//!   5. Buffers (extended run only)
//!   6. Segmentation
//!   7. pSSD reduction
//!   8. Compliance and safest point
//!
//! Stages never overlap; parallelism lives inside the raster kernels.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, info_span};

use crate::buffer::{build_donuts, DonutSet, ZoneDistance};
use crate::compliance::{compliance, safest_point, SafestPoint};
use crate::conditions::{BurnCondition, MultiplierTable, WindClass};
use crate::config::PipelineConfig;
use crate::crs::Crs;
use crate::error::{Result, SsdError};
use crate::harmonize::{harmonize, Harmonized};
use crate::outputs::{OutputPaths, Staging, PSSD_FILE, SAFEST_POINT_FILE, SEGMENTS_FILE, SSD_FILE, SSD_MET_FILE};
use crate::pssd::reduce_pssd;
use crate::raster::{Extent, Raster};
use crate::segment::segment_mean_shift;
use crate::slope::{classify_slope, percent_rise};
use crate::ssd::compute_ssd;
use crate::vegetation::normalize_heights;
use crate::zone::SafetyZone;

// ── Public structs ───────────────────────────────────────────────────────────

/// Per-run facts every stage reads. Built once after harmonisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunContext {
    pub crs: Crs,
    pub working_extent: Extent,
    pub wind: WindClass,
    pub burn: BurnCondition,
    pub threads: Option<usize>,
}

/// Output of the simple variant.
#[derive(Debug, Clone)]
pub struct SsdProducts {
    pub context: RunContext,
    pub ssd: Raster,
}

/// Output of the extended variant.
#[derive(Debug, Clone)]
pub struct SsdeProducts {
    pub context: RunContext,
    /// SSD over the zone plus the maximal buffer.
    pub ssd: Raster,
    pub donuts: DonutSet,
    pub segments: Raster,
    pub segment_count: u32,
    pub skipped_segments: Vec<u32>,
    pub minimum_pssd: Raster,
    pub compliance: Raster,
    pub safest_point: SafestPoint,
}

impl SsdProducts {
    pub fn publish(&self, paths: OutputPaths) -> Result<PathBuf> {
        let mut staging = Staging::begin(paths)?;
        staging.raster(SSD_FILE, &self.ssd)?;
        staging.publish()
    }
}

impl SsdeProducts {
    /// Write pSSD, compliance and safest point (plus SSD and segments when
    /// `keep_intermediates`) and move them into the run directory together.
    pub fn publish(&self, paths: OutputPaths, keep_intermediates: bool) -> Result<PathBuf> {
        let mut staging = Staging::begin(paths)?;
        staging.raster(PSSD_FILE, &self.minimum_pssd)?;
        staging.raster(SSD_MET_FILE, &self.compliance)?;
        staging.safest_point(SAFEST_POINT_FILE, &self.safest_point, &self.context.crs)?;
        if keep_intermediates {
            staging.raster(SSD_FILE, &self.ssd)?;
            staging.raster(SEGMENTS_FILE, &self.segments)?;
        }
        staging.publish()
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct SsdPipeline {
    config: PipelineConfig,
    table: MultiplierTable,
}

impl SsdPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let table = config.multiplier_table()?;
        Ok(Self { config, table })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Simple variant: SSD over the whole vegetation raster, no safety zone.
    pub fn run_ssd(
        &self,
        vegetation: &Raster,
        terrain: &Raster,
        wind: WindClass,
        burn: BurnCondition,
    ) -> Result<SsdProducts> {
        self.with_pool(|| {
            let _run = info_span!("ssd", wind = %wind, burn = %burn).entered();

            let h = stage("harmonize", || harmonize(vegetation, terrain, None, None))?;
            let context = self.context(&h, wind, burn);
            let ssd = self.ssd_raster(&h, &context)?;

            Ok(SsdProducts { context, ssd })
        })
    }

    /// Extended variant: pSSD, compliance and safest point for `zone`.
    pub fn run_ssde(
        &self,
        zone: &SafetyZone,
        vegetation: &Raster,
        terrain: &Raster,
        wind: WindClass,
        burn: BurnCondition,
    ) -> Result<SsdeProducts> {
        self.with_pool(|| {
            let _run = info_span!("ssde", wind = %wind, burn = %burn).entered();
            let max_radius = self.config.max_radius_m;

            // ── 1. Harmonise (includes the coverage check) ───────────────────
            let h = stage("harmonize", || {
                harmonize(vegetation, terrain, Some(zone), Some(max_radius))
            })?;
            let context = self.context(&h, wind, burn);
            let zone = h
                .zone
                .as_ref()
                .ok_or_else(|| SsdError::CoordinateResolution("safety zone".into()))?;

            // ── 2–4. SSD ─────────────────────────────────────────────────────
            let ssd = self.ssd_raster(&h, &context)?;

            // ── 5. Buffers ───────────────────────────────────────────────────
            let (dist, donut) = stage("buffers", || {
                let dist = ZoneDistance::compute(zone, &ssd);
                let donut = build_donuts(&ssd, &dist, max_radius)?;
                Ok((dist, donut))
            })?;
            info!(
                max_ssd = donut.donuts.max_ssd,
                shrink_radius_m = donut.donuts.shrink_donut.distance_m,
                "shrink-to-fit donut built"
            );

            // ── 6. Segmentation ──────────────────────────────────────────────
            let seg = stage("segmentation", || {
                segment_mean_shift(&donut.ssd_shrink, &self.config.segmentation)
            })?;
            if seg.is_empty() {
                return Err(SsdError::NoSegments);
            }
            info!(segments = seg.count, "segmented SSD raster");

            // ── 7. pSSD ──────────────────────────────────────────────────────
            let reduction = stage("pssd", || {
                reduce_pssd(
                    &donut.ssd_shrink,
                    &seg,
                    &dist.zone_mask(),
                    self.config.degenerate_segments,
                )
            })?;

            // ── 8. Compliance and safest point ───────────────────────────────
            let met = compliance(&reduction.minimum);
            let point = safest_point(&reduction.minimum).ok_or(SsdError::EmptyZone)?;
            info!(
                x = point.x,
                y = point.y,
                pssd = point.value,
                tied_cells = point.tied_cells,
                "safest point"
            );

            Ok(SsdeProducts {
                context,
                segments: seg.to_raster(&donut.ssd_shrink),
                segment_count: seg.count,
                skipped_segments: reduction.skipped,
                ssd: donut.ssd_with_zone,
                donuts: donut.donuts,
                minimum_pssd: reduction.minimum,
                compliance: met,
                safest_point: point,
            })
        })
    }

    fn context(&self, h: &Harmonized, wind: WindClass, burn: BurnCondition) -> RunContext {
        RunContext {
            crs: h.crs,
            working_extent: h.extent,
            wind,
            burn,
            threads: self.config.threads,
        }
    }

    /// Slope, multipliers, heights and their product on the harmonised grid.
    fn ssd_raster(&self, h: &Harmonized, ctx: &RunContext) -> Result<Raster> {
        let row = self.table.row(ctx.wind, ctx.burn);
        let multipliers = stage("slope", || {
            Ok(classify_slope(&percent_rise(&h.terrain, self.config.z_factor), &row))
        })?;
        let heights = stage("vegetation", || Ok(normalize_heights(&h.vegetation)))?;
        stage("ssd", || compute_ssd(&heights, &multipliers))
    }

    /// Run `f` on a dedicated pool when a thread count is configured.
    fn with_pool<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        #[cfg(feature = "threading")]
        {
            if let Some(n) = self.config.threads {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| SsdError::CapabilityUnavailable(format!("thread pool: {e}")))?;
                return pool.install(f);
            }
        }
        f()
    }
}

/// Run one stage and log its duration.
fn stage<T>(name: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let started = Instant::now();
    let out = f()?;
    info!(stage = name, elapsed_ms = started.elapsed().as_millis() as u64, "done");
    Ok(out)
}
