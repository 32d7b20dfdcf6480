//! Safety-zone CLI: SSD raster for an area (`ssd`) or pSSD, compliance map
//! and safest point for a candidate safety zone (`ssde`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use safezone_core::io::{read_raster, read_zone};
use safezone_core::{
    default_run_name, BurnCondition, OutputPaths, PipelineConfig, SsdPipeline, WindClass,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "safezone", about = "Wildfire safety separation distance (SSD / pSSD)")]
struct Cli {
    /// Log filter (e.g. "info", "safezone_core=debug"); defaults to RUST_LOG, then info
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// SSD raster over the whole vegetation extent
    Ssd(Common),
    /// pSSD, SSD-met map and safest point for a safety zone
    Ssde {
        /// Safety-zone polygon (GeoJSON)
        #[arg(long)]
        zone: PathBuf,

        /// Also write ssd.tif and segments.tif
        #[arg(long)]
        keep_intermediates: bool,

        /// Skip zero-SSD segments instead of failing
        #[arg(long)]
        ignore_degenerate: bool,

        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args, Debug)]
struct Common {
    /// Coded existing-vegetation-height raster (GeoTIFF)
    #[arg(long)]
    vegetation: PathBuf,

    /// Terrain elevation raster (GeoTIFF)
    #[arg(long)]
    terrain: PathBuf,

    /// "Light (0-10 mph)", "Moderate (11-20 mph)", "High (>20 mph)" or light/moderate/high
    #[arg(long)]
    wind: String,

    /// Low, Moderate or Extreme
    #[arg(long)]
    burn: String,

    /// Base directory for run outputs (created if absent)
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Run directory name; defaults to <variant>-<unix seconds>
    #[arg(long)]
    run_name: Option<String>,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (overrides the config file)
    #[arg(long)]
    threads: Option<usize>,

    /// Elevation-to-metre factor (overrides the config file)
    #[arg(long)]
    z_factor: Option<f64>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::try_new(l).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(common: &Common) -> Result<PipelineConfig> {
    let mut cfg = match &common.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if common.threads.is_some() {
        cfg.threads = common.threads;
    }
    if let Some(z) = common.z_factor {
        cfg.z_factor = z;
    }
    Ok(cfg)
}

fn conditions(common: &Common) -> Result<(WindClass, BurnCondition)> {
    let wind = common.wind.parse::<WindClass>().context("Invalid --wind")?;
    let burn = common.burn.parse::<BurnCondition>().context("Invalid --burn")?;
    Ok((wind, burn))
}

fn output_paths(common: &Common, variant: &str) -> Result<OutputPaths> {
    let name = common
        .run_name
        .clone()
        .unwrap_or_else(|| default_run_name(variant));
    Ok(OutputPaths::for_run(&common.output_dir, &name)?)
}

fn read_input(path: &Path, what: &str) -> Result<safezone_core::Raster> {
    read_raster(path).with_context(|| format!("Cannot read {what} raster {}", path.display()))
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn run_ssd(common: &Common) -> Result<()> {
    let cfg = load_config(common)?;
    let (wind, burn) = conditions(common)?;
    let paths = output_paths(common, "ssd")?;

    let veg = read_input(&common.vegetation, "vegetation height")?;
    let dtm = read_input(&common.terrain, "terrain")?;

    let pipeline = SsdPipeline::new(cfg)?;
    let products = pipeline.run_ssd(&veg, &dtm, wind, burn)?;
    let run_dir = products.publish(paths).context("Failed to publish outputs")?;
    info!(run_dir = %run_dir.display(), "SSD written");

    let summary = json!({
        "run_dir": run_dir,
        "crs": products.context.crs.to_string(),
        "max_ssd_m": products.ssd.max_value(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_ssde(zone: &Path, keep_intermediates: bool, ignore_degenerate: bool, common: &Common) -> Result<()> {
    let mut cfg = load_config(common)?;
    if keep_intermediates {
        cfg.keep_intermediates = true;
    }
    if ignore_degenerate {
        cfg.degenerate_segments = safezone_core::pssd::DegenerateSegmentPolicy::Ignore;
    }
    let (wind, burn) = conditions(common)?;
    let paths = output_paths(common, "ssde")?;

    let zone = read_zone(zone).with_context(|| format!("Cannot read safety zone {}", zone.display()))?;
    let veg = read_input(&common.vegetation, "vegetation height")?;
    let dtm = read_input(&common.terrain, "terrain")?;

    let pipeline = SsdPipeline::new(cfg)?;
    let p = pipeline.run_ssde(&zone, &veg, &dtm, wind, burn)?;
    let run_dir = p
        .publish(paths, pipeline.config().keep_intermediates)
        .context("Failed to publish outputs")?;
    info!(run_dir = %run_dir.display(), "pSSD written");

    let summary = json!({
        "run_dir": run_dir,
        "crs": p.context.crs.to_string(),
        "max_ssd_m": p.donuts.max_ssd,
        "shrink_radius_m": p.donuts.shrink_donut.distance_m,
        "segments": p.segment_count,
        "skipped_segments": p.skipped_segments,
        "safest_point": p.safest_point,
        "ssd_met_anywhere": p.safest_point.value > 1.0,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match &cli.command {
        Command::Ssd(common) => run_ssd(common),
        Command::Ssde { zone, keep_intermediates, ignore_degenerate, common } => {
            run_ssde(zone, *keep_intermediates, *ignore_degenerate, common)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssde_arguments_parse() {
        let cli = Cli::try_parse_from([
            "safezone",
            "ssde",
            "--zone", "zone.geojson",
            "--vegetation", "evh.tif",
            "--terrain", "dtm.tif",
            "--wind", "High (>20 mph)",
            "--burn", "Extreme",
            "--threads", "4",
        ])
        .unwrap();
        let Command::Ssde { zone, common, keep_intermediates, .. } = cli.command else {
            panic!("expected ssde");
        };
        assert_eq!(zone, PathBuf::from("zone.geojson"));
        assert!(!keep_intermediates);
        assert_eq!(common.output_dir, PathBuf::from("output"));
        let (wind, burn) = conditions(&common).unwrap();
        assert_eq!((wind, burn), (WindClass::High, BurnCondition::Extreme));
        assert_eq!(load_config(&common).unwrap().threads, Some(4));
    }

    #[test]
    fn unknown_wind_is_reported() {
        let cli = Cli::try_parse_from([
            "safezone", "ssd", "--vegetation", "a.tif", "--terrain", "b.tif", "--wind", "Gale", "--burn", "Low",
        ])
        .unwrap();
        let Command::Ssd(common) = cli.command else {
            panic!("expected ssd");
        };
        assert!(conditions(&common).is_err());
    }
}
