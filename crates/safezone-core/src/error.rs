//! Error type shared by every pipeline stage.

use thiserror::Error;

/// Failures raised by the SSD / pSSD pipeline.
///
/// Structural and input errors are fatal: the run aborts and nothing is
/// published. `TransientIo` is only ever logged by the caller that owns the
/// scratch workspace.
#[derive(Debug, Error)]
pub enum SsdError {
    #[error("no determinable coordinate reference system for {0}")]
    CoordinateResolution(String),

    #[error("processing capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("unknown wind/burn condition: {0}")]
    UnknownCondition(String),

    #[error("safety zone is not fully covered by the {raster} raster")]
    ExtentCoverage { raster: &'static str },

    #[error("segment {segment} has a zero or undefined mean SSD")]
    DegenerateSegment { segment: u32 },

    #[error("no fuel segment with a positive SSD surrounds the safety zone")]
    NoSegments,

    #[error("safety zone does not contain any raster cell centre")]
    EmptyZone,

    #[error("raster grids are not aligned: {0}")]
    GridMismatch(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("output already exists: {0}")]
    OutputExists(String),

    #[error("scratch workspace I/O failed: {0}")]
    TransientIo(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("coordinate transformation failed: {0}")]
    Projection(#[from] proj4rs::errors::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SsdError>;
