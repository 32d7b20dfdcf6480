//! Safety Separation Distance (SSD) and potential SSD (pSSD) for wildfire
//! safety zones.
//!
//! [`pipeline::SsdPipeline`] runs the whole computation; the modules below
//! are its stages, usable on their own.

pub mod buffer;
pub mod compliance;
pub mod conditions;
pub mod config;
pub mod crs;
pub mod error;
pub mod harmonize;
pub mod io;
pub mod outputs;
pub mod pipeline;
pub mod pssd;
pub mod raster;
pub mod segment;
pub mod slope;
pub mod ssd;
pub mod vegetation;
pub mod zone;

pub use conditions::{BurnCondition, MultiplierTable, WindClass};
pub use config::PipelineConfig;
pub use crs::Crs;
pub use error::{Result, SsdError};
pub use outputs::{default_run_name, OutputPaths};
pub use pipeline::{RunContext, SsdPipeline, SsdProducts, SsdeProducts};
pub use raster::{CellKind, Extent, Raster};
pub use zone::SafetyZone;
