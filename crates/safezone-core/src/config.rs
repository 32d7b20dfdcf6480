//! Run configuration, loaded from JSON. Every field has a default, so `{}`
//! is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::MAX_SSD_RADIUS_M;
use crate::conditions::{MultiplierEntry, MultiplierTable};
use crate::error::{Result, SsdError};
use crate::pssd::DegenerateSegmentPolicy;
use crate::segment::SegmentParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Converts terrain elevation units into metres. 1.0 for metric DTMs,
    /// 0.3048 for elevations in feet.
    pub z_factor: f64,
    /// Radius of the maximal buffer, metres.
    pub max_radius_m: f64,
    pub segmentation: SegmentParams,
    pub degenerate_segments: DegenerateSegmentPolicy,
    /// Worker threads; None = one per core.
    pub threads: Option<usize>,
    /// Also publish the SSD and segment rasters of an extended run.
    pub keep_intermediates: bool,
    /// Replaces the built-in multiplier table. Must list all 9 rows.
    pub multipliers: Option<Vec<MultiplierEntry>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            z_factor: 1.0,
            max_radius_m: MAX_SSD_RADIUS_M,
            segmentation: SegmentParams::default(),
            degenerate_segments: DegenerateSegmentPolicy::Fail,
            threads: None,
            keep_intermediates: false,
            multipliers: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: PipelineConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.z_factor.is_finite() && self.z_factor > 0.0) {
            return Err(SsdError::InvalidInput(format!("z_factor must be positive, got {}", self.z_factor)));
        }
        if !(self.max_radius_m.is_finite() && self.max_radius_m > 0.0) {
            return Err(SsdError::InvalidInput(format!(
                "max_radius_m must be positive, got {}",
                self.max_radius_m
            )));
        }
        if self.threads == Some(0) {
            return Err(SsdError::InvalidInput("threads must be at least 1".into()));
        }
        self.segmentation.validate()?;
        self.multiplier_table().map(|_| ())
    }

    /// The configured multiplier table, or the standard one.
    pub fn multiplier_table(&self) -> Result<MultiplierTable> {
        match &self.multipliers {
            Some(entries) => MultiplierTable::from_entries(entries),
            None => Ok(MultiplierTable::standard()),
        }
    }
}
