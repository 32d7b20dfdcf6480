//! Output naming and publication.
//!
//! A run writes every product into a scratch directory inside the output
//! directory and only moves them into the run directory once all writes have
//! succeeded, so a failed run leaves nothing behind but (at worst) scratch.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::compliance::SafestPoint;
use crate::crs::Crs;
use crate::error::{Result, SsdError};
use crate::io::{write_raster, write_safest_point};
use crate::raster::Raster;

pub const PSSD_FILE: &str = "pSSD.tif";
pub const SSD_MET_FILE: &str = "SSD_met.tif";
pub const SAFEST_POINT_FILE: &str = "safest_point.geojson";
pub const SSD_FILE: &str = "ssd.tif";
pub const SEGMENTS_FILE: &str = "segments.tif";

/// `<prefix>-<unix seconds>`.
pub fn default_run_name(prefix: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("{prefix}-{secs}")
}

/// Where one run's products go. Named once; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub output_dir: PathBuf,
    pub run_dir: PathBuf,
}

impl OutputPaths {
    /// Fails with `OutputExists` if the run directory is already there.
    pub fn for_run(output_dir: &Path, run_name: &str) -> Result<Self> {
        if run_name.is_empty() || run_name.contains(['/', '\\']) || run_name == "." || run_name == ".." {
            return Err(SsdError::InvalidInput(format!("bad run name '{run_name}'")));
        }
        let run_dir = output_dir.join(run_name);
        if run_dir.exists() {
            return Err(SsdError::OutputExists(run_dir.display().to_string()));
        }
        Ok(Self { output_dir: output_dir.to_path_buf(), run_dir })
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }
}

/// Scratch directory collecting one run's products.
pub struct Staging {
    dir: Option<TempDir>,
    paths: OutputPaths,
    files: Vec<String>,
}

impl Staging {
    pub fn begin(paths: OutputPaths) -> Result<Self> {
        fs::create_dir_all(&paths.output_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(".safezone-")
            .tempdir_in(&paths.output_dir)
            .map_err(SsdError::TransientIo)?;
        debug!(scratch = %dir.path().display(), "staging outputs");
        Ok(Self { dir: Some(dir), paths, files: Vec::new() })
    }

    fn scratch_path(&mut self, name: &str) -> Result<PathBuf> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| SsdError::TransientIo(io::Error::other("scratch directory already released")))?;
        self.files.push(name.to_string());
        Ok(dir.path().join(name))
    }

    pub fn raster(&mut self, name: &str, raster: &Raster) -> Result<()> {
        let path = self.scratch_path(name)?;
        write_raster(&path, raster)
    }

    pub fn safest_point(&mut self, name: &str, point: &SafestPoint, crs: &Crs) -> Result<()> {
        let path = self.scratch_path(name)?;
        write_safest_point(&path, point, crs)
    }

    /// Move every staged file into the run directory.
    pub fn publish(mut self) -> Result<PathBuf> {
        let dir = self
            .dir
            .take()
            .ok_or_else(|| SsdError::TransientIo(io::Error::other("scratch directory already released")))?;

        let published = match fs::create_dir(&self.paths.run_dir) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(SsdError::OutputExists(self.paths.run_dir.display().to_string()))
            }
            Err(e) => Err(e.into()),
            Ok(()) => self.move_files(dir.path()).inspect_err(|_| self.discard_run_dir()),
        };

        release(dir);
        published
    }

    fn move_files(&self, scratch: &Path) -> Result<PathBuf> {
        for name in &self.files {
            fs::rename(scratch.join(name), self.paths.file(name))?;
        }
        Ok(self.paths.run_dir.clone())
    }

    /// Remove a partially filled run directory. Failure is reported, never raised.
    fn discard_run_dir(&self) {
        let run_dir = &self.paths.run_dir;
        if let Err(e) = fs::remove_dir_all(run_dir) {
            warn!(run_dir = %run_dir.display(), error = %e, "could not remove partial run directory");
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            release(dir);
        }
    }
}

/// Remove scratch. Failure is reported, never raised.
fn release(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        let err = SsdError::TransientIo(e);
        warn!(scratch = %path.display(), error = %err, "could not remove scratch directory");
    }
}
