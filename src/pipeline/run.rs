//! Run identity and the per-run output directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Suffix of the cut-out file name, after the source stem.
pub const NO_BACKGROUND_SUFFIX: &str = "_no_bg.png";

/// Intermediate canvas file name.
pub const CANVAS_FILE: &str = "canvas.png";

/// Intermediate mask file name.
pub const MASK_FILE: &str = "mask.png";

/// `<source stem>_<UTC %Y%m%d_%H%M%S>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    stem: String,
    id: String,
}

impl RunId {
    /// Derive the run id for `source` started at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `source` has no file stem.
    pub fn derive(source: &Path, at: DateTime<Utc>) -> Result<Self> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::invalid_input(format!("{} has no file name", source.display()))
            })?;

        let id = format!("{stem}_{}", at.format("%Y%m%d_%H%M%S"));
        Ok(Self { stem, id })
    }

    /// The source file stem.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// File name of the cut-out image for this run.
    #[must_use]
    pub fn no_background_file(&self) -> String {
        format!("{}{NO_BACKGROUND_SUFFIX}", self.stem)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Create `<results_dir>/<run id>` with parents. An existing directory is reused.
///
/// # Errors
///
/// Returns [`Error::DirectoryCreation`] if the directory cannot be created.
pub fn init_run_dir(results_dir: &Path, run_id: &RunId) -> Result<PathBuf> {
    let dir = results_dir.join(run_id.as_str());
    fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreation {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Everything one run wrote to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub run_id: RunId,
    /// The run directory.
    pub dir: PathBuf,
    /// `<stem>_no_bg.png`.
    pub no_background: PathBuf,
    /// `canvas.png`, when intermediates are kept.
    pub canvas: Option<PathBuf>,
    /// `mask.png`, when intermediates are kept.
    pub mask: Option<PathBuf>,
    /// `scene.jpg`.
    pub scene: PathBuf,
    /// `video.mp4`, when video generation is on.
    pub video: Option<PathBuf>,
}
