//! Model downloading and loading utilities.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ort::session::Session;

use crate::error::{Error, Result};

use super::Device;

/// Background segmentation networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentationModel {
    /// U²-Net, general purpose, 320x320 input.
    #[default]
    U2Net,
    /// `IS-Net` general use, 1024x1024 input. Sharper edges, slower.
    IsNet,
}

impl SegmentationModel {
    /// Get the filename for this model.
    #[must_use]
    pub const fn filename(&self) -> &'static str {
        match self {
            Self::U2Net => "u2net.onnx",
            Self::IsNet => "isnet-general-use.onnx",
        }
    }

    /// Get the download URL for this model.
    /// Using the ONNX exports published with rembg.
    #[must_use]
    pub const fn url(&self) -> &'static str {
        match self {
            Self::U2Net => "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx",
            Self::IsNet => {
                "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx"
            }
        }
    }

    /// Get the approximate size in bytes for progress indication.
    #[must_use]
    pub const fn approx_size(&self) -> u64 {
        match self {
            Self::U2Net => 176_000_000,  // ~176 MB
            Self::IsNet => 179_000_000, // ~179 MB
        }
    }

    /// Square input resolution the network expects.
    #[must_use]
    pub const fn input_size(&self) -> u32 {
        match self {
            Self::U2Net => 320,
            Self::IsNet => 1024,
        }
    }

    /// Per-channel normalization mean.
    #[must_use]
    pub const fn mean(&self) -> [f32; 3] {
        match self {
            Self::U2Net => [0.485, 0.456, 0.406],
            Self::IsNet => [0.5, 0.5, 0.5],
        }
    }

    /// Per-channel normalization standard deviation.
    #[must_use]
    pub const fn std(&self) -> [f32; 3] {
        match self {
            Self::U2Net => [0.229, 0.224, 0.225],
            Self::IsNet => [1.0, 1.0, 1.0],
        }
    }
}

impl std::str::FromStr for SegmentationModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u2net" => Ok(Self::U2Net),
            "isnet" | "isnet-general-use" => Ok(Self::IsNet),
            _ => Err(Error::invalid_parameter(
                "segmentation",
                "must be one of u2net, isnet",
            )),
        }
    }
}

/// Manages the model cache directory and downloads.
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache.
    ///
    /// Uses `dir` when given, otherwise the platform-appropriate cache directory:
    /// - Windows: `%LOCALAPPDATA%\snapscape\models`
    /// - Linux: `~/.cache/snapscape/models`
    /// - macOS: `~/Library/Caches/snapscape/models`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = dir.unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("snapscape")
                .join("models")
        });

        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self { cache_dir })
    }

    /// The directory models are stored in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the path to a model file, downloading if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or accessed.
    pub fn get_model_path(&self, model: SegmentationModel) -> Result<PathBuf> {
        let path = self.cache_dir.join(model.filename());

        if !path.exists() {
            download_file(model.url(), &path, model.filename(), model.approx_size())?;
        }

        Ok(path)
    }

    /// Load an ONNX session for a segmentation model.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or loaded.
    pub fn load_session(&self, model: SegmentationModel, device: Device) -> Result<Session> {
        let path = self.get_model_path(model)?;
        create_session(&path, model.filename(), device)
    }
}

/// A local directory holding an exported multi-part model.
#[derive(Debug, Clone)]
pub struct ModelDir {
    root: PathBuf,
}

impl ModelDir {
    /// Open `root` as a model directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if `root` is not a directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::PipelineInit {
                name: root.display().to_string(),
                reason: "model directory does not exist".to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a required file inside the directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if the file is missing.
    pub fn file(&self, relative: &str) -> Result<PathBuf> {
        let path = self.root.join(relative);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::PipelineInit {
                name: self.root.display().to_string(),
                reason: format!("missing {relative}"),
            })
        }
    }

    /// Load the ONNX session stored at `relative`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if the file is missing or cannot be loaded.
    pub fn session(&self, relative: &str, device: Device) -> Result<Session> {
        let path = self.file(relative)?;
        tracing::info!("Loading {relative}...");
        create_session(&path, relative, device).map_err(|err| Error::PipelineInit {
            name: self.root.display().to_string(),
            reason: err.to_string(),
        })
    }
}

/// Build a session for the model at `path` on `device`.
fn create_session(path: &Path, name: &str, device: Device) -> Result<Session> {
    let builder = Session::builder().map_err(|source| Error::ModelLoad {
        name: name.to_string(),
        source,
    })?;

    device
        .configure(builder, name)?
        .commit_from_file(path)
        .map_err(|source| Error::ModelLoad {
            name: name.to_string(),
            source,
        })
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    // Write to a temporary file first, then rename for atomicity
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;

    let mut downloaded = 0u64;
    let mut reader = response;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = std::io::Read::read(&mut reader, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;

    pb.finish_with_message(format!("Downloaded {name}"));

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_metadata() {
        assert_eq!(SegmentationModel::U2Net.input_size(), 320);
        assert_eq!(SegmentationModel::IsNet.input_size(), 1024);
        assert!(SegmentationModel::IsNet.url().ends_with(SegmentationModel::IsNet.filename()));
        assert_eq!("isnet".parse::<SegmentationModel>().unwrap(), SegmentationModel::IsNet);
    }

    #[test]
    fn test_cache_dir_override_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("models");

        let cache = ModelCache::new(Some(dir.clone())).unwrap();
        assert_eq!(cache.dir(), dir.as_path());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_model_dir_reports_missing_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ModelDir::open(tmp.path()).unwrap();

        let err = dir.file("unet/model.onnx").unwrap_err();
        assert!(matches!(err, Error::PipelineInit { .. }));
        assert!(err.to_string().contains("unet/model.onnx"));

        assert!(matches!(
            ModelDir::open(tmp.path().join("absent")).unwrap_err(),
            Error::PipelineInit { .. }
        ));
    }
}
