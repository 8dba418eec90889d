//! Launch file loading
//!
//! A project is a launch file plus the directory it lives in. Every path in
//! the launch file is resolved against that directory.

mod launchfile;
mod runtime;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BerthError, Result};

pub use launchfile::{
    DependencySection, EntrypointSection, HealthcheckSection, ImageSection, LaunchFile,
    NetworkSection, SourceSection, DEFAULT_ADDRESS, DEFAULT_HEALTH_PATH, DEFAULT_LAUNCH_FILE,
    DEFAULT_PORT,
};
pub use runtime::RuntimeRef;

/// Default launch file name
pub const LAUNCH_FILE_NAME: &str = "Berthfile.toml";
/// Default store directory, relative to the working directory
pub const DEFAULT_STORE_DIR: &str = ".berth";

/// A loaded and validated launch file
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory containing the launch file
    pub root: PathBuf,
    /// Path of the launch file itself
    pub path: PathBuf,
    pub launch: LaunchFile,
    pub runtime: RuntimeRef,
}

impl Project {
    /// Load and validate a launch file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BerthError::LaunchFileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let launch = LaunchFile::from_toml(&text).map_err(|e| BerthError::parse(path, e))?;
        let runtime = launch.validate()?;

        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!(path = %path.display(), runtime = %runtime, "loaded launch file");

        Ok(Self {
            root,
            path: path.to_path_buf(),
            launch,
            runtime,
        })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.launch.dependencies.manifest)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.launch.dependencies.lock)
    }

    pub fn source_path(&self) -> PathBuf {
        self.root.join(&self.launch.source.path)
    }
}

/// Write the default launch file, refusing to clobber an existing one unless forced
pub fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(BerthError::LaunchFileExists(path.to_path_buf()));
    }
    fs::write(path, DEFAULT_LAUNCH_FILE)?;
    Ok(())
}
