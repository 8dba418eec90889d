//! Error types for Berth

use std::path::PathBuf;

use thiserror::Error;

/// Exit code when the launcher itself fails before the process starts
pub const EXIT_LAUNCHER_FAILED: i32 = 125;
/// Exit code when the entrypoint exists but cannot be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code when the entrypoint cannot be found
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Launch file not found: {}", .0.display())]
    LaunchFileNotFound(PathBuf),

    #[error("Launch file already exists: {} (use --force to overwrite)", .0.display())]
    LaunchFileExists(PathBuf),

    #[error("Base runtime '{0}' is not pinned. Use an explicit version tag (not 'latest') or a sha256 digest")]
    UnpinnedRuntime(String),

    #[error("Dependency manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Lock file not found: {}. Refusing to build without a locked dependency set", .0.display())]
    LockMissing(PathBuf),

    #[error("Lock file is inconsistent with the manifest: {0}")]
    LockMismatch(String),

    #[error("Parse error in {}: {message}", path.display())]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid requirement '{0}'")]
    InvalidRequirement(String),

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Build step '{step}' failed: {message}")]
    BuildFailed { step: String, message: String },

    #[error("Source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image reference '{0}' is ambiguous")]
    AmbiguousImage(String),

    #[error("Invalid tag '{0}'. Tags may contain letters, digits, '.', '_' and '-'")]
    InvalidTag(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Failed to start '{program}': {source}")]
    SpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Health probe error: {0}")]
    ProbeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BerthError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BerthError::SpawnError { source, .. } => spawn_exit_code(source),
            _ => 1,
        }
    }

    /// Exit code for `run`, where any failure before the process starts is
    /// the launcher's own
    pub fn launch_exit_code(&self) -> i32 {
        match self {
            BerthError::SpawnError { source, .. } => spawn_exit_code(source),
            _ => EXIT_LAUNCHER_FAILED,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        BerthError::ParseError {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn build(step: impl Into<String>, message: impl Into<String>) -> Self {
        BerthError::BuildFailed {
            step: step.into(),
            message: message.into(),
        }
    }
}

fn spawn_exit_code(source: &std::io::Error) -> i32 {
    match source.kind() {
        std::io::ErrorKind::NotFound => EXIT_NOT_FOUND,
        std::io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
        _ => EXIT_LAUNCHER_FAILED,
    }
}

pub type Result<T> = std::result::Result<T, BerthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_exit_codes() {
        let not_found = BerthError::SpawnError {
            program: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(not_found.exit_code(), EXIT_NOT_FOUND);

        let denied = BerthError::SpawnError {
            program: "app".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(denied.exit_code(), EXIT_NOT_EXECUTABLE);
    }

    #[test]
    fn test_build_errors_exit_one() {
        let err = BerthError::LockMissing(PathBuf::from("uv.lock"));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("uv.lock"));
    }

    #[test]
    fn test_launch_failures_exit_125() {
        let err = BerthError::ImageNotFound("whatsmyip".to_string());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.launch_exit_code(), EXIT_LAUNCHER_FAILED);

        let not_found = BerthError::SpawnError {
            program: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(not_found.launch_exit_code(), EXIT_NOT_FOUND);
    }
}
