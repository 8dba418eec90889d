//! Lock file (`uv.lock`)

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::requirement::normalize_name;
use crate::error::{BerthError, Result};

/// Lock format versions this reader understands
const SUPPORTED_LOCK_VERSIONS: &[u32] = &[1];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockFile {
    pub version: Option<u32>,
    pub requires_python: Option<String>,
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: Option<String>,
    pub source: Option<toml::Table>,
    pub metadata: Option<PackageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageMetadata {
    #[serde(default)]
    pub requires_dist: Vec<RequiresDist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiresDist {
    pub name: String,
    #[serde(default)]
    pub extras: Vec<String>,
    pub specifier: Option<String>,
    pub marker: Option<String>,
}

impl LockedPackage {
    /// Packages built from the project tree itself rather than a registry
    pub fn is_local(&self) -> bool {
        self.source.as_ref().is_some_and(|source| {
            ["virtual", "editable", "directory", "path"]
                .iter()
                .any(|key| source.contains_key(*key))
        })
    }
}

impl LockFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BerthError::LockMissing(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| match e {
            BerthError::ParseError { message, .. } => BerthError::parse(path, message),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let lock: LockFile = toml::from_str(text).map_err(|e| BerthError::parse("uv.lock", e))?;
        if let Some(version) = lock.version {
            if !SUPPORTED_LOCK_VERSIONS.contains(&version) {
                return Err(BerthError::parse(
                    "uv.lock",
                    format!("unsupported lock version {}", version),
                ));
            }
        }
        Ok(lock)
    }

    /// Locked entries for a normalized package name
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LockedPackage> + 'a {
        self.packages
            .iter()
            .filter(move |p| normalize_name(&p.name) == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"
version = 1
requires-python = ">=3.12"

[[package]]
name = "requests"
version = "2.32.3"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "whatsmyip"
version = "0.1.0"
source = { virtual = "." }
dependencies = [{ name = "requests" }]

[package.metadata]
requires-dist = [
    { name = "requests", specifier = ">=2.31" },
    { name = "requests", extras = ["socks"], marker = "sys_platform == 'linux'" },
]
"#;

    #[test]
    fn test_parse_lock() {
        let lock = LockFile::parse(LOCK).unwrap();
        assert_eq!(lock.packages.len(), 2);
        assert_eq!(lock.requires_python.as_deref(), Some(">=3.12"));

        let root = lock.find("whatsmyip").next().unwrap();
        assert!(root.is_local());
        let metadata = root.metadata.as_ref().unwrap();
        assert_eq!(metadata.requires_dist[0].specifier.as_deref(), Some(">=2.31"));
        assert!(metadata.requires_dist[0].extras.is_empty());
        assert_eq!(metadata.requires_dist[1].extras, vec!["socks"]);
        assert_eq!(metadata.requires_dist[1].marker.as_deref(), Some("sys_platform == 'linux'"));

        let requests = lock.find("requests").next().unwrap();
        assert!(!requests.is_local());
    }

    #[test]
    fn test_unsupported_version() {
        let result = LockFile::parse("version = 99\n");
        assert!(matches!(result, Err(BerthError::ParseError { .. })));
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = LockFile::load(&dir.path().join("uv.lock"));
        assert!(matches!(result, Err(BerthError::LockMissing(_))));
    }
}
