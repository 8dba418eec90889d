//! Source tree copying and content digests
//!
//! Traversal is sorted so the same tree always yields the same file list and
//! therefore the same image digest.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};

use super::spec::{FileEntry, ImageSpec};
use crate::error::{BerthError, Result};

/// Digest domain separator; bump when the hashed layout changes
const DIGEST_PREFIX: &[u8] = b"berth-image-v1\n";

/// Paths never copied into an image
pub const DEFAULT_IGNORES: &[&str] = &[".git", ".berth", "__pycache__", "*.pyc", ".venv", ".DS_Store"];

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Content digest of an image specification
pub fn image_digest(spec: &ImageSpec) -> Result<String> {
    let canonical = serde_json::to_vec(spec)?;
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_PREFIX);
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compiled ignore rules
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
    excluded: Vec<PathBuf>,
}

impl IgnoreRules {
    pub fn new(extra: &[String]) -> Result<Self> {
        let patterns = DEFAULT_IGNORES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().cloned())
            .map(|p| {
                Pattern::new(p.trim_end_matches('/')).map_err(|e| {
                    BerthError::ConfigError(format!("ignore pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            excluded: Vec::new(),
        })
    }

    /// Also skip an absolute path (the store, when it lives inside the source tree)
    pub fn exclude(mut self, path: &Path) -> Self {
        if let Ok(path) = path.canonicalize() {
            self.excluded.push(path);
        }
        self
    }

    fn is_ignored(&self, relative: &str, absolute: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let name = relative.rsplit('/').next().unwrap_or(relative);
        let pattern_hit = self.patterns.iter().any(|p| {
            p.matches_with(relative, options) || (!p.as_str().contains('/') && p.matches_with(name, options))
        });
        pattern_hit || self.excluded.iter().any(|e| absolute.starts_with(e))
    }
}

/// Copy `source` into `destination`, returning the sorted file list
pub fn copy_tree(source: &Path, destination: &Path, rules: &IgnoreRules) -> Result<Vec<FileEntry>> {
    if !source.is_dir() {
        return Err(BerthError::SourceNotFound(source.to_path_buf()));
    }
    let source = source.canonicalize()?;
    fs::create_dir_all(destination)?;

    let mut files = Vec::new();
    copy_dir(&source, destination, "", rules, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn copy_dir(
    dir: &Path,
    destination: &Path,
    prefix: &str,
    rules: &IgnoreRules,
    files: &mut Vec<FileEntry>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| {
            BerthError::build(
                "copy-sources",
                format!("non UTF-8 file name in {}", dir.display()),
            )
        })?;
        let relative = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        let source_path = entry.path();
        if rules.is_ignored(&relative, &source_path) {
            continue;
        }

        let target = destination.join(name);
        let metadata = fs::symlink_metadata(&source_path)?;
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(&source_path)?;
            let link = link.to_string_lossy().to_string();
            std::os::unix::fs::symlink(&link, &target)?;
            files.push(FileEntry {
                path: relative,
                sha256: sha256_hex(link.as_bytes()),
                size: 0,
                executable: false,
                link: Some(link),
            });
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir(&source_path, &target, &relative, rules, files)?;
        } else if file_type.is_file() {
            let data = fs::read(&source_path)?;
            fs::write(&target, &data)?;
            fs::set_permissions(&target, metadata.permissions())?;
            files.push(FileEntry {
                path: relative,
                sha256: sha256_hex(&data),
                size: data.len() as u64,
                executable: is_executable(&metadata),
                link: None,
            });
        }
    }
    Ok(())
}

fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

/// Recursive size of a directory in bytes
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|entry| match fs::symlink_metadata(entry.path()) {
            Ok(m) if m.is_dir() => dir_size(&entry.path()),
            Ok(m) if m.is_file() => m.len(),
            _ => 0,
        })
        .sum()
}
