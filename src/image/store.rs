//! On-disk image store
//!
//! Layout under the store root:
//! - `images/<digest>/image.json` and `images/<digest>/rootfs/`
//! - `tags/<tag>` holding a digest
//! - `tmp/` for build staging, on the same filesystem as `images/`

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::spec::ImageSpec;
use crate::error::{BerthError, Result};

/// Record file name inside an image directory
pub const RECORD_FILE: &str = "image.json";
/// Filesystem root inside an image directory
pub const ROOTFS_DIR: &str = "rootfs";

/// Digest prefixes shorter than this are never resolved
const MIN_PREFIX_LEN: usize = 4;

/// A committed image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub digest: String,
    pub spec: ImageSpec,
    /// Not part of the digest
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl ImageRecord {
    pub fn short_id(&self) -> &str {
        short_digest(&self.digest)
    }
}

/// Image listing entry
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub digest: String,
    pub tags: Vec<String>,
    pub runtime: Option<String>,
    pub port: Option<u16>,
    pub files: usize,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

pub fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("tag pattern is valid"))
}

pub fn validate_tag(tag: &str) -> Result<()> {
    if tag_regex().is_match(tag) {
        Ok(())
    } else {
        Err(BerthError::InvalidTag(tag.to_string()))
    }
}

/// Write through a sibling temp file and rename, so readers never see partial content
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp, data)?;
    tmp.persist(path).map_err(|e| BerthError::IoError(e.error))?;
    Ok(())
}

/// Images and tags under a store root
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.root.join("tags")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn image_dir(&self, digest: &str) -> PathBuf {
        self.images_dir().join(digest)
    }

    pub fn rootfs(&self, digest: &str) -> PathBuf {
        self.image_dir(digest).join(ROOTFS_DIR)
    }

    /// Create the store directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.tags_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.image_dir(digest).join(RECORD_FILE).is_file()
    }

    pub fn load(&self, digest: &str) -> Result<ImageRecord> {
        let path = self.image_dir(digest).join(RECORD_FILE);
        if !path.is_file() {
            return Err(BerthError::ImageNotFound(digest.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Point `tag` at `digest`
    pub fn tag(&self, tag: &str, digest: &str) -> Result<()> {
        validate_tag(tag)?;
        if !self.contains(digest) {
            return Err(BerthError::ImageNotFound(digest.to_string()));
        }
        write_atomic(&self.tags_dir().join(tag), format!("{}\n", digest).as_bytes())
    }

    fn read_tag(&self, tag: &str) -> Result<Option<String>> {
        if validate_tag(tag).is_err() {
            return Ok(None);
        }
        let path = self.tags_dir().join(tag);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?.trim().to_string()))
    }

    /// Tags currently pointing at `digest`
    pub fn tags_for(&self, digest: &str) -> Result<Vec<String>> {
        let dir = self.tags_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut tags = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.read_tag(&name)?.as_deref() == Some(digest) {
                tags.push(name);
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn digests(&self) -> Result<Vec<String>> {
        let dir = self.images_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut digests = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if self.contains(name) {
                    digests.push(name.to_string());
                }
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Resolve a tag, full digest, or unique digest prefix
    pub fn resolve(&self, reference: &str) -> Result<ImageRecord> {
        if let Some(digest) = self.read_tag(reference)? {
            return self.load(&digest);
        }

        let prefix = reference.strip_prefix("sha256:").unwrap_or(reference);
        let is_hex = !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_hexdigit());
        if !is_hex || prefix.len() < MIN_PREFIX_LEN {
            return Err(BerthError::ImageNotFound(reference.to_string()));
        }

        let prefix = prefix.to_ascii_lowercase();
        let matches: Vec<String> = self
            .digests()?
            .into_iter()
            .filter(|d| d.starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [digest] => self.load(digest),
            [] => Err(BerthError::ImageNotFound(reference.to_string())),
            _ => Err(BerthError::AmbiguousImage(reference.to_string())),
        }
    }

    /// All images, newest first
    pub fn list(&self) -> Result<Vec<ImageSummary>> {
        let mut summaries = Vec::new();
        for digest in self.digests()? {
            let record = self.load(&digest)?;
            summaries.push(ImageSummary {
                tags: self.tags_for(&digest)?,
                runtime: record.spec.runtime().map(str::to_string),
                port: record.spec.port(),
                files: record.spec.files().len(),
                size_bytes: record.size_bytes,
                created_at: record.created_at,
                digest,
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
