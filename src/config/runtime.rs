//! Base runtime references
//!
//! A base runtime is named like a container image reference: `name:tag` or
//! `name@sha256:<digest>`. Builds only accept pinned references.

use std::fmt;

use serde::Serialize;

use crate::error::{BerthError, Result};

/// A parsed, pinned base runtime reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeRef {
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl RuntimeRef {
    /// Parse a reference and reject anything that is not pinned
    pub fn parse_pinned(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BerthError::ConfigError("image.base must not be empty".to_string()));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (
                rest[..last_slash + i].to_string(),
                Some(rest[last_slash + i + 1..].to_string()),
            ),
            None => (rest.to_string(), None),
        };

        if name.is_empty() {
            return Err(BerthError::ConfigError(format!(
                "image.base '{}' has no image name",
                reference
            )));
        }

        let runtime = Self { name, tag, digest };
        if !runtime.is_pinned() {
            return Err(BerthError::UnpinnedRuntime(reference.to_string()));
        }
        Ok(runtime)
    }

    /// Pinned means a sha256 digest, or a tag that carries a version number
    pub fn is_pinned(&self) -> bool {
        if let Some(digest) = &self.digest {
            return digest
                .strip_prefix("sha256:")
                .map(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
                .unwrap_or(false);
        }
        match &self.tag {
            Some(tag) => tag != "latest" && tag.chars().any(|c| c.is_ascii_digit()),
            None => false,
        }
    }

    /// Short image name without registry or namespace (`python` for `docker.io/library/python`)
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Leading dotted version of the tag (`3.12` for `3.12-slim`)
    pub fn version(&self) -> Option<String> {
        let tag = self.tag.as_deref()?;
        let version: String = tag
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let version = version.trim_end_matches('.');
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }
}

impl fmt::Display for RuntimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
