//! Locked dependency verification
//!
//! A build only proceeds when the lock file exists and pins a version for
//! every declared dependency that satisfies the manifest. The resulting
//! pinned set is recorded in the image.

mod lockfile;
mod manifest;
mod requirement;
mod version;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BerthError, Result};

pub use lockfile::{LockFile, LockedPackage};
pub use manifest::Manifest;
pub use requirement::{normalize_name, Requirement};
pub use version::{Operator, Specifier, SpecifierSet, Version};

/// A dependency pinned by the lock file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
}

/// Outcome of a successful lock check
#[derive(Debug, Clone)]
pub struct LockedSet {
    pub manifest: Manifest,
    /// Every registry package in the lock, sorted by name and version
    pub packages: Vec<PinnedPackage>,
}

/// Load the manifest and lock file and check that they agree
pub fn verify_files(manifest_path: &Path, lock_path: &Path) -> Result<LockedSet> {
    let manifest = Manifest::load(manifest_path)?;
    let lock = LockFile::load(lock_path)?;
    verify(manifest, &lock)
}

/// Check a parsed manifest against a parsed lock file
pub fn verify(manifest: Manifest, lock: &LockFile) -> Result<LockedSet> {
    let mut problems = Vec::new();

    if let (Some(declared), Some(locked)) = (&manifest.requires_python, &lock.requires_python) {
        match SpecifierSet::parse(locked) {
            Ok(locked) if locked.canonical() == declared.canonical() => {}
            Ok(locked) => problems.push(format!(
                "requires-python is '{}' in the manifest but '{}' in the lock",
                declared.canonical(),
                locked.canonical()
            )),
            Err(_) => problems.push(format!("lock has invalid requires-python '{}'", locked)),
        }
    }

    for req in &manifest.requirements {
        let candidates: Vec<&LockedPackage> = lock.find(&req.name).collect();
        if candidates.is_empty() {
            problems.push(format!("'{}' is declared but not locked", req.name));
            continue;
        }
        if req.url.is_some() {
            continue;
        }

        let satisfied = candidates.iter().any(|pkg| {
            pkg.version
                .as_deref()
                .and_then(|v| Version::parse(v).ok())
                .is_some_and(|v| req.specifier.matches(&v))
        });
        if !satisfied {
            let versions: Vec<&str> = candidates
                .iter()
                .filter_map(|p| p.version.as_deref())
                .collect();
            problems.push(format!(
                "locked {} {} does not satisfy '{}'",
                req.name,
                versions.join(", "),
                req
            ));
        }
    }

    if let Some(recorded) = recorded_requirements(&manifest, lock) {
        let mut declared: Vec<LockedRequirement> =
            manifest.requirements.iter().map(LockedRequirement::from).collect();
        declared.sort();
        if recorded != declared {
            let declared_names: BTreeSet<&str> = declared.iter().map(|r| r.name.as_str()).collect();
            let recorded_names: BTreeSet<&str> = recorded.iter().map(|r| r.name.as_str()).collect();
            for req in unmatched(&declared, &recorded) {
                if recorded_names.contains(req.name.as_str()) {
                    let locked: Vec<String> = recorded
                        .iter()
                        .filter(|r| r.name == req.name)
                        .map(|r| format!("'{}'", r))
                        .collect();
                    problems.push(format!(
                        "'{}' in the manifest was locked as {}",
                        req,
                        locked.join(" or ")
                    ));
                } else {
                    problems.push(format!("'{}' was added to the manifest after locking", req.name));
                }
            }
            for req in unmatched(&recorded, &declared) {
                if !declared_names.contains(req.name.as_str()) {
                    problems.push(format!("'{}' was removed from the manifest after locking", req.name));
                }
            }
        }
    }

    if !problems.is_empty() {
        return Err(BerthError::LockMismatch(problems.join("; ")));
    }

    let mut packages: Vec<PinnedPackage> = lock
        .packages
        .iter()
        .filter(|p| !p.is_local())
        .filter_map(|p| {
            p.version.as_ref().map(|version| PinnedPackage {
                name: normalize_name(&p.name),
                version: version.clone(),
            })
        })
        .collect();
    packages.sort();
    packages.dedup();

    debug!(declared = manifest.requirements.len(), pinned = packages.len(), "lock verified");
    Ok(LockedSet { manifest, packages })
}

/// A requirement reduced to what the lock records about it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LockedRequirement {
    name: String,
    extras: Vec<String>,
    specifier: String,
    marker: Option<String>,
}

impl From<&Requirement> for LockedRequirement {
    fn from(req: &Requirement) -> Self {
        Self {
            name: req.name.clone(),
            extras: req.extras.clone(),
            specifier: req.specifier.canonical(),
            marker: req.marker.as_deref().map(normalize_marker),
        }
    }
}

impl fmt::Display for LockedRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.specifier)?;
        if let Some(marker) = &self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}

/// Markers compare with quotes unified and whitespace outside literals removed
fn normalize_marker(marker: &str) -> String {
    let mut out = String::with_capacity(marker.len());
    let mut quoted = false;
    for c in marker.trim().chars() {
        match c {
            '"' | '\'' => {
                quoted = !quoted;
                out.push('\'');
            }
            c if c.is_whitespace() && !quoted => {
                // keep keywords like `and` apart from their operands
                if out.ends_with(|p: char| p.is_alphanumeric() || p == '_') {
                    out.push(' ');
                }
            }
            c => {
                if out.ends_with(' ') && !(c.is_alphanumeric() || c == '_') {
                    out.pop();
                }
                out.push(c);
            }
        }
    }
    out.trim_end().to_string()
}

/// Entries of `from` left over after pairing each with an equal entry of `against`
fn unmatched<'a>(
    from: &'a [LockedRequirement],
    against: &[LockedRequirement],
) -> Vec<&'a LockedRequirement> {
    let mut remaining: Vec<&LockedRequirement> = against.iter().collect();
    from.iter()
        .filter(|req| match remaining.iter().position(|r| r == req) {
            Some(i) => {
                remaining.swap_remove(i);
                false
            }
            None => true,
        })
        .collect()
}

/// The root project's dependency list as recorded when the lock was written,
/// sorted
fn recorded_requirements(manifest: &Manifest, lock: &LockFile) -> Option<Vec<LockedRequirement>> {
    let root = lock.find(&manifest.name).find(|p| p.metadata.is_some())?;
    let metadata = root.metadata.as_ref()?;
    let mut recorded: Vec<LockedRequirement> = metadata
        .requires_dist
        .iter()
        .map(|dist| {
            let specifier = match dist.specifier.as_deref() {
                Some(raw) => SpecifierSet::parse(raw)
                    .map(|set| set.canonical())
                    .unwrap_or_else(|_| raw.trim().to_string()),
                None => String::new(),
            };
            let mut extras: Vec<String> = dist.extras.iter().map(|e| normalize_name(e)).collect();
            extras.sort();
            LockedRequirement {
                name: normalize_name(&dist.name),
                extras,
                specifier,
                marker: dist.marker.as_deref().map(normalize_marker),
            }
        })
        .collect();
    recorded.sort();
    Some(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[project]
name = "whatsmyip"
version = "0.1.0"
requires-python = ">=3.12"
dependencies = ["streamlit>=1.40", "requests"]
"#;

    const LOCK: &str = r#"
version = 1
requires-python = ">=3.12"

[[package]]
name = "requests"
version = "2.32.3"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "streamlit"
version = "1.40.1"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "urllib3"
version = "2.2.3"
source = { registry = "https://pypi.org/simple" }

[[package]]
name = "whatsmyip"
version = "0.1.0"
source = { virtual = "." }

[package.metadata]
requires-dist = [
    { name = "requests" },
    { name = "streamlit", specifier = ">=1.40" },
]
"#;

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(text).unwrap()
    }

    fn lock(text: &str) -> LockFile {
        LockFile::parse(text).unwrap()
    }

    #[test]
    fn test_consistent_lock() {
        let set = verify(manifest(MANIFEST), &lock(LOCK)).unwrap();
        let names: Vec<&str> = set.packages.iter().map(|p| p.name.as_str()).collect();
        // transitive pins are kept; the project itself is not a dependency
        assert_eq!(names, vec!["requests", "streamlit", "urllib3"]);
    }

    #[test]
    fn test_declared_but_not_locked() {
        let text = MANIFEST.replace("\"requests\"]", "\"requests\", \"pandas\"]");
        let err = verify(manifest(&text), &lock(LOCK)).unwrap_err();
        match err {
            BerthError::LockMismatch(msg) => {
                assert!(msg.contains("'pandas' is declared but not locked"));
                assert!(msg.contains("added to the manifest after locking"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_locked_version_out_of_range() {
        let text = MANIFEST.replace("streamlit>=1.40", "streamlit>=1.41");
        let err = verify(manifest(&text), &lock(LOCK)).unwrap_err();
        assert!(matches!(err, BerthError::LockMismatch(ref m) if m.contains("does not satisfy")));
    }

    #[test]
    fn test_requires_python_drift() {
        let text = MANIFEST.replace(">=3.12", ">=3.11");
        let err = verify(manifest(&text), &lock(LOCK)).unwrap_err();
        assert!(matches!(err, BerthError::LockMismatch(ref m) if m.contains("requires-python")));
    }

    #[test]
    fn test_extras_drift() {
        let text = MANIFEST.replace("streamlit>=1.40", "streamlit[snowflake]>=1.40");
        let err = verify(manifest(&text), &lock(LOCK)).unwrap_err();
        assert!(
            matches!(err, BerthError::LockMismatch(ref m) if m.contains("'streamlit[snowflake]>=1.40' in the manifest was locked as 'streamlit>=1.40'")),
            "{err}"
        );
    }

    #[test]
    fn test_recorded_extras_match() {
        let text = MANIFEST.replace("streamlit>=1.40", "Streamlit[Snowflake] >= 1.40");
        let locked = LOCK.replace(
            r#"{ name = "streamlit", specifier = ">=1.40" }"#,
            r#"{ name = "streamlit", extras = ["snowflake"], specifier = ">=1.40" }"#,
        );
        assert!(verify(manifest(&text), &lock(&locked)).is_ok());
    }

    #[test]
    fn test_marker_drift() {
        let text = MANIFEST.replace("\"requests\"", "\"requests; sys_platform == 'win32'\"");
        let locked = LOCK.replace(
            r#"{ name = "requests" }"#,
            r#"{ name = "requests", marker = "sys_platform == 'linux'" }"#,
        );
        let err = verify(manifest(&text), &lock(&locked)).unwrap_err();
        assert!(matches!(err, BerthError::LockMismatch(ref m) if m.contains("sys_platform=='linux'")), "{err}");

        // spelling differences in the marker are not drift
        let text = MANIFEST.replace("\"requests\"", "\"requests ; sys_platform==\\\"linux\\\"\"");
        assert!(verify(manifest(&text), &lock(&locked)).is_ok());
    }

    #[test]
    fn test_duplicate_requirement_drift() {
        let text = MANIFEST.replace(
            "\"requests\"]",
            "\"requests; sys_platform == 'linux'\", \"requests>=2.0; sys_platform == 'win32'\"]",
        );
        let locked = LOCK.replace(
            r#"{ name = "requests" },"#,
            r#"{ name = "requests", marker = "sys_platform == 'linux'" },
    { name = "requests", marker = "sys_platform == 'win32'" },"#,
        );
        let err = verify(manifest(&text), &lock(&locked)).unwrap_err();
        assert!(matches!(err, BerthError::LockMismatch(ref m) if m.contains("'requests>=2.0 ; sys_platform=='win32''")), "{err}");
    }

    #[test]
    fn test_specifier_drift() {
        let text = MANIFEST.replace("\"requests\"", "\"requests>=2.0\"");
        let err = verify(manifest(&text), &lock(LOCK)).unwrap_err();
        assert!(matches!(err, BerthError::LockMismatch(ref m) if m.contains("locked as 'requests'")), "{err}");
    }

    #[test]
    fn test_normalize_marker() {
        assert_eq!(normalize_marker("sys_platform == 'linux'"), "sys_platform=='linux'");
        assert_eq!(normalize_marker(r#"sys_platform=="linux""#), "sys_platform=='linux'");
        assert_eq!(
            normalize_marker("python_version >= '3.9' and os_name != 'nt'"),
            normalize_marker("python_version>='3.9'  and  os_name!='nt'")
        );
    }

    #[test]
    fn test_lock_without_root_metadata() {
        let text = LOCK.split("[package.metadata]").next().unwrap().to_string();
        assert!(verify(manifest(MANIFEST), &lock(&text)).is_ok());
    }

    #[test]
    fn test_verify_files_missing_lock() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("pyproject.toml");
        std::fs::write(&manifest_path, MANIFEST).unwrap();
        let result = verify_files(&manifest_path, &dir.path().join("uv.lock"));
        assert!(matches!(result, Err(BerthError::LockMissing(_))));
    }
}
