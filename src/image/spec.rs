//! Image specification: the ordered build steps an image was produced from

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{HealthcheckSection, Project};
use crate::lock::PinnedPackage;

/// Directory inside the image root that holds the application
pub const APP_DIR: &str = "app";

/// A file copied into the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the application directory, `/`-separated
    pub path: String,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub executable: bool,
    /// Target of a symbolic link; `sha256` then hashes the target text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: u32,
}

impl From<&HealthcheckSection> for HealthcheckSpec {
    fn from(section: &HealthcheckSection) -> Self {
        Self {
            path: section.path.clone(),
            interval_secs: section.interval_secs,
            timeout_secs: section.timeout_secs,
            start_period_secs: section.start_period_secs,
            retries: section.retries,
        }
    }
}

/// One build step, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BuildStep {
    Base {
        runtime: String,
    },
    SystemPackages {
        packages: Vec<String>,
        installer: Vec<String>,
    },
    LockedInstall {
        manifest: String,
        lock: String,
        lock_sha256: String,
        installer: Vec<String>,
        packages: Vec<PinnedPackage>,
    },
    CopySources {
        destination: String,
        files: Vec<FileEntry>,
    },
    Expose {
        port: u16,
    },
    Healthcheck(HealthcheckSpec),
    Entrypoint {
        command: Vec<String>,
        address: String,
        env: BTreeMap<String, String>,
    },
}

impl BuildStep {
    pub fn name(&self) -> &'static str {
        match self {
            BuildStep::Base { .. } => "base",
            BuildStep::SystemPackages { .. } => "system-packages",
            BuildStep::LockedInstall { .. } => "locked-install",
            BuildStep::CopySources { .. } => "copy-sources",
            BuildStep::Expose { .. } => "expose",
            BuildStep::Healthcheck(_) => "healthcheck",
            BuildStep::Entrypoint { .. } => "entrypoint",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Base { runtime } => write!(f, "BASE {}", runtime),
            BuildStep::SystemPackages { packages, installer } => {
                if packages.is_empty() {
                    write!(f, "SYSTEM PACKAGES (none)")
                } else if installer.is_empty() {
                    write!(f, "SYSTEM PACKAGES {} (recorded)", packages.join(" "))
                } else {
                    write!(f, "SYSTEM PACKAGES {} via {}", packages.join(" "), installer.join(" "))
                }
            }
            BuildStep::LockedInstall {
                manifest,
                lock,
                installer,
                packages,
                ..
            } => {
                write!(f, "LOCKED INSTALL {} + {} ({} pinned)", manifest, lock, packages.len())?;
                if !installer.is_empty() {
                    write!(f, " via {}", installer.join(" "))?;
                }
                Ok(())
            }
            BuildStep::CopySources { destination, files } => {
                write!(f, "COPY SOURCES -> /{} ({} files)", destination, files.len())
            }
            BuildStep::Expose { port } => write!(f, "EXPOSE {}/tcp", port),
            BuildStep::Healthcheck(h) => write!(
                f,
                "HEALTHCHECK GET {} every {}s (timeout {}s, start period {}s, retries {})",
                h.path, h.interval_secs, h.timeout_secs, h.start_period_secs, h.retries
            ),
            BuildStep::Entrypoint { command, address, .. } => {
                write!(f, "ENTRYPOINT {} (bind {})", command.join(" "), address)
            }
        }
    }
}

/// Ordered build steps; immutable once an image is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub steps: Vec<BuildStep>,
}

impl ImageSpec {
    pub fn runtime(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| match s {
            BuildStep::Base { runtime } => Some(runtime.as_str()),
            _ => None,
        })
    }

    /// Declared port
    pub fn port(&self) -> Option<u16> {
        self.steps.iter().find_map(|s| match s {
            BuildStep::Expose { port } => Some(*port),
            _ => None,
        })
    }

    pub fn healthcheck(&self) -> Option<&HealthcheckSpec> {
        self.steps.iter().find_map(|s| match s {
            BuildStep::Healthcheck(h) => Some(h),
            _ => None,
        })
    }

    pub fn entrypoint(&self) -> Option<(&[String], &str, &BTreeMap<String, String>)> {
        self.steps.iter().find_map(|s| match s {
            BuildStep::Entrypoint { command, address, env } => {
                Some((command.as_slice(), address.as_str(), env))
            }
            _ => None,
        })
    }

    pub fn files(&self) -> &[FileEntry] {
        self.steps
            .iter()
            .find_map(|s| match s {
                BuildStep::CopySources { files, .. } => Some(files.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn packages(&self) -> &[PinnedPackage] {
        self.steps
            .iter()
            .find_map(|s| match s {
                BuildStep::LockedInstall { packages, .. } => Some(packages.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// Steps `build` would run for a project, before anything is read from disk
pub fn plan(project: &Project) -> Vec<BuildStep> {
    let launch = &project.launch;
    let mut steps = vec![
        BuildStep::Base {
            runtime: project.runtime.to_string(),
        },
        BuildStep::SystemPackages {
            packages: launch.image.system_packages.clone(),
            installer: launch.image.system_install.clone(),
        },
        BuildStep::LockedInstall {
            manifest: launch.dependencies.manifest.display().to_string(),
            lock: launch.dependencies.lock.display().to_string(),
            lock_sha256: String::new(),
            installer: launch.dependencies.install.clone(),
            packages: Vec::new(),
        },
        BuildStep::CopySources {
            destination: APP_DIR.to_string(),
            files: Vec::new(),
        },
        BuildStep::Expose {
            port: launch.network.port,
        },
    ];
    if launch.healthcheck.enabled {
        steps.push(BuildStep::Healthcheck(HealthcheckSpec::from(&launch.healthcheck)));
    }
    steps.push(BuildStep::Entrypoint {
        command: launch.entrypoint.command.clone(),
        address: launch.network.address.clone(),
        env: launch.image.env.clone(),
    });
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageSpec {
        ImageSpec {
            steps: vec![
                BuildStep::Base {
                    runtime: "python:3.12-slim".to_string(),
                },
                BuildStep::Expose { port: 8501 },
                BuildStep::Healthcheck(HealthcheckSpec::from(&HealthcheckSection::default())),
                BuildStep::Entrypoint {
                    command: vec!["streamlit".to_string(), "run".to_string()],
                    address: "0.0.0.0".to_string(),
                    env: BTreeMap::new(),
                },
            ],
        }
    }

    #[test]
    fn test_accessors() {
        let spec = sample();
        assert_eq!(spec.runtime(), Some("python:3.12-slim"));
        assert_eq!(spec.port(), Some(8501));
        assert_eq!(spec.healthcheck().map(|h| h.path.as_str()), Some("/_stcore/health"));
        assert!(spec.files().is_empty());
        let (command, address, _) = spec.entrypoint().unwrap();
        assert_eq!(command[0], "streamlit");
        assert_eq!(address, "0.0.0.0");
    }

    #[test]
    fn test_step_serialization_is_tagged() {
        let json = serde_json::to_value(BuildStep::Expose { port: 8501 }).unwrap();
        assert_eq!(json["step"], "expose");
        assert_eq!(json["port"], 8501);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(BuildStep::Expose { port: 8501 }.to_string(), "EXPOSE 8501/tcp");
        let step = BuildStep::SystemPackages {
            packages: vec!["curl".to_string()],
            installer: Vec::new(),
        };
        assert_eq!(step.to_string(), "SYSTEM PACKAGES curl (recorded)");
    }
}
