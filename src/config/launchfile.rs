//! Launch file (`Berthfile.toml`) schema and defaults

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::runtime::RuntimeRef;
use crate::error::{BerthError, Result};

/// Default port a Streamlit server listens on
pub const DEFAULT_PORT: u16 = 8501;
/// Default bind address for the foreground process
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
/// Streamlit's liveness endpoint
pub const DEFAULT_HEALTH_PATH: &str = "/_stcore/health";

/// Text written by `berth init`
pub const DEFAULT_LAUNCH_FILE: &str = r#"# Berth launch file

[image]
base = "python:3.12-slim"
system_packages = []
system_install = []

[image.env]

[dependencies]
manifest = "pyproject.toml"
lock = "uv.lock"
# Runs inside the image after the lock check, e.g. ["uv", "sync", "--locked", "--no-dev"]
install = []

[source]
path = "."
ignore = []

[network]
port = 8501
address = "0.0.0.0"

[healthcheck]
enabled = true
path = "/_stcore/health"
interval_secs = 30
timeout_secs = 30
start_period_secs = 0
retries = 3

[entrypoint]
command = ["streamlit", "run", "streamlit_app.py", "--server.port={port}", "--server.address={address}"]
"#;

/// Root of the launch file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchFile {
    pub image: ImageSection,
    pub dependencies: DependencySection,
    pub source: SourceSection,
    pub network: NetworkSection,
    pub healthcheck: HealthcheckSection,
    pub entrypoint: EntrypointSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSection {
    /// Pinned base runtime, e.g. `python:3.12-slim`
    pub base: String,
    /// OS packages the image needs
    pub system_packages: Vec<String>,
    /// Installer invoked with the package list appended. Empty records the packages only.
    pub system_install: Vec<String>,
    /// Environment for build commands and the foreground process
    pub env: BTreeMap<String, String>,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            base: "python:3.12-slim".to_string(),
            system_packages: Vec::new(),
            system_install: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencySection {
    pub manifest: PathBuf,
    pub lock: PathBuf,
    pub install: Vec<String>,
}

impl Default for DependencySection {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("pyproject.toml"),
            lock: PathBuf::from("uv.lock"),
            install: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    pub path: PathBuf,
    /// Glob patterns, relative to the source root, that are not copied
    pub ignore: Vec<String>,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    pub port: u16,
    pub address: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthcheckSection {
    pub enabled: bool,
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: u32,
}

impl Default for HealthcheckSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: DEFAULT_HEALTH_PATH.to_string(),
            interval_secs: 30,
            timeout_secs: 30,
            start_period_secs: 0,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntrypointSection {
    /// Program and arguments; `{address}` and `{port}` are substituted at start
    pub command: Vec<String>,
}

impl Default for EntrypointSection {
    fn default() -> Self {
        Self {
            command: vec![
                "streamlit".to_string(),
                "run".to_string(),
                "streamlit_app.py".to_string(),
                "--server.port={port}".to_string(),
                "--server.address={address}".to_string(),
            ],
        }
    }
}

impl LaunchFile {
    /// Parse launch file text
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Check the invariants a build relies on
    pub fn validate(&self) -> Result<RuntimeRef> {
        let runtime = RuntimeRef::parse_pinned(&self.image.base)?;

        if self.network.port == 0 {
            return Err(BerthError::ConfigError("network.port must be non-zero".to_string()));
        }
        if self.network.address.trim().is_empty() {
            return Err(BerthError::ConfigError("network.address must not be empty".to_string()));
        }
        if self.entrypoint.command.is_empty() || self.entrypoint.command[0].trim().is_empty() {
            return Err(BerthError::ConfigError("entrypoint.command must name a program".to_string()));
        }
        if !self.system_packages_valid() {
            return Err(BerthError::ConfigError(
                "image.system_packages entries must be non-empty and contain no whitespace".to_string(),
            ));
        }

        let health = &self.healthcheck;
        if !health.path.starts_with('/') {
            return Err(BerthError::ConfigError(format!(
                "healthcheck.path '{}' must start with '/'",
                health.path
            )));
        }
        if health.interval_secs == 0 || health.timeout_secs == 0 {
            return Err(BerthError::ConfigError(
                "healthcheck.interval_secs and healthcheck.timeout_secs must be positive".to_string(),
            ));
        }
        if health.retries == 0 {
            return Err(BerthError::ConfigError("healthcheck.retries must be at least 1".to_string()));
        }

        for pattern in &self.source.ignore {
            glob::Pattern::new(pattern).map_err(|e| {
                BerthError::ConfigError(format!("source.ignore pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(runtime)
    }

    fn system_packages_valid(&self) -> bool {
        self.image
            .system_packages
            .iter()
            .all(|p| !p.is_empty() && !p.chars().any(char::is_whitespace))
    }
}
