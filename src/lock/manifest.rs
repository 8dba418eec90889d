//! Dependency manifest (`pyproject.toml`)

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::requirement::{normalize_name, Requirement};
use super::version::SpecifierSet;
use crate::error::{BerthError, Result};

#[derive(Debug, Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProjectTable {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    requires_python: Option<String>,
}

/// Declared dependencies of the application
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Normalized project name
    pub name: String,
    pub requires_python: Option<SpecifierSet>,
    pub requirements: Vec<Requirement>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BerthError::ManifestMissing(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| match e {
            BerthError::ParseError { message, .. } => BerthError::parse(path, message),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let doc: PyProject = toml::from_str(text).map_err(|e| BerthError::parse("pyproject.toml", e))?;
        let project = doc
            .project
            .ok_or_else(|| BerthError::parse("pyproject.toml", "missing [project] table"))?;

        let requires_python = project
            .requires_python
            .as_deref()
            .map(SpecifierSet::parse)
            .transpose()?;

        let requirements = project
            .dependencies
            .iter()
            .map(|d| Requirement::parse(d))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: normalize_name(&project.name),
            requires_python,
            requirements,
        })
    }
}
