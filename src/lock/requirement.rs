//! Dependency requirements (`name[extras] specifier ; marker`)

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::version::SpecifierSet;
use crate::error::{BerthError, Result};

/// A declared dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized distribution name
    pub name: String,
    pub extras: Vec<String>,
    pub specifier: SpecifierSet,
    /// Environment marker, kept verbatim
    pub marker: Option<String>,
    /// Direct reference (`name @ url`)
    pub url: Option<String>,
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(.*)$")
            .expect("requirement pattern is valid")
    })
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_.]+").expect("separator pattern is valid"))
}

/// Normalize a distribution name: lowercase, runs of `-_.` become `-`
pub fn normalize_name(name: &str) -> String {
    separator_regex()
        .replace_all(&name.trim().to_ascii_lowercase(), "-")
        .into_owned()
}

impl Requirement {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || BerthError::InvalidRequirement(input.to_string());

        let (body, marker) = match input.split_once(';') {
            Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
            None => (input.trim(), None),
        };
        let marker = marker.filter(|m| !m.is_empty());

        let (body, url) = match body.split_once('@') {
            Some((body, url)) if !url.trim().is_empty() => (body.trim(), Some(url.trim().to_string())),
            Some(_) => return Err(invalid()),
            None => (body, None),
        };

        let caps = name_regex().captures(body).ok_or_else(invalid)?;
        let name = normalize_name(&caps[1]);

        let mut extras: Vec<String> = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(normalize_name)
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        extras.sort();

        let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
        let rest = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .unwrap_or(rest);

        if url.is_some() && !rest.is_empty() {
            return Err(invalid());
        }
        let specifier = SpecifierSet::parse(rest).map_err(|_| invalid())?;

        Ok(Self {
            name,
            extras,
            specifier,
            marker,
            url,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {}", url)?;
        } else if !self.specifier.is_empty() {
            write!(f, "{}", self.specifier.canonical())?;
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}
