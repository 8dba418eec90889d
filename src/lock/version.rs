//! Package versions and version specifiers
//!
//! Covers the subset of PEP 440 that appears in manifests and lock files:
//! dotted releases with optional pre, post and dev segments, and the
//! comparison operators `==`, `!=`, `<`, `<=`, `>`, `>=`, `~=` and `===`,
//! including `==X.Y.*` prefix matches.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{BerthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

/// A parsed package version
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub release: Vec<u64>,
    pub pre: Option<(PreKind, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^v?(\d+(?:\.\d+)*)(?:[-_.]?(a|alpha|b|beta|rc|c|pre|preview)[-_.]?(\d*))?(?:([-_.]?(?:post|rev|r)[-_.]?(\d*))|-(\d+))?([-_.]?dev[-_.]?(\d*))?$",
        )
        .expect("version pattern is valid")
    })
}

impl Version {
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim().to_ascii_lowercase();
        // Local labels (`+cpu`) never affect ordering here.
        let text = text.split('+').next().unwrap_or_default();

        let caps = version_regex()
            .captures(text)
            .ok_or_else(|| BerthError::InvalidVersion(input.to_string()))?;

        let release = caps[1]
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| BerthError::InvalidVersion(input.to_string()))?;

        let number = |idx: usize| -> u64 {
            caps.get(idx)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };

        let pre = caps.get(2).map(|kind| {
            let kind = match kind.as_str() {
                "a" | "alpha" => PreKind::Alpha,
                "b" | "beta" => PreKind::Beta,
                _ => PreKind::Rc,
            };
            (kind, number(3))
        });

        let post = if caps.get(4).is_some() {
            Some(number(5))
        } else if caps.get(6).is_some() {
            Some(number(6))
        } else {
            None
        };

        let dev = caps.get(7).map(|_| number(8));

        Ok(Self {
            release,
            pre,
            post,
            dev,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn release_at(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.release_at(i).cmp(&other.release_at(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    fn pre_key(&self) -> (u8, Option<PreKind>, u64) {
        match (self.pre, self.post, self.dev) {
            // 1.0.dev1 sorts before 1.0a1
            (None, None, Some(_)) => (0, None, 0),
            (Some((kind, n)), _, _) => (1, Some(kind), n),
            _ => (2, None, 0),
        }
    }

    fn dev_key(&self) -> (u8, u64) {
        match self.dev {
            Some(n) => (0, n),
            None => (1, 0),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            let label = match kind {
                PreKind::Alpha => "a",
                PreKind::Beta => "b",
                PreKind::Rc => "rc",
            };
            write!(f, "{}{}", label, n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    Arbitrary,
}

impl Operator {
    fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
        }
    }
}

/// One clause of a specifier set, e.g. `>=1.40`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub op: Operator,
    pub version: String,
}

impl Specifier {
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        let ops = [
            ("===", Operator::Arbitrary),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessEqual),
            (">=", Operator::GreaterEqual),
            ("~=", Operator::Compatible),
            ("<", Operator::Less),
            (">", Operator::Greater),
        ];
        let (op, rest) = ops
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| BerthError::InvalidVersion(input.to_string()))?;

        if rest.is_empty() {
            return Err(BerthError::InvalidVersion(input.to_string()));
        }

        let wildcard = rest.ends_with(".*");
        if wildcard && !matches!(op, Operator::Equal | Operator::NotEqual) {
            return Err(BerthError::InvalidVersion(input.to_string()));
        }
        if op != Operator::Arbitrary {
            Version::parse(rest.trim_end_matches(".*"))?;
        }
        if op == Operator::Compatible && !rest.contains('.') {
            return Err(BerthError::InvalidVersion(input.to_string()));
        }

        Ok(Self {
            op,
            version: rest.to_string(),
        })
    }

    /// Whether `candidate` satisfies this clause
    pub fn matches(&self, candidate: &Version) -> bool {
        if self.op == Operator::Arbitrary {
            return candidate.to_string() == self.version;
        }

        if let Some(prefix) = self.version.strip_suffix(".*") {
            let matched = Version::parse(prefix)
                .map(|p| prefix_matches(candidate, &p.release))
                .unwrap_or(false);
            return match self.op {
                Operator::NotEqual => !matched,
                _ => matched,
            };
        }

        let target = match Version::parse(&self.version) {
            Ok(v) => v,
            Err(_) => return false,
        };

        match self.op {
            Operator::Equal => *candidate == target,
            Operator::NotEqual => *candidate != target,
            Operator::Less => *candidate < target,
            Operator::LessEqual => *candidate <= target,
            Operator::Greater => *candidate > target,
            Operator::GreaterEqual => *candidate >= target,
            Operator::Compatible => {
                let prefix = &target.release[..target.release.len().saturating_sub(1)];
                *candidate >= target && prefix_matches(candidate, prefix)
            }
            Operator::Arbitrary => false,
        }
    }
}

fn prefix_matches(candidate: &Version, prefix: &[u64]) -> bool {
    prefix
        .iter()
        .enumerate()
        .all(|(i, part)| candidate.release_at(i) == *part)
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// Comma-separated specifier clauses that must all match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierSet {
    pub clauses: Vec<Specifier>,
}

impl SpecifierSet {
    pub fn parse(input: &str) -> Result<Self> {
        let clauses = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Specifier::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(candidate))
    }

    /// Order-independent form used to compare two sets
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self.clauses.iter().map(Specifier::to_string).collect();
        parts.sort();
        parts.join(",")
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(Specifier::to_string).collect();
        write!(f, "{}", parts.join(", "))
    }
}
