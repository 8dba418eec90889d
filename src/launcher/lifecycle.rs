//! Instance lifecycle

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BerthError, Result};

/// Where an instance is in its life. Transitions only move forward, one
/// step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    NotBuilt,
    Built,
    Running,
    Exited,
}

impl Lifecycle {
    /// The state that may follow this one
    pub fn next(self) -> Option<Lifecycle> {
        match self {
            Lifecycle::NotBuilt => Some(Lifecycle::Built),
            Lifecycle::Built => Some(Lifecycle::Running),
            Lifecycle::Running => Some(Lifecycle::Exited),
            Lifecycle::Exited => None,
        }
    }

    pub fn advance(self, to: Lifecycle) -> Result<Lifecycle> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(BerthError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Lifecycle::Exited
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::NotBuilt => write!(f, "not_built"),
            Lifecycle::Built => write!(f, "built"),
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Exited => write!(f, "exited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let state = Lifecycle::default();
        let state = state.advance(Lifecycle::Built).unwrap();
        let state = state.advance(Lifecycle::Running).unwrap();
        let state = state.advance(Lifecycle::Exited).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rejects_skips_and_cycles() {
        assert!(Lifecycle::Built.advance(Lifecycle::Exited).is_err());
        assert!(Lifecycle::NotBuilt.advance(Lifecycle::Running).is_err());
        assert!(Lifecycle::Exited.advance(Lifecycle::Built).is_err());
        assert!(Lifecycle::Running.advance(Lifecycle::Running).is_err());

        let err = Lifecycle::Exited.advance(Lifecycle::Running).unwrap_err();
        assert_eq!(err.to_string(), "Invalid lifecycle transition: exited -> running");
    }
}
