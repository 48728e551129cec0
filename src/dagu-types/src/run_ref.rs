//! `DagRunRef`: `(name, id)` identifying a DAG run, with its `name:id` wire form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a `DagRunRef` from its string form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid dag-run reference format: {0:?}")]
pub struct ParseDagRunRefError(pub String);

/// Identifies a DAG run: the DAG's name plus a run id. The zero value
/// (`DagRunRef::none()`) denotes "no parent".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagRunRef {
    pub name: String,
    pub id: String,
}

impl DagRunRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// The zero ref: no parent / no root.
    pub fn none() -> Self {
        Self {
            name: String::new(),
            id: String::new(),
        }
    }

    /// Whether this is the zero ref.
    pub fn is_none(&self) -> bool {
        self.name.is_empty() && self.id.is_empty()
    }
}

impl fmt::Display for DagRunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

impl FromStr for DagRunRef {
    type Err = ParseDagRunRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.matches(':').count() != 1 {
            return Err(ParseDagRunRefError(s.to_string()));
        }
        let mut parts = s.splitn(2, ':');
        let name = parts.next().ok_or_else(|| ParseDagRunRefError(s.to_string()))?;
        let rest = parts.next().ok_or_else(|| ParseDagRunRefError(s.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            id: rest.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let r = DagRunRef::new("etl", "abc123");
        assert_eq!(r.to_string(), "etl:abc123");
        assert_eq!("etl:abc123".parse::<DagRunRef>().unwrap(), r);
    }

    #[test]
    fn rejects_missing_or_extra_colons() {
        assert!("etl".parse::<DagRunRef>().is_err());
        assert!("etl:abc:extra".parse::<DagRunRef>().is_err());
    }

    #[test]
    fn none_is_the_zero_ref() {
        assert!(DagRunRef::none().is_none());
        assert!(!DagRunRef::new("etl", "x").is_none());
    }
}
