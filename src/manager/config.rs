use crate::core::{FactoryError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Scope-wide options, fixed for the lifetime of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeOptions {
    /// Commit after each call and after the cleanup sweep. When false, calls
    /// only flush and the sweep's work is never committed.
    pub commit: bool,

    /// Delete everything left in the session's identity map on exit.
    pub cleanup: bool,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            commit: true,
            cleanup: true,
        }
    }
}

impl ScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Parse from JSON, e.g. `{"commit": false}`. Missing keys keep defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Parses `"commit=false,cleanup=true"`. Keys may be omitted.
impl FromStr for ScopeOptions {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self> {
        let mut options = Self::default();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| FactoryError::Config(format!("expected key=value, got '{}'", pair)))?;
            let value = parse_bool(value.trim())?;
            match key.trim() {
                "commit" => options.commit = value,
                "cleanup" => options.cleanup = value,
                other => {
                    return Err(FactoryError::Config(format!("unknown option '{}'", other)));
                }
            }
        }
        Ok(options)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(FactoryError::Config(format!("invalid boolean '{}'", value))),
    }
}
