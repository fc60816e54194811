//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Settings applied to every resolution unless overridden
    #[serde(default)]
    pub defaults: RawDefaults,

    /// Resolution definitions
    #[serde(default)]
    pub resolutions: Vec<RawResolution>,
}

/// Shared defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDefaults {
    /// Timeout for resolutions that do not set one. 0 means none.
    pub timeout_seconds: Option<f64>,

    /// Environment applied to every resolution
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Raw resolution definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawResolution {
    /// Fact name this resolution computes
    pub name: String,

    /// Command line whose output is the value
    pub command: String,

    /// Explicit weight (default: number of confines)
    pub weight: Option<usize>,

    /// Timeout in seconds. 0 means none.
    pub timeout_seconds: Option<f64>,

    /// Fact name -> accepted value(s)
    #[serde(default)]
    pub confine: BTreeMap<String, RawExpected>,

    /// Extra environment for the command
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// One accepted value or a list of them
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawExpected {
    One(String),
    Many(Vec<String>),
}

impl RawExpected {
    pub fn into_values(self) -> Vec<String> {
        match self {
            RawExpected::One(value) => vec![value],
            RawExpected::Many(values) => values,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RawExpected::Many(values) if values.is_empty())
    }
}
