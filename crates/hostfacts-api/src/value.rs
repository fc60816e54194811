//! Resolved fact values

use hostfacts_util::normalize_text;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved scalar fact value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl FactValue {
    /// Get the string payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Apply canonical text normalization to string payloads
    pub fn normalized(self) -> Self {
        match self {
            FactValue::String(s) => FactValue::String(normalize_text(&s)),
            other => other,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Boolean(b) => write!(f, "{}", b),
            FactValue::Integer(i) => write!(f, "{}", i),
            FactValue::Float(x) => write!(f, "{}", x),
            FactValue::String(s) => f.write_str(s),
        }
    }
}

impl From<String> for FactValue {
    fn from(s: String) -> Self {
        FactValue::String(s)
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        FactValue::String(s.to_string())
    }
}

impl From<bool> for FactValue {
    fn from(b: bool) -> Self {
        FactValue::Boolean(b)
    }
}

impl From<i64> for FactValue {
    fn from(i: i64) -> Self {
        FactValue::Integer(i)
    }
}

impl From<f64> for FactValue {
    fn from(x: f64) -> Self {
        FactValue::Float(x)
    }
}
