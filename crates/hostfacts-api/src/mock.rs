//! Test doubles for the capability traits

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::{Comparison, DiagnosticSink, FactLookup};

/// Diagnostic sink that records every emitted warning
#[derive(Debug, Default)]
pub struct CapturingSink {
    warnings: Mutex<Vec<String>>,
    seen: Mutex<HashSet<String>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings emitted so far, in order
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.warnings.lock().unwrap().clear();
        self.seen.lock().unwrap().clear();
    }
}

impl DiagnosticSink for CapturingSink {
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn warn_once(&self, message: &str) {
        if self.seen.lock().unwrap().insert(message.to_string()) {
            self.warn(message);
        }
    }
}

/// Fact lookup over a fixed table of values
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    facts: HashMap<String, String>,
    comparison: Comparison,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(name.into(), value.into());
        self
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }
}

impl<K, V> FromIterator<(K, V)> for StaticLookup
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            facts: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            comparison: Comparison::default(),
        }
    }
}

impl FactLookup for StaticLookup {
    fn value_of(&self, fact: &str) -> Option<String> {
        self.facts.get(fact).cloned()
    }

    fn matches(&self, actual: &str, expected: &str) -> bool {
        self.comparison.matches(actual, expected)
    }
}
