//! Diagnostic sink backed by `tracing`

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::warn;

use crate::DiagnosticSink;

/// Forwards warnings to `tracing` under the `hostfacts` target
#[derive(Debug, Default)]
pub struct TracingSink {
    seen: Mutex<HashSet<String>>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message`, returning true if it had not been seen before
    fn first_sighting(&self, message: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(message.to_string())
    }
}

impl DiagnosticSink for TracingSink {
    fn warn(&self, message: &str) {
        warn!(target: "hostfacts", "{}", message);
    }

    fn warn_once(&self, message: &str) {
        if self.first_sighting(message) {
            self.warn(message);
        }
    }
}
