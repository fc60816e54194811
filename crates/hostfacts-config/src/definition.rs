//! Validated resolution definitions

use crate::schema::{RawConfig, RawResolution};
use hostfacts_api::DiagnosticSink;
use hostfacts_core::{CoreResult, Resolution};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Validated configuration ready to build resolutions from
#[derive(Debug, Clone)]
pub struct FactsConfig {
    /// Resolution definitions in file order
    pub resolutions: Vec<ResolutionDef>,
}

impl FactsConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let default_timeout = raw
            .defaults
            .timeout_seconds
            .map(seconds_to_duration)
            .unwrap_or(Duration::ZERO);

        let resolutions = raw
            .resolutions
            .into_iter()
            .map(|r| ResolutionDef::from_raw(r, default_timeout, &raw.defaults.environment))
            .collect();

        Self { resolutions }
    }

    /// Definitions for one fact, in file order
    pub fn resolutions_for<'a>(&'a self, fact: &'a str) -> impl Iterator<Item = &'a ResolutionDef> {
        self.resolutions.iter().filter(move |r| r.name == fact)
    }

    /// Distinct fact names, sorted
    pub fn fact_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resolutions.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Build every resolution of one fact
    pub fn build_fact(
        &self,
        fact: &str,
        sink: Arc<dyn DiagnosticSink>,
    ) -> CoreResult<Vec<Resolution>> {
        self.resolutions_for(fact)
            .map(|def| def.build(sink.clone()))
            .collect()
    }
}

/// Validated definition of one command-backed resolution
#[derive(Debug, Clone)]
pub struct ResolutionDef {
    pub name: String,
    pub command: String,
    pub weight: Option<usize>,
    pub timeout: Duration,
    /// Fact name -> accepted values
    pub confines: BTreeMap<String, Vec<String>>,
    pub environment: BTreeMap<String, String>,
}

impl ResolutionDef {
    fn from_raw(
        raw: RawResolution,
        default_timeout: Duration,
        default_environment: &BTreeMap<String, String>,
    ) -> Self {
        let mut environment = default_environment.clone();
        environment.extend(raw.environment);

        Self {
            name: raw.name,
            command: raw.command,
            weight: raw.weight,
            timeout: raw
                .timeout_seconds
                .map(seconds_to_duration)
                .unwrap_or(default_timeout),
            confines: raw
                .confine
                .into_iter()
                .map(|(fact, expected)| (fact, expected.into_values()))
                .collect(),
            environment,
        }
    }

    /// Build a configured resolution reporting to `sink`
    pub fn build(&self, sink: Arc<dyn DiagnosticSink>) -> CoreResult<Resolution> {
        let mut resolution = Resolution::new(self.name.clone(), sink)?;
        resolution.set_command(&self.command)?;
        resolution.confine(self.confines.clone());
        if let Some(weight) = self.weight {
            resolution.has_weight(weight);
        }
        resolution.set_timeout(self.timeout);
        resolution.set_environment(self.environment.clone())?;
        Ok(resolution)
    }
}

/// Validation guarantees the value is finite and non-negative
fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}
