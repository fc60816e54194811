//! Configuration validation

use crate::schema::{RawConfig, RawResolution};
use std::collections::BTreeMap;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Resolution #{index} ('{name}'): {message}")]
    ResolutionError {
        index: usize,
        name: String,
        message: String,
    },

    #[error("Invalid timeout {value}: {message}")]
    InvalidTimeout { value: f64, message: String },

    #[error("Invalid environment variable {key:?}")]
    InvalidEnvironment { key: String },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(timeout) = config.defaults.timeout_seconds {
        if let Err(message) = check_timeout(timeout) {
            errors.push(ValidationError::InvalidTimeout {
                value: timeout,
                message,
            });
        }
    }
    errors.extend(validate_environment(&config.defaults.environment));

    for (index, resolution) in config.resolutions.iter().enumerate() {
        errors.extend(validate_resolution(index, resolution));
    }

    errors
}

fn validate_resolution(index: usize, resolution: &RawResolution) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let error = |message: String| ValidationError::ResolutionError {
        index,
        name: resolution.name.clone(),
        message,
    };

    if resolution.name.trim().is_empty() {
        errors.push(error("name cannot be empty".into()));
    }

    if resolution.command.trim().is_empty() {
        errors.push(error("command cannot be empty".into()));
    }

    if let Some(timeout) = resolution.timeout_seconds {
        if let Err(message) = check_timeout(timeout) {
            errors.push(error(format!("timeout_seconds {}: {}", timeout, message)));
        }
    }

    for (fact, expected) in &resolution.confine {
        if fact.trim().is_empty() {
            errors.push(error("confine fact name cannot be empty".into()));
        }
        if expected.is_empty() {
            errors.push(error(format!("confine on '{}' lists no values", fact)));
        }
    }

    errors.extend(validate_environment(&resolution.environment));

    errors
}

fn validate_environment(environment: &BTreeMap<String, String>) -> Vec<ValidationError> {
    environment
        .iter()
        .filter(|(key, value)| key.is_empty() || key.contains(['=', '\0']) || value.contains('\0'))
        .map(|(key, _)| ValidationError::InvalidEnvironment { key: key.clone() })
        .collect()
}

/// Check that a timeout in seconds is usable as a `Duration`
pub fn check_timeout(seconds: f64) -> Result<(), String> {
    if !seconds.is_finite() {
        return Err("must be a finite number".into());
    }
    if seconds < 0.0 {
        return Err("cannot be negative".into());
    }
    std::time::Duration::try_from_secs_f64(seconds)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
