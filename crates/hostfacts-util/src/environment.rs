//! Scoped overrides of process environment variables
//!
//! The process environment is global. Overlapping scopes on different
//! threads that touch the same keys race with each other; callers that
//! need that must serialize such calls themselves.

use std::collections::BTreeMap;
use std::ffi::OsString;
use tracing::debug;

use crate::{HostfactsError, Result};

/// Guard holding the prior values of overridden environment variables
///
/// Dropping the guard restores every key to its snapshotted value, or
/// removes it if it was unset when the scope was entered. Restoration
/// runs on every exit path, including early returns and unwinding.
#[derive(Debug)]
pub struct EnvironmentScope {
    saved: Vec<(String, Option<OsString>)>,
}

impl EnvironmentScope {
    /// Snapshot the keys in `overrides` and apply the new values
    pub fn enter<K, V, I>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        // Dedup keys so a repeated key restores to the value before the scope.
        let overrides: BTreeMap<String, String> = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        for (key, value) in &overrides {
            validate_variable(key, value)?;
        }

        let mut saved = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            saved.push((key.clone(), std::env::var_os(&key)));
            // SAFETY: keys and values were validated above. Concurrent
            // access to the same keys is excluded by the caller contract.
            unsafe {
                std::env::set_var(&key, &value);
            }
        }

        debug!(keys = saved.len(), "Entered environment scope");

        Ok(Self { saved })
    }

    /// Keys overridden by this scope
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.saved.iter().map(|(k, _)| k.as_str())
    }
}

impl Drop for EnvironmentScope {
    fn drop(&mut self) {
        for (key, prior) in self.saved.drain(..).rev() {
            // SAFETY: same contract as in `enter`.
            unsafe {
                match prior {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

/// Run `body` with `overrides` applied to the process environment
///
/// Prior values are restored before this function returns, whether
/// `body` returns normally, returns early, or unwinds.
pub fn with_environment<K, V, I, F, R>(overrides: I, body: F) -> Result<R>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
    F: FnOnce() -> R,
{
    let _scope = EnvironmentScope::enter(overrides)?;
    Ok(body())
}

/// Check that `key` and `value` can be stored in the process environment
pub fn validate_variable(key: &str, value: &str) -> Result<()> {
    if key.is_empty() {
        return Err(HostfactsError::invalid_argument(
            "environment variable name must not be empty",
        ));
    }
    if key.contains('=') || key.contains('\0') {
        return Err(HostfactsError::invalid_argument(format!(
            "invalid environment variable name {:?}",
            key
        )));
    }
    if value.contains('\0') {
        return Err(HostfactsError::invalid_argument(format!(
            "value for {} contains a NUL byte",
            key
        )));
    }
    Ok(())
}
