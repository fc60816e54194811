//! Resolution: one candidate mechanism for computing a fact
//!
//! Value cache states:
//!
//! ```text
//! Uncomputed --value()--> Computing --success--> Cached(v)
//!                         Computing --failure/timeout--> Uncomputed
//! Cached(v) --value()--> Cached(v)
//! Cached(v) --flush()--> Uncomputed
//! ```
//!
//! There is no internal locking. A resolution is evaluated by one caller
//! at a time; sharing one across threads needs external synchronization.

use hostfacts_api::{DiagnosticSink, FactLookup, FactValue};
use hostfacts_util::validate_variable;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{Code, Computation, Confine, CoreError, CoreResult, ExecutionEngine, Expected};

/// Hook run when a resolution's cached value is flushed
pub type FlushHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// One way of computing a named fact
pub struct Resolution {
    name: String,
    weight: Option<usize>,
    confines: Vec<Confine>,
    code: Option<Code>,
    timeout: Duration,
    environment: BTreeMap<String, String>,
    cached: Option<FactValue>,
    flush_hooks: Vec<FlushHook>,
    engine: ExecutionEngine,
}

impl Resolution {
    /// Create a resolution reporting to `sink`
    pub fn new(name: impl Into<String>, sink: Arc<dyn DiagnosticSink>) -> CoreResult<Self> {
        Self::with_engine(name, ExecutionEngine::new(sink))
    }

    /// Create a resolution using an existing execution engine
    pub fn with_engine(name: impl Into<String>, engine: ExecutionEngine) -> CoreResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::invalid_argument("resolution name must not be empty"));
        }
        if name.contains('\0') {
            return Err(CoreError::invalid_argument(format!(
                "resolution name {:?} must not contain NUL",
                name
            )));
        }

        Ok(Self {
            name,
            weight: None,
            confines: Vec::new(),
            code: None,
            timeout: Duration::ZERO,
            environment: BTreeMap::new(),
            cached: None,
            flush_hooks: Vec::new(),
            engine,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Code

    /// Set the code body
    ///
    /// A command takes precedence over a computation given in the same
    /// call. Giving neither, or a blank command, is an error and leaves
    /// the current code untouched.
    pub fn set_code(
        &mut self,
        command: Option<&str>,
        computation: Option<Computation>,
    ) -> CoreResult<()> {
        let code = match (command, computation) {
            (Some(command), computation) => {
                if command.trim().is_empty() {
                    return Err(CoreError::invalid_argument(format!(
                        "resolution '{}': command must not be blank",
                        self.name
                    )));
                }
                if computation.is_some() {
                    self.engine.sink().warn_once(&format!(
                        "Resolution '{}' was given both a command and a computation; using the command",
                        self.name
                    ));
                }
                Code::Command(command.to_string())
            }
            (None, Some(computation)) => Code::Computation(computation),
            (None, None) => {
                return Err(CoreError::invalid_argument(format!(
                    "resolution '{}': a command or a computation is required",
                    self.name
                )));
            }
        };

        self.code = Some(code);
        Ok(())
    }

    /// Use a command line as the code body
    pub fn set_command(&mut self, command: &str) -> CoreResult<()> {
        self.set_code(Some(command), None)
    }

    /// Use a computation as the code body
    pub fn set_computation<F>(&mut self, computation: F)
    where
        F: Fn() -> anyhow::Result<Option<FactValue>> + Send + Sync + 'static,
    {
        self.code = Some(Code::Computation(Arc::new(computation)));
    }

    pub fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    // Confinement

    /// Confine to hosts where each fact has one of its expected values
    pub fn confine<K, V, I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Expected>,
    {
        for (fact, expected) in facts {
            self.confines.push(Confine::fact(fact, expected));
        }
    }

    /// Confine with a predicate over the value of `fact`
    pub fn confine_with<F>(&mut self, fact: impl Into<String>, predicate: F)
    where
        F: Fn(Option<&str>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.confines.push(Confine::fact_with(fact, predicate));
    }

    /// Confine with a standalone predicate
    pub fn confine_when<F>(&mut self, predicate: F)
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.confines.push(Confine::predicate(predicate));
    }

    pub fn add_confine(&mut self, confine: Confine) {
        self.confines.push(confine);
    }

    pub fn confines(&self) -> &[Confine] {
        &self.confines
    }

    /// True if every confine holds; vacuously true with none
    pub fn suitable(&self, lookup: &dyn FactLookup) -> bool {
        self.confines.iter().all(|c| c.is_true(lookup))
    }

    // Weight

    /// Override the confine-count default weight
    pub fn has_weight(&mut self, weight: usize) {
        self.weight = Some(weight);
    }

    /// Explicit weight if set, otherwise the number of confines
    pub fn weight(&self) -> usize {
        self.weight.unwrap_or(self.confines.len())
    }

    // Execution settings

    /// Zero means no timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Environment variables for the code
    ///
    /// A command gets them in its own process environment. A computation
    /// runs with them set process-wide, so callers must not evaluate
    /// computations with overrides concurrently.
    pub fn set_environment<K, V, I>(&mut self, environment: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let environment: BTreeMap<String, String> = environment
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        for (key, value) in &environment {
            validate_variable(key, value)?;
        }

        self.environment = environment;
        Ok(())
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    // Value

    /// Resolved value, computed on first use and cached until flushed
    ///
    /// Failures and timeouts are reported to the diagnostic sink, cache
    /// nothing and return `None`.
    pub fn value(&mut self) -> Option<FactValue> {
        if let Some(value) = &self.cached {
            return Some(value.clone());
        }

        let code = self.code.as_ref()?;
        let value = self
            .engine
            .run(&self.name, code, self.timeout, &self.environment)?;

        debug!(resolution = %self.name, value = %value, "Cached resolved value");
        self.cached = Some(value.clone());
        Some(value)
    }

    /// Value without computing it
    pub fn cached_value(&self) -> Option<&FactValue> {
        self.cached.as_ref()
    }

    /// Text form of the resolved value, empty if there is none
    pub fn to_text(&mut self) -> String {
        self.value().map(|v| v.to_string()).unwrap_or_default()
    }

    // Flushing

    /// Register a hook run on every flush, after those already registered
    pub fn on_flush<F>(&mut self, hook: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.flush_hooks.push(Box::new(hook));
    }

    /// Clear the cached value and run the flush hooks in order
    ///
    /// The first failing hook stops the flush and its error is returned.
    /// The cache is cleared regardless.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.cached = None;
        debug!(resolution = %self.name, hooks = self.flush_hooks.len(), "Flushing resolution");

        for (index, hook) in self.flush_hooks.iter().enumerate() {
            hook().map_err(|e| CoreError::FlushHookFailed {
                resolution: self.name.clone(),
                index,
                source: e.into(),
            })?;
        }

        Ok(())
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("name", &self.name)
            .field("weight", &self.weight())
            .field("confines", &self.confines)
            .field("code", &self.code)
            .field("timeout", &self.timeout)
            .field("cached", &self.cached)
            .field("flush_hooks", &self.flush_hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, bail};
    use hostfacts_api::{CapturingSink, StaticLookup};
    use hostfacts_util::HostfactsError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolution(name: &str) -> (Resolution, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::new());
        (Resolution::new(name, sink.clone()).unwrap(), sink)
    }

    #[test]
    fn blank_name_rejected() {
        let sink = Arc::new(CapturingSink::new());
        assert!(matches!(
            Resolution::new("", sink.clone()),
            Err(CoreError::Invalid(HostfactsError::InvalidArgument(_)))
        ));
        assert!(Resolution::new("   ", sink).is_err());
    }

    #[test]
    fn nul_in_name_rejected() {
        let sink = Arc::new(CapturingSink::new());
        assert!(matches!(
            Resolution::new("os\0x", sink),
            Err(CoreError::Invalid(HostfactsError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn free_form_name_resolves_under_timeout() {
        let (mut res, sink) = resolution("os release (lsb) / näme");
        res.set_timeout(Duration::from_secs(5));
        res.set_computation(|| Ok(Some(FactValue::from("linux"))));

        assert_eq!(res.value(), Some(FactValue::from("linux")));
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn no_confines_is_suitable() {
        let (res, _) = resolution("os");
        assert!(res.suitable(&StaticLookup::new()));
        assert_eq!(res.weight(), 0);
    }

    #[test]
    fn single_false_confine_anywhere_makes_unsuitable() {
        let lookup = StaticLookup::new().with_fact("kernel", "Linux");

        for false_at in 0..3 {
            let (mut res, _) = resolution("probe");
            for i in 0..3 {
                let holds = i != false_at;
                res.confine_when(move || Ok(holds));
            }
            assert!(!res.suitable(&lookup), "false confine at {}", false_at);
        }

        let (mut res, _) = resolution("probe");
        res.confine([("kernel", "Linux")]);
        res.confine_when(|| Ok(true));
        assert!(res.suitable(&lookup));
    }

    #[test]
    fn confines_accumulate_across_calls() {
        let (mut res, _) = resolution("arch");
        res.confine([("kernel", "Linux")]);
        res.confine([("os", ["Debian", "Ubuntu"])]);
        res.confine_with("virtual", |v| Ok(v != Some("docker")));
        res.confine_when(|| Ok(true));

        assert_eq!(res.confines().len(), 4);
        assert_eq!(res.weight(), 4);
    }

    #[test]
    fn explicit_weight_sticks() {
        let (mut res, _) = resolution("uptime");
        res.confine([("kernel", "Linux")]);
        assert_eq!(res.weight(), 1);

        res.has_weight(10);
        res.confine([("arch", "x86_64")]);
        assert_eq!(res.weight(), 10);
    }

    #[test]
    fn set_code_requires_something() {
        let (mut res, _) = resolution("hostname");
        let err = res.set_code(None, None).unwrap_err();
        assert!(matches!(err, CoreError::Invalid(HostfactsError::InvalidArgument(_))));
        assert!(res.code().is_none());

        assert!(res.set_command("  ").is_err());
        assert!(res.code().is_none());
    }

    #[test]
    fn command_beats_computation() {
        let (mut res, sink) = resolution("hostname");
        let computation: Computation = Arc::new(|| Ok(Some(FactValue::from("computed"))));

        res.set_code(Some("hostname"), Some(computation.clone())).unwrap();
        res.set_code(Some("hostname"), Some(computation)).unwrap();

        assert_eq!(res.code().and_then(Code::as_command), Some("hostname"));
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn failed_set_code_keeps_previous_code() {
        let (mut res, _) = resolution("hostname");
        res.set_command("hostname").unwrap();
        assert!(res.set_code(None, None).is_err());
        assert_eq!(res.code().and_then(Code::as_command), Some("hostname"));
    }

    #[test]
    fn value_without_code_is_none() {
        let (mut res, sink) = resolution("empty");
        assert_eq!(res.value(), None);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn value_is_cached_until_flush() {
        let (mut res, _) = resolution("counter");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        res.set_computation(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(FactValue::from(n as i64)))
        });

        assert_eq!(res.value(), Some(FactValue::Integer(1)));
        assert_eq!(res.value(), Some(FactValue::Integer(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.cached_value(), Some(&FactValue::Integer(1)));

        res.flush().unwrap();
        assert_eq!(res.cached_value(), None);
        assert_eq!(res.value(), Some(FactValue::Integer(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_caches_nothing() {
        let (mut res, sink) = resolution("flaky");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        res.set_computation(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                bail!("first attempt fails");
            }
            Ok(Some(FactValue::from("recovered")))
        });

        assert_eq!(res.value(), None);
        assert_eq!(sink.warnings().len(), 1);
        assert!(sink.warnings()[0].contains("first attempt fails"));

        assert_eq!(res.value(), Some(FactValue::from("recovered")));
    }

    #[test]
    fn flush_runs_hooks_in_order() {
        let (mut res, _) = resolution("os");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            res.on_flush(move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        res.flush().unwrap();
        res.flush().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn failing_hook_stops_flush() {
        let (mut res, _) = resolution("os");
        res.set_computation(|| Ok(Some(FactValue::from("linux"))));
        res.value();

        let ran = Arc::new(Mutex::new(Vec::new()));
        let first = ran.clone();
        res.on_flush(move || {
            first.lock().unwrap().push("first");
            Ok(())
        });
        res.on_flush(|| Err(anyhow!("cache directory vanished")));
        let third = ran.clone();
        res.on_flush(move || {
            third.lock().unwrap().push("third");
            Ok(())
        });

        let err = res.flush().unwrap_err();
        match &err {
            CoreError::FlushHookFailed { resolution, index, .. } => {
                assert_eq!(resolution, "os");
                assert_eq!(*index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("cache directory vanished"));
        assert_eq!(*ran.lock().unwrap(), vec!["first"]);
        assert_eq!(res.cached_value(), None);
    }

    #[test]
    fn to_text_is_stringified_value() {
        let (mut res, _) = resolution("processorcount");
        assert_eq!(res.to_text(), "");

        res.set_computation(|| Ok(Some(FactValue::from(8i64))));
        assert_eq!(res.to_text(), "8");
    }

    #[test]
    fn timeout_defaults_to_zero() {
        let (mut res, _) = resolution("slow");
        assert_eq!(res.timeout(), Duration::ZERO);
        res.set_timeout(Duration::from_secs(2));
        assert_eq!(res.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn invalid_environment_rejected() {
        let (mut res, _) = resolution("env");
        assert!(res.set_environment([("BAD=KEY", "x")]).is_err());
        assert!(res.environment().is_empty());

        res.set_environment([("LC_ALL", "C")]).unwrap();
        assert_eq!(res.environment().get("LC_ALL").map(String::as_str), Some("C"));
    }

    #[test]
    fn command_value_flows_through() {
        let (mut res, sink) = resolution("echo");
        res.set_command("echo resolved").unwrap();
        assert_eq!(res.value(), Some(FactValue::from("resolved")));
        assert!(sink.warnings().is_empty());
    }
}
