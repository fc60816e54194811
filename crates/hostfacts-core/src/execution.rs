//! Timeout-bounded execution of resolution code
//!
//! Commands run as a child process in their own process group, with the
//! resolution's environment applied to the child only. On timeout the
//! group is killed and reaped.
//!
//! Computations run on the calling thread when no timeout is set. With a
//! timeout they run on a dedicated thread and the caller waits on a
//! channel until the deadline. An abandoned computation is never
//! cancelled: its thread keeps running and its result is dropped when it
//! finishes. Children born while it ran and left unwaited are collected
//! by an orphan sweep run right after the deadline passes.

use hostfacts_api::{DiagnosticSink, FactValue};
use hostfacts_host_linux::{
    CaptureOutcome, ManagedProcess, child_pids, expand_command_in, reap_orphans_except,
};
use hostfacts_util::{EnvironmentScope, normalize_output, validate_variable};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::debug;

/// Computation producing a fact value
pub type Computation = Arc<dyn Fn() -> anyhow::Result<Option<FactValue>> + Send + Sync>;

/// Shell used to run command strings
pub const SHELL: &str = "/bin/sh";

/// Environment every command runs under, so tool output is not localized
pub const COMMAND_ENVIRONMENT: &[(&str, &str)] = &[("LANG", "C")];

/// Code body of a resolution
#[derive(Clone)]
pub enum Code {
    /// A command line whose stdout is the value
    Command(String),
    /// An arbitrary computation
    Computation(Computation),
}

impl Code {
    pub fn as_command(&self) -> Option<&str> {
        match self {
            Code::Command(command) => Some(command.as_str()),
            Code::Computation(_) => None,
        }
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Code::Computation(_) => f.write_str("Computation(..)"),
        }
    }
}

enum Outcome {
    Finished(anyhow::Result<Option<FactValue>>),
    Panicked(String),
    TimedOut { children_before: HashSet<u32> },
}

/// Runs resolution code and reports failures to a diagnostic sink
#[derive(Clone)]
pub struct ExecutionEngine {
    sink: Arc<dyn DiagnosticSink>,
}

impl ExecutionEngine {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    /// Run `code` for `fact`, bounded by `timeout` (zero waits forever)
    ///
    /// Failures and timeouts are reported as warnings and yield `None`.
    pub fn run(
        &self,
        fact: &str,
        code: &Code,
        timeout: Duration,
        environment: &BTreeMap<String, String>,
    ) -> Option<FactValue> {
        match code {
            Code::Command(command) => self.run_command(fact, command, timeout, environment),
            Code::Computation(computation) => {
                self.run_computation(fact, computation, timeout, environment)
            }
        }
    }

    /// Run a command line and return its trimmed stdout
    ///
    /// A command whose binary cannot be found, or that prints nothing,
    /// has no value.
    pub fn run_command(
        &self,
        fact: &str,
        command: &str,
        timeout: Duration,
        environment: &BTreeMap<String, String>,
    ) -> Option<FactValue> {
        let mut child_env: BTreeMap<String, String> = COMMAND_ENVIRONMENT
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        child_env.extend(environment.clone());

        if let Err(e) = child_env.iter().try_for_each(|(k, v)| validate_variable(k, v)) {
            self.report_failure(fact, &e);
            return None;
        }

        // The binary is looked up the way the child would, honouring a PATH override.
        let search = child_env.get("PATH").map(OsStr::new);
        let Some(expanded) = expand_command_in(command, search) else {
            debug!(fact = %fact, command = %command, "Command not found, no value");
            return None;
        };

        let argv = vec![SHELL.to_string(), "-c".to_string(), expanded];
        let process = match ManagedProcess::spawn(&argv, &child_env) {
            Ok(process) => process,
            Err(e) => {
                self.report_failure(fact, &e);
                return None;
            }
        };

        let limit = (!timeout.is_zero()).then_some(timeout);
        match process.wait_with_output(limit) {
            Ok(CaptureOutcome::Completed { stdout, .. }) => {
                normalize_output(&stdout).map(FactValue::String)
            }
            Ok(CaptureOutcome::TimedOut) => {
                // The whole group is already killed and reaped.
                self.report_timeout(fact, timeout);
                None
            }
            Err(e) => {
                self.report_failure(fact, &e);
                None
            }
        }
    }

    /// Run a computation, on a worker thread if `timeout` is non-zero
    pub fn run_computation(
        &self,
        fact: &str,
        computation: &Computation,
        timeout: Duration,
        environment: &BTreeMap<String, String>,
    ) -> Option<FactValue> {
        let _scope = match EnvironmentScope::enter(environment.clone()) {
            Ok(scope) => scope,
            Err(e) => {
                self.report_failure(fact, &e);
                return None;
            }
        };

        let outcome = if timeout.is_zero() {
            match catch_unwind(AssertUnwindSafe(|| computation())) {
                Ok(result) => Outcome::Finished(result),
                Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
            }
        } else {
            match self.run_on_worker(computation, timeout) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.report_failure(fact, &e);
                    return None;
                }
            }
        };

        match outcome {
            Outcome::Finished(Ok(value)) => value.map(FactValue::normalized),
            Outcome::Finished(Err(e)) => {
                self.sink
                    .warn(&format!("Could not retrieve fact '{}': {:#}", fact, e));
                None
            }
            Outcome::Panicked(message) => {
                self.sink.warn(&format!(
                    "Could not retrieve fact '{}': panicked: {}",
                    fact, message
                ));
                None
            }
            Outcome::TimedOut { children_before } => {
                self.report_timeout(fact, timeout);
                let reaped = reap_orphans_except(&children_before);
                if reaped > 0 {
                    debug!(fact = %fact, reaped = reaped, "Reaped orphaned children after timeout");
                }
                None
            }
        }
    }

    fn run_on_worker(
        &self,
        computation: &Computation,
        timeout: Duration,
    ) -> std::io::Result<Outcome> {
        let (tx, rx) = mpsc::sync_channel(1);
        let worker = Arc::clone(computation);
        let children_before = child_pids();

        // Fact names are free-form, so the thread gets a fixed name.
        std::thread::Builder::new()
            .name("hostfacts-computation".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| worker()))
                    .map_err(|payload| panic_message(payload.as_ref()));
                // The receiver is gone if the caller stopped waiting.
                let _ = tx.send(result);
            })?;

        Ok(match rx.recv_timeout(timeout) {
            Ok(Ok(result)) => Outcome::Finished(result),
            Ok(Err(message)) => Outcome::Panicked(message),
            Err(mpsc::RecvTimeoutError::Timeout) => Outcome::TimedOut { children_before },
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Outcome::Panicked("worker exited without a result".into())
            }
        })
    }

    fn report_failure(&self, fact: &str, error: &dyn std::error::Error) {
        self.sink
            .warn(&format!("Could not retrieve fact '{}': {}", fact, error));
    }

    fn report_timeout(&self, fact: &str, timeout: Duration) {
        self.sink.warn(&format!(
            "Timed out after {} seconds while resolving fact '{}'",
            timeout.as_secs_f64(),
            fact
        ));
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine").finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use hostfacts_api::CapturingSink;
    use std::time::Instant;

    fn engine() -> (ExecutionEngine, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::new());
        (ExecutionEngine::new(sink.clone()), sink)
    }

    fn no_env() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn computation<F>(f: F) -> Computation
    where
        F: Fn() -> anyhow::Result<Option<FactValue>> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[test]
    fn command_stdout_is_trimmed() {
        let (engine, sink) = engine();
        let value =
            engine.run_command("greeting", "echo '  hello  '", Duration::ZERO, &no_env());
        assert_eq!(value, Some(FactValue::from("hello")));
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn command_runs_under_c_locale() {
        let (engine, _) = engine();
        let value = engine.run_command("lang", "printenv LANG", Duration::ZERO, &no_env());
        assert_eq!(value, Some(FactValue::from("C")));
    }

    #[test]
    fn command_environment_overrides_apply() {
        let (engine, _) = engine();
        let env = BTreeMap::from([("HOSTFACTS_EXEC_PROBE".to_string(), "yes".to_string())]);
        let value =
            engine.run_command("probe", "printenv HOSTFACTS_EXEC_PROBE", Duration::ZERO, &env);
        assert_eq!(value, Some(FactValue::from("yes")));
        assert!(std::env::var_os("HOSTFACTS_EXEC_PROBE").is_none());
    }

    #[test]
    fn command_without_output_is_none() {
        let (engine, sink) = engine();
        assert_eq!(engine.run_command("silent", "true", Duration::ZERO, &no_env()), None);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn missing_binary_is_none_without_warning() {
        let (engine, sink) = engine();
        let value = engine.run_command(
            "nothing",
            "no-such-binary-hostfacts --x",
            Duration::ZERO,
            &no_env(),
        );
        assert_eq!(value, None);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn command_timeout_warns() {
        let (engine, sink) = engine();
        let start = Instant::now();
        let value = engine.run_command("slow", "sleep 10", Duration::from_millis(200), &no_env());

        assert_eq!(value, None);
        assert!(start.elapsed() < Duration::from_secs(5));
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Timed out"));
        assert!(warnings[0].contains("'slow'"));
    }

    #[test]
    fn computation_value_normalized() {
        let (engine, _) = engine();
        let code = computation(|| Ok(Some(FactValue::from("a\r\nb"))));
        assert_eq!(
            engine.run_computation("lines", &code, Duration::ZERO, &no_env()),
            Some(FactValue::from("a\nb"))
        );
    }

    #[test]
    fn computation_error_warns_once() {
        let (engine, sink) = engine();
        let code = computation(|| Err(anyhow!("dmidecode exploded")));

        assert_eq!(engine.run_computation("serial", &code, Duration::ZERO, &no_env()), None);

        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("dmidecode exploded"));
    }

    #[test]
    fn computation_panic_is_contained() {
        let (engine, sink) = engine();
        let code = computation(|| panic!("unexpected layout"));

        assert_eq!(engine.run_computation("layout", &code, Duration::ZERO, &no_env()), None);
        assert_eq!(
            engine.run_computation("layout", &code, Duration::from_secs(5), &no_env()),
            None
        );

        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.contains("unexpected layout")));
    }

    #[test]
    fn computation_within_timeout_succeeds() {
        let (engine, sink) = engine();
        let code = computation(|| Ok(Some(FactValue::from(4i64))));
        assert_eq!(
            engine.run_computation("cores", &code, Duration::from_secs(5), &no_env()),
            Some(FactValue::Integer(4))
        );
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn computation_timeout_releases_caller() {
        let (engine, sink) = engine();
        let code = computation(|| {
            std::thread::sleep(Duration::from_secs(3));
            Ok(Some(FactValue::from("late")))
        });

        let start = Instant::now();
        let value =
            engine.run_computation("sluggish", &code, Duration::from_millis(100), &no_env());

        assert_eq!(value, None);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(sink.warnings().len(), 1);
        assert!(sink.warnings()[0].contains("Timed out"));
    }

    #[test]
    fn computation_sees_environment() {
        let (engine, _) = engine();
        let env = BTreeMap::from([("HOSTFACTS_EXEC_COMPUTE".to_string(), "set".to_string())]);
        let code =
            computation(|| Ok(std::env::var("HOSTFACTS_EXEC_COMPUTE").ok().map(FactValue::from)));

        assert_eq!(
            engine.run_computation("env", &code, Duration::ZERO, &env),
            Some(FactValue::from("set"))
        );
        assert!(std::env::var_os("HOSTFACTS_EXEC_COMPUTE").is_none());
    }

    #[test]
    fn run_dispatches_on_code() {
        let (engine, _) = engine();
        let command = Code::Command("echo from-command".into());
        let compute =
            Code::Computation(computation(|| Ok(Some(FactValue::from("from-computation")))));

        assert_eq!(
            engine.run("x", &command, Duration::ZERO, &no_env()),
            Some(FactValue::from("from-command"))
        );
        assert_eq!(
            engine.run("x", &compute, Duration::ZERO, &no_env()),
            Some(FactValue::from("from-computation"))
        );
        assert_eq!(command.as_command(), Some("echo from-command"));
        assert_eq!(compute.as_command(), None);
    }
}
