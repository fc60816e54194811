//! Process management utilities

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::reap::{owned_children, release_child};
use crate::{HostError, HostResult};

/// Interval between exit checks while waiting on a deadline
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of waiting for a captured process
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The process exited and its stdout was read to the end
    Completed { stdout: Vec<u8>, status: ExitStatus },
    /// The deadline passed; the process group was killed and reaped
    TimedOut,
}

/// Child process in its own process group with stdout captured
pub struct ManagedProcess {
    child: Child,
    pub pid: u32,
    pub pgid: u32,
    stdout_rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
}

impl ManagedProcess {
    /// Spawn a new process in its own process group
    ///
    /// Stdin and stderr are attached to `/dev/null`. Stdout is drained
    /// on a reader thread so a chatty child never blocks on a full pipe.
    /// `env` is layered over the inherited environment of the child only.
    pub fn spawn(argv: &[String], env: &BTreeMap<String, String>) -> HostResult<Self> {
        if argv.is_empty() {
            return Err(HostError::SpawnFailed("Empty argv".into()));
        }

        let program = &argv[0];
        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        // SAFETY: setsid is async-signal-safe and is the only call made
        // between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        // Register under the sweep lock so the orphan reaper never sees
        // this child unowned.
        let child = {
            let mut owned = owned_children();
            let child = cmd.spawn().map_err(|e| {
                HostError::SpawnFailed(format!("Failed to spawn {}: {}", program, e))
            })?;
            owned.get_or_insert_with(HashSet::new).insert(child.id());
            child
        };

        let pid = child.id();
        let pgid = pid; // After setsid, pid == pgid

        let (tx, stdout_rx) = mpsc::channel();
        let mut proc = Self {
            child,
            pid,
            pgid,
            stdout_rx,
        };

        let started = match proc.child.stdout.take() {
            Some(mut stdout) => std::thread::Builder::new()
                .name(format!("hostfacts-stdout-{}", pid))
                .spawn(move || {
                    let mut buf = Vec::new();
                    let result = stdout.read_to_end(&mut buf).map(|_| buf);
                    let _ = tx.send(result);
                })
                .map(|_| ())
                .map_err(HostError::from),
            None => Err(HostError::Internal("stdout was not captured".into())),
        };

        if let Err(e) = started {
            let _ = proc.kill();
            let _ = proc.child.wait();
            return Err(e);
        }

        debug!(pid = pid, pgid = pgid, program = %program, "Process spawned");

        Ok(proc)
    }

    /// Send SIGKILL to the process group
    pub fn kill(&self) -> HostResult<()> {
        let pgid = Pid::from_raw(-(self.pgid as i32)); // Negative for process group

        match signal::kill(pgid, Signal::SIGKILL) {
            Ok(()) => {
                debug!(pgid = self.pgid, "Sent SIGKILL to process group");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => {
                // Process already gone
                Ok(())
            }
            Err(e) => Err(HostError::KillFailed(format!(
                "Failed to send SIGKILL: {}",
                e
            ))),
        }
    }

    /// Check if the process has exited (non-blocking)
    pub fn try_wait(&mut self) -> HostResult<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| HostError::Internal(format!("Wait failed: {}", e)))
    }

    /// Wait for exit and collect stdout, bounded by `timeout`
    ///
    /// `None` waits indefinitely. On timeout the whole process group is
    /// killed and the direct child is reaped before returning.
    pub fn wait_with_output(mut self, timeout: Option<Duration>) -> HostResult<CaptureOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let status = match deadline {
            None => self
                .child
                .wait()
                .map_err(|e| HostError::Internal(format!("Wait failed: {}", e)))?,
            Some(deadline) => loop {
                if let Some(status) = self.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    return self.abandon();
                }
                std::thread::sleep(POLL_INTERVAL);
            },
        };

        // A backgrounded grandchild can hold the pipe open past the
        // child's exit, so reading stdout honours the same deadline.
        let read = match deadline {
            None => self
                .stdout_rx
                .recv()
                .map_err(|_| HostError::Internal("stdout reader vanished".into()))?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.stdout_rx.recv_timeout(remaining) {
                    Ok(read) => read,
                    Err(mpsc::RecvTimeoutError::Timeout) => return self.abandon(),
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(HostError::Internal("stdout reader vanished".into()));
                    }
                }
            }
        };

        if !status.success() {
            debug!(pid = self.pid, status = ?status, "Process exited unsuccessfully");
        }

        Ok(CaptureOutcome::Completed {
            stdout: read?,
            status,
        })
    }

    fn abandon(mut self) -> HostResult<CaptureOutcome> {
        if let Err(e) = self.kill() {
            warn!(pgid = self.pgid, error = %e, "Failed to kill timed out process group");
        }
        // Our own child, so a blocking wait after SIGKILL is short.
        if let Err(e) = self.child.wait() {
            warn!(pid = self.pid, error = %e, "Failed to reap timed out process");
        }
        Ok(CaptureOutcome::TimedOut)
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // From here on an unwaited child is fair game for the reaper.
        release_child(self.pid);
    }
}
