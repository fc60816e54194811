//! Non-blocking reaping of orphaned children
//!
//! A computation abandoned on timeout may have spawned children through
//! plain `std::process::Command` handles that will never be waited on.
//! Once those exit they linger as zombies. The sweep here collects them
//! without touching children that existed before the computation started,
//! children owned by a live [`ManagedProcess`], or children protected by a
//! [`ChildClaim`].
//!
//! [`ManagedProcess`]: crate::ManagedProcess

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Pids of children owned by a live `ManagedProcess`
static OWNED_CHILDREN: Mutex<Option<HashSet<u32>>> = Mutex::new(None);

pub(crate) fn owned_children() -> MutexGuard<'static, Option<HashSet<u32>>> {
    OWNED_CHILDREN.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn release_child(pid: u32) {
    if let Some(owned) = owned_children().as_mut() {
        owned.remove(&pid);
    }
}

/// Keeps a child out of the orphan sweep while held
///
/// For code that spawns through plain `std::process::Command` and waits
/// on the child later.
#[derive(Debug)]
pub struct ChildClaim {
    pid: u32,
}

/// Protect the child `pid` from the orphan sweep until the claim is dropped
pub fn claim_child(pid: u32) -> ChildClaim {
    owned_children().get_or_insert_with(HashSet::new).insert(pid);
    ChildClaim { pid }
}

impl Drop for ChildClaim {
    fn drop(&mut self) {
        release_child(self.pid);
    }
}

/// Pids of the current children of this process
pub fn child_pids() -> HashSet<u32> {
    let me = std::process::id();
    match std::fs::read_dir("/proc") {
        Ok(entries) => entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&pid| read_stat(pid).is_some_and(|(_, ppid)| ppid == me))
            .collect(),
        Err(e) => {
            debug!(error = %e, "Cannot scan /proc for children");
            HashSet::new()
        }
    }
}

/// Collect exited children of this process, except `known` and owned ones
///
/// `known` is normally a [`child_pids`] snapshot taken before the
/// abandoned work started, so only children born while it ran are
/// candidates. Never blocks: running children are left alone. A child
/// born in that window that other code holds a `std::process::Child` for
/// without a [`ChildClaim`] is indistinguishable from an orphan and may be
/// reaped. Failures end the sweep silently.
pub fn reap_orphans_except(known: &HashSet<u32>) -> usize {
    // Held for the whole sweep so a concurrent spawn cannot be reaped
    // before it is registered.
    let owned = owned_children();
    let me = std::process::id();

    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "Cannot scan /proc for orphans");
            return 0;
        }
    };

    let mut reaped = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if known.contains(&pid) || owned.as_ref().is_some_and(|o| o.contains(&pid)) {
            continue;
        }
        let Some((state, ppid)) = read_stat(pid) else {
            continue;
        };
        if ppid != me || state != 'Z' {
            continue;
        }

        match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => {
                debug!(pid = pid, status = ?status, "Reaped orphaned child");
                reaped += 1;
            }
            Err(Errno::ECHILD) => {}
            Err(e) => {
                debug!(pid = pid, error = %e, "Orphan sweep stopped");
                break;
            }
        }
    }

    reaped
}

/// Read the state letter and parent pid from `/proc/<pid>/stat`
fn read_stat(pid: u32) -> Option<(char, u32)> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&stat)
}

fn parse_stat(stat: &str) -> Option<(char, u32)> {
    // The command name is parenthesised and may itself contain spaces
    // or parentheses, so fields are counted from the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    // Sweeps in this module would otherwise collect each other's children.
    static SWEEP: Mutex<()> = Mutex::new(());

    fn exited_child() -> Child {
        let child = Command::new("/bin/sh").args(["-c", "exit 0"]).spawn().unwrap();
        let pid = child.id();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && read_stat(pid).map(|(state, _)| state) != Some('Z') {
            std::thread::sleep(Duration::from_millis(10));
        }
        child
    }

    #[test]
    fn parse_stat_handles_odd_names() {
        assert_eq!(parse_stat("1234 (sleep) S 99 1234 1234 0"), Some(('S', 99)));
        assert_eq!(parse_stat("77 (a) b (c)) Z 12 77 77 0"), Some(('Z', 12)));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn reaps_exited_unowned_child() {
        let _sweep = SWEEP.lock().unwrap_or_else(|e| e.into_inner());
        let before = child_pids();

        let child = exited_child();
        let pid = child.id();
        assert!(child_pids().contains(&pid));
        // Give up ownership: nobody will ever call wait() on it.
        drop(child);

        assert!(reap_orphans_except(&before) >= 1);
        assert_eq!(
            waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)),
            Err(Errno::ECHILD)
        );
    }

    #[test]
    fn sweep_spares_known_and_claimed_children() {
        let _sweep = SWEEP.lock().unwrap_or_else(|e| e.into_inner());

        let mut earlier = exited_child();
        let before = child_pids();
        let mut claimed = exited_child();
        let claim = claim_child(claimed.id());

        assert_eq!(reap_orphans_except(&before), 0);
        assert!(earlier.wait().unwrap().success());
        assert!(claimed.wait().unwrap().success());
        drop(claim);
    }
}
