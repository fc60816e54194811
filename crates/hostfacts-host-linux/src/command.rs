//! Command lookup and expansion

use std::ffi::OsStr;
use std::path::PathBuf;
use tracing::debug;

/// System binary directories searched after `PATH`
pub const EXTRA_SEARCH_PATHS: &[&str] = &["/sbin", "/usr/sbin"];

/// Directories searched for bare command names
///
/// `PATH` entries come first, followed by [`EXTRA_SEARCH_PATHS`].
pub fn search_paths() -> Vec<PathBuf> {
    search_paths_in(std::env::var_os("PATH").as_deref())
}

/// Directories searched for bare command names, given a `PATH` value
pub fn search_paths_in(path: Option<&OsStr>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = path
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();
    dirs.retain(|p| !p.as_os_str().is_empty());
    for extra in EXTRA_SEARCH_PATHS {
        let extra = PathBuf::from(extra);
        if !dirs.contains(&extra) {
            dirs.push(extra);
        }
    }
    dirs
}

/// Locate an executable
///
/// Names containing a `/` are checked as paths. Bare names are searched
/// for in [`search_paths`].
pub fn which(bin: &str) -> Option<PathBuf> {
    which_in(bin, None)
}

/// Locate an executable, searching `path` instead of the inherited `PATH`
pub fn which_in(bin: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    if bin.is_empty() {
        return None;
    }

    let dirs = match path {
        Some(path) => search_paths_in(Some(path)),
        None => search_paths(),
    };
    let joined = match std::env::join_paths(&dirs) {
        Ok(joined) => joined,
        Err(e) => {
            debug!(error = %e, "Unusable search path");
            return None;
        }
    };
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

    ::which::which_in(bin, Some(joined), cwd).ok()
}

/// Split a command line into its binary and the remainder
///
/// The binary may be wrapped in single or double quotes to allow spaces.
/// The remainder keeps its leading whitespace.
pub fn split_command(command: &str) -> (&str, &str) {
    let command = command.trim_start();

    for quote in ['"', '\''] {
        if let Some(rest) = command.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                return (&rest[..end], &rest[end + 1..]);
            }
        }
    }

    match command.find(char::is_whitespace) {
        Some(idx) => (&command[..idx], &command[idx..]),
        None => (command, ""),
    }
}

/// Replace the binary of `command` with its absolute path
///
/// Returns `None` when the binary cannot be found. Paths containing
/// spaces are quoted so the result stays a valid shell command line.
pub fn expand_command(command: &str) -> Option<String> {
    expand_command_in(command, None)
}

/// Like [`expand_command`], searching `path` instead of the inherited `PATH`
pub fn expand_command_in(command: &str, path: Option<&OsStr>) -> Option<String> {
    let (bin, rest) = split_command(command);
    let Some(path) = which_in(bin, path) else {
        debug!(bin = %bin, "Command binary not found");
        return None;
    };

    let path = path.to_string_lossy();
    let expanded = if path.contains(char::is_whitespace) {
        format!("\"{}\"{}", path, rest)
    } else {
        format!("{}{}", path, rest)
    };

    debug!(command = %command, expanded = %expanded, "Expanded command");
    Some(expanded)
}
