//! Command shims in the bin directory.
//!
//! Eager shims point straight at a published executable. Lazy shims call
//! back into `toolshed exec <command>`, which installs the providing package
//! on first use.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EngineError;
use crate::store::StoreEntry;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What a shim dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimTarget {
    /// A published executable.
    Binary(PathBuf),
    /// `<toolshed> exec <command>`.
    Lazy {
        /// Path of the toolshed executable.
        toolshed: PathBuf,
    },
}

/// Path of the shim for `command` in `bin_dir`.
pub fn shim_path(bin_dir: &Path, command: &str) -> PathBuf {
    if cfg!(windows) {
        bin_dir.join(format!("{command}.cmd"))
    } else {
        bin_dir.join(command)
    }
}

/// Check that `command` can name a file in the bin directory: non-empty,
/// not `.` or `..`, and made only of ASCII letters, digits and `._+-`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCommand`] naming the broken rule.
pub fn validate_command_name(command: &str) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::InvalidCommand {
        command: command.to_string(),
        reason,
    };
    if command.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }
    if command == "." || command == ".." {
        return Err(invalid("name is a path component".to_string()));
    }
    match command
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')))
    {
        Some(c) => Err(invalid(format!("character {c:?} is not allowed"))),
        None => Ok(()),
    }
}

/// Create or replace the shim for `command`.
///
/// The shim is written under a temporary name and renamed into place, so a
/// concurrent invocation never sees a missing or half-written shim.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCommand`] for a name
/// [`validate_command_name`] rejects, or [`EngineError::Io`] if the bin
/// directory or shim cannot be written.
pub fn create_shim(bin_dir: &Path, command: &str, target: &ShimTarget) -> Result<PathBuf, EngineError> {
    validate_command_name(command)?;
    fs::create_dir_all(bin_dir).map_err(|e| EngineError::io_at("create", bin_dir, &e))?;
    let final_path = shim_path(bin_dir, command);
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = bin_dir.join(format!(".{command}.{}.{n}.tmp", std::process::id()));
    let _ = fs::remove_file(&temp_path);

    write_shim(&temp_path, command, target)
        .map_err(|e| EngineError::io_at("write shim", &temp_path, &e))?;
    fs::rename(&temp_path, &final_path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        EngineError::io_at("install shim", &final_path, &e)
    })?;

    tracing::debug!("Linked {} -> {target:?}", final_path.display());
    Ok(final_path)
}

/// Delete the shim for `command`, returning whether one existed.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCommand`] for an invalid name, or
/// [`EngineError::Io`] if an existing shim cannot be deleted.
pub fn remove_shim(bin_dir: &Path, command: &str) -> Result<bool, EngineError> {
    validate_command_name(command)?;
    let path = shim_path(bin_dir, command);
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::debug!("Unlinked {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(EngineError::io_at("remove shim", &path, &e)),
    }
}

/// Returns `true` if the shim at `shim` dispatches into `dir`.
#[cfg(unix)]
fn points_into(shim: &Path, dir: &Path) -> bool {
    fs::read_link(shim).is_ok_and(|target| target.starts_with(dir))
}

#[cfg(not(unix))]
fn points_into(shim: &Path, dir: &Path) -> bool {
    fs::read_to_string(shim).is_ok_and(|script| script.contains(&*dir.to_string_lossy()))
}

/// Delete the eager shims in `bin_dir` that point into `entry`. Lazy shims
/// and shims now owned by another entry are left alone.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if a matching shim cannot be deleted.
pub fn unlink_entry(bin_dir: &Path, entry: &StoreEntry) -> Result<Vec<PathBuf>, EngineError> {
    let mut removed = Vec::new();
    for file in &entry.marker.files {
        let path = shim_path(bin_dir, &file.name);
        if points_into(&path, &entry.path) && remove_shim(bin_dir, &file.name)? {
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Wrap `value` in single quotes for `/bin/sh`.
#[cfg(unix)]
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn write_shim(path: &Path, command: &str, target: &ShimTarget) -> std::io::Result<()> {
    match target {
        ShimTarget::Binary(binary) => std::os::unix::fs::symlink(binary, path),
        ShimTarget::Lazy { toolshed } => {
            let script = format!(
                "#!/bin/sh\nexec {} exec {} \"$@\"\n",
                sh_quote(&toolshed.display().to_string()),
                sh_quote(command)
            );
            fs::write(path, script)?;
            crate::extract::make_executable(path)
        }
    }
}

#[cfg(not(unix))]
fn write_shim(path: &Path, command: &str, target: &ShimTarget) -> std::io::Result<()> {
    let script = match target {
        ShimTarget::Binary(binary) => {
            format!("@echo off\r\n\"{}\" %*\r\n", binary.display())
        }
        ShimTarget::Lazy { toolshed } => {
            format!(
                "@echo off\r\n\"{}\" exec {command} %*\r\n",
                toolshed.display()
            )
        }
    };
    fs::write(path, script)
}
