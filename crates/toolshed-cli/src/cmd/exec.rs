//! Exec command, the target of lazy shims.

use anyhow::{Context as _, Result, bail};
use std::process::ExitStatus;
use std::sync::Arc;

use crate::GlobalArgs;
use crate::ops::context::Context;
use crate::ui::LogReporter;

/// Install the package providing `command` if needed, then run it.
///
/// With lazy installation disabled only the store is consulted. Returns the
/// child's exit code.
///
/// # Errors
///
/// Fails if no manifest provides `command`, the package cannot be installed
/// (or is missing while lazy installation is disabled), or the child cannot
/// be started.
pub async fn exec(global: &GlobalArgs, command: &str, args: &[String]) -> Result<i32> {
    let ctx = Context::new(global, Arc::new(LogReporter))?;
    let plan = ctx.plan(&ctx.plan_options()).await?;

    let Some(request) = plan.find_command(command) else {
        bail!(
            "'{command}' is not provided by any package in {} manifest(s) in scope",
            plan.manifests.len()
        );
    };
    // The lazy shim stays in place; only the store entry is needed here.
    let mut request = request.clone();
    request.skip_link = true;

    let entry = ctx.coordinator.ensure_installed(request, &ctx.cancel).await?;
    let binary = entry
        .command_path(command)
        .with_context(|| format!("{} does not provide '{command}'", entry.key))?;

    tracing::debug!("exec {} {args:?}", binary.display());
    let status = tokio::process::Command::new(&binary)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", binary.display()))?;
    Ok(exit_code(status))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
