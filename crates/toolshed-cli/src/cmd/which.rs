//! Which command

use anyhow::{Context as _, Result, bail};
use std::sync::Arc;

use toolshed_core::NullReporter;

use crate::GlobalArgs;
use crate::ops::context::Context;

/// Print the absolute path of the executable behind `command`.
///
/// Resolves the providing package from the manifests in scope and looks it
/// up in the store; nothing is installed.
///
/// # Errors
///
/// Fails if no manifest provides `command`, resolution fails, or the
/// package is not installed.
pub async fn which(global: &GlobalArgs, command: &str) -> Result<()> {
    let ctx = Context::new(global, Arc::new(NullReporter))?;
    let plan = ctx.plan(&ctx.plan_options()).await?;
    let Some(request) = plan.find_command(command) else {
        bail!(
            "'{command}' is not provided by any package in {} manifest(s) in scope",
            plan.manifests.len()
        );
    };

    let entry = ctx
        .coordinator
        .installed(request.clone(), &ctx.cancel)
        .await
        .with_context(|| format!("Run 'toolshed install' to install '{command}'"))?;
    let binary = entry
        .command_path(command)
        .with_context(|| format!("{} does not provide '{command}'", entry.key))?;
    println!("{}", binary.display());
    Ok(())
}
