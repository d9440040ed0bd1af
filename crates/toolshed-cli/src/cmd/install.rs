//! Install command

use anyhow::{Context as _, Result, bail};
use std::sync::Arc;

use toolshed_core::{BatchOptions, PlanOptions, Reporter};

use crate::GlobalArgs;
use crate::ops::context::Context;
use crate::ops::ux::perform_ux_checks;
use crate::ui::LogReporter;

/// Flags of `toolshed install`.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Create lazy shims instead of installing.
    pub only_link: bool,
    /// Keep only packages having one of these tags.
    pub tags: Vec<String>,
    /// Drop packages having one of these tags.
    pub exclude_tags: Vec<String>,
    /// Reinstall artifacts already in the store.
    pub force: bool,
    /// Cancel the batch on the first failure.
    pub all_or_nothing: bool,
}

/// Install (or link) every package of the manifests in scope.
///
/// # Errors
///
/// Fails if planning fails, a shim cannot be written, or any package fails
/// to install.
pub async fn install(global: &GlobalArgs, options: InstallOptions) -> Result<()> {
    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter);
    let ctx = Context::new(global, Arc::clone(&reporter))?;

    let plan_options = PlanOptions {
        tags: options.tags,
        exclude_tags: options.exclude_tags,
        force_reinstall: options.force,
        ..ctx.plan_options()
    };
    let plan = ctx.plan(&plan_options).await?;
    if plan.requests.is_empty() {
        println!("Nothing to install.");
        return Ok(());
    }
    let commands: Vec<String> = plan
        .requests
        .iter()
        .flat_map(|r| r.info.commands())
        .collect();
    let bin_dir = ctx.config.bin_dir();

    if options.only_link && ctx.config.disable_lazy_install {
        reporter.warning("Lazy install is disabled; installing instead of only linking");
    } else if options.only_link {
        let toolshed = std::env::current_exe().context("Failed to locate the toolshed executable")?;
        let linked = ctx.coordinator.link_lazy(&plan.requests, &toolshed)?;
        println!("Linked {} command(s) into {}", linked.len(), bin_dir.display());
        perform_ux_checks(&bin_dir, &commands, reporter.as_ref());
        return Ok(());
    }

    let total = plan.requests.len();
    let batch = BatchOptions {
        all_or_nothing: options.all_or_nothing,
        cancel: ctx.cancel.clone(),
    };
    let outcomes = ctx.coordinator.install_all(plan.requests, &batch).await;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();

    println!("Installed {} of {total} package(s)", total - failed);
    perform_ux_checks(&bin_dir, &commands, reporter.as_ref());

    if failed > 0 {
        bail!("{failed} of {total} package(s) failed to install");
    }
    Ok(())
}
