//! Update-checksum command

use anyhow::{Result, bail};
use std::sync::Arc;

use toolshed_core::{ChecksumLedger, ChecksumUpdater};

use crate::GlobalArgs;
use crate::ops::context::Context;
use crate::ui::LogReporter;

/// Record the digest of every package's asset for the host platform.
///
/// # Errors
///
/// Fails if planning fails, the ledger cannot be read or written, or any
/// package cannot be checksummed.
pub async fn update_checksum(global: &GlobalArgs, overwrite: bool) -> Result<()> {
    let ctx = Context::new(global, Arc::new(LogReporter))?;
    let plan = ctx.plan(&ctx.plan_options()).await?;

    let path = ctx.config.ledger_path();
    let ledger = ChecksumLedger::load(&path)?;
    let updater = ChecksumUpdater::new(
        ctx.coordinator.clone(),
        ledger,
        &path,
        ctx.config.max_parallelism,
    );
    let report = updater.update(plan.requests, overwrite, &ctx.cancel).await?;

    for record in &report.kept {
        tracing::warn!(
            "Kept existing checksum for {}@{} ({}); pass --overwrite to replace it",
            record.package,
            record.version,
            record.asset
        );
    }
    for (package, err) in &report.failures {
        tracing::error!("{package}: {err}");
    }
    println!(
        "{}: {} added, {} replaced, {} unchanged, {} kept",
        path.display(),
        report.added,
        report.replaced,
        report.unchanged,
        report.kept.len()
    );

    if !report.failures.is_empty() {
        bail!("{} package(s) could not be checksummed", report.failures.len());
    }
    Ok(())
}
