//! Policy commands

use anyhow::{Context as _, Result, bail};
use std::path::Path;

use toolshed_core::PolicyEnforcer;
use toolshed_core::policy::{Decision, PolicyTarget, normalize_path};

use crate::GlobalArgs;
use crate::ops::settings::engine_config;

/// Report whether the configured policy trusts the manifest at `path`.
///
/// # Errors
///
/// Fails if the policy cannot be loaded or denies `path`.
pub fn check(global: &GlobalArgs, path: &Path) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let config = engine_config(global, &cwd)?;
    let policy = PolicyEnforcer::from_config(&config)?;
    let path = normalize_path(&cwd.join(path));

    match policy.evaluate(PolicyTarget::Config, &path.display().to_string()) {
        Decision::Inactive => {
            println!("{}: trusted (no policy in effect)", path.display());
        }
        Decision::Allowed { document, rule } => {
            println!(
                "{}: allowed by rule #{} of {}",
                path.display(),
                rule + 1,
                document.display()
            );
        }
        Decision::Denied => bail!("{}: not allowed by any policy rule", path.display()),
    }
    Ok(())
}
