//! List command

use anyhow::{Context as _, Result};

use toolshed_core::Store;

use crate::GlobalArgs;
use crate::ops::settings::engine_config;
use crate::ui::table::entries_table;

/// List published store entries
///
/// # Errors
///
/// Fails if the configuration is invalid.
pub fn list(global: &GlobalArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let config = engine_config(global, &cwd)?;
    let entries = Store::new(config.pkgs_dir(), config.tmp_dir()).installed();

    if entries.is_empty() {
        println!();
        println!("  No packages installed.");
        println!("  Run 'toolshed install' in a directory with a toolshed.toml to get started.");
        return Ok(());
    }

    println!("{}", entries_table(&entries));
    println!("{} package(s) in {}", entries.len(), config.pkgs_dir().display());
    Ok(())
}
