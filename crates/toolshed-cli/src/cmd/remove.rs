//! Remove command

use anyhow::{Context as _, Result, bail};

use toolshed_core::shim::unlink_entry;
use toolshed_core::{Store, StoreEntry};

use crate::GlobalArgs;
use crate::ops::settings::engine_config;

/// Returns `true` if `entry` is selected by `spec`: a package name with or
/// without its registry prefix, optionally followed by `@<version>`.
fn selects(entry: &StoreEntry, spec: &str) -> bool {
    let (name, version) = match spec.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() => (name, Some(version)),
        _ => (spec, None),
    };
    let package = entry.key.package.as_str();
    let name_matches =
        package == name || package.split_once('/').is_some_and(|(_, bare)| bare == name);
    name_matches && version.is_none_or(|v| entry.key.version.as_str() == v)
}

/// Delete store entries and the shims pointing into them.
///
/// Every spec must match at least one entry; nothing is removed otherwise.
///
/// # Errors
///
/// Fails if the configuration is invalid, a spec matches nothing, or an
/// entry or shim cannot be deleted.
pub fn remove(global: &GlobalArgs, packages: &[String], all: bool) -> Result<()> {
    if packages.is_empty() && !all {
        bail!("Name at least one package to remove, or pass --all");
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let config = engine_config(global, &cwd)?;
    let store = Store::new(config.pkgs_dir(), config.tmp_dir());
    let bin_dir = config.bin_dir();

    let selected: Vec<StoreEntry> = store
        .installed()
        .into_iter()
        .filter(|entry| all || packages.iter().any(|spec| selects(entry, spec)))
        .collect();
    if let Some(spec) = packages
        .iter()
        .find(|spec| !selected.iter().any(|entry| selects(entry, spec)))
    {
        bail!("'{spec}' is not installed");
    }

    for entry in &selected {
        let unlinked = unlink_entry(&bin_dir, entry)?;
        store.remove(&entry.key)?;
        println!(
            "Removed {}@{} ({} shim(s))",
            entry.key.package,
            entry.key.version,
            unlinked.len()
        );
    }
    if selected.is_empty() {
        println!("No packages installed.");
    }
    Ok(())
}
