//! Flags and variables to [`EngineConfig`].

use anyhow::{Context as _, Result, anyhow};
use std::path::{Path, PathBuf};

use toolshed_core::config::{parse_max_parallelism, parse_toggle, split_path_list};
use toolshed_core::EngineConfig;

use crate::GlobalArgs;

/// Directory used when no root is configured.
///
/// # Errors
///
/// Fails if the home directory is unknown.
pub fn default_root_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".toolshed"))
        .context("Could not determine home directory; set TOOLSHED_ROOT_DIR")
}

/// The configured root directory, absolute.
///
/// # Errors
///
/// See [`default_root_dir`].
pub fn root_dir(global: &GlobalArgs, cwd: &Path) -> Result<PathBuf> {
    match &global.root_dir {
        Some(dir) if dir.is_absolute() => Ok(dir.clone()),
        Some(dir) => Ok(cwd.join(dir)),
        None => default_root_dir(),
    }
}

fn toggle(var: &str, raw: Option<&str>) -> Result<bool> {
    parse_toggle(raw).map_err(|value| {
        anyhow!("{var}: invalid value '{value}' (expected 1/0, true/false or yes/no)")
    })
}

/// Build the engine configuration.
///
/// # Errors
///
/// Fails if the root directory is unknown or a toggle is malformed.
pub fn engine_config(global: &GlobalArgs, cwd: &Path) -> Result<EngineConfig> {
    let mut config = EngineConfig::new(root_dir(global, cwd)?);

    let parallelism = parse_max_parallelism(global.max_parallelism.as_deref());
    if parallelism.fell_back {
        tracing::warn!(
            "TOOLSHED_MAX_PARALLELISM={} is not a number; using {}",
            global.max_parallelism.as_deref().unwrap_or_default(),
            parallelism.value
        );
    }
    config.max_parallelism = parallelism.value;

    config.disable_lazy_install = toggle(
        "TOOLSHED_DISABLE_LAZY_INSTALL",
        global.disable_lazy_install.as_deref(),
    )?;
    config.disable_policy = toggle("TOOLSHED_DISABLE_POLICY", global.disable_policy.as_deref())?;
    config.require_checksum = toggle(
        "TOOLSHED_REQUIRE_CHECKSUM",
        global.require_checksum.as_deref(),
    )?;
    config.policy_paths = global
        .policy_config
        .as_deref()
        .map(|raw| split_path_list(raw, cwd))
        .unwrap_or_default();

    Ok(config)
}

/// Global manifests, absolute.
pub fn global_configs(global: &GlobalArgs, cwd: &Path) -> Vec<PathBuf> {
    global
        .global_config
        .as_deref()
        .map(|raw| split_path_list(raw, cwd))
        .unwrap_or_default()
}
