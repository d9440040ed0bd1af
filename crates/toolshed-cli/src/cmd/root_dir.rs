//! Root-dir command

use anyhow::{Context as _, Result};

use crate::GlobalArgs;
use crate::ops::settings;

/// Print the root directory
///
/// # Errors
///
/// Fails if the working directory or home directory cannot be determined.
pub fn root_dir(global: &GlobalArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    println!("{}", settings::root_dir(global, &cwd)?.display());
    Ok(())
}
