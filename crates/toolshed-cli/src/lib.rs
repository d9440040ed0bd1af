//! toolshed - declarative CLI tool version manager
//!
//! Installs the tools listed in `toolshed.toml` files into a shared store and
//! exposes them through shims in `<root>/bin`.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.toolshed/
//! ├── bin/             # Shims (eager symlinks or lazy `toolshed exec` scripts)
//! ├── pkgs/            # Published store entries by registry/package/version/asset
//! ├── tmp/             # Staging area, same volume as pkgs/
//! ├── checksums.json   # Checksum ledger
//! └── policy.toml      # Default policy document
//! ```

pub mod cmd;
pub mod ops;
pub mod ui;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line of the `toolshed` binary.
#[derive(Debug, Parser)]
#[command(name = "toolshed")]
#[command(author, version, about = "toolshed - declarative CLI tool version manager")]
pub struct Cli {
    /// Settings shared by every command.
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every command. Each flag falls back to its variable.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Root directory for shims, store and ledger [default: ~/.toolshed]
    #[arg(long, global = true, env = "TOOLSHED_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Explicit manifest, searched before the working directory
    #[arg(short = 'c', long = "config", global = true, env = "TOOLSHED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Global manifests (colon-separated), searched after the working directory
    #[arg(long, global = true, env = "TOOLSHED_GLOBAL_CONFIG")]
    pub global_config: Option<String>,

    /// Policy documents (colon-separated)
    #[arg(long, global = true, env = "TOOLSHED_POLICY_CONFIG")]
    pub policy_config: Option<String>,

    /// Concurrent installs; 0 or less means one per CPU
    #[arg(long, global = true, env = "TOOLSHED_MAX_PARALLELISM")]
    pub max_parallelism: Option<String>,

    /// Install eagerly instead of creating lazy shims
    #[arg(long, global = true, env = "TOOLSHED_DISABLE_LAZY_INSTALL",
          num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub disable_lazy_install: Option<String>,

    /// Trust every manifest and registry
    #[arg(long, global = true, env = "TOOLSHED_DISABLE_POLICY",
          num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub disable_policy: Option<String>,

    /// Fail installs that have no expected checksum
    #[arg(long, global = true, env = "TOOLSHED_REQUIRE_CHECKSUM",
          num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub require_checksum: Option<String>,

    /// Token for the GitHub API (raises rate limits)
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Log filter (e.g. `debug`, `toolshed_core=trace`)
    #[arg(long, global = true, env = "TOOLSHED_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install the packages of every manifest in scope
    Install {
        /// Only create shims; install nothing now
        #[arg(long)]
        only_link: bool,
        /// Keep packages having any of these tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Drop packages having any of these tags
        #[arg(long, value_delimiter = ',')]
        exclude_tags: Vec<String>,
        /// Reinstall even if the store already holds the artifact
        #[arg(long, short = 'f')]
        force: bool,
        /// Stop the whole batch on the first failure
        #[arg(long)]
        all_or_nothing: bool,
    },
    /// Run a managed command, installing it first if needed
    Exec {
        /// Command name
        command: String,
        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Record checksums of every package in scope
    #[command(name = "update-checksum")]
    UpdateChecksum {
        /// Replace records that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// List upstream versions of a package from the manifests in scope
    Versions {
        /// Package name as written in the manifest
        package: String,
        /// Fuzzy filter over version strings
        #[arg(long, short = 'q')]
        query: Option<String>,
        /// Show at most this many versions
        #[arg(long, default_value_t = 30)]
        limit: usize,
        /// Include prereleases
        #[arg(long)]
        prerelease: bool,
    },
    /// List published store entries
    List,
    /// Delete installed packages and the shims pointing into them
    Remove {
        /// Packages as `name`, `registry/name` or `name@version`
        packages: Vec<String>,
        /// Remove every installed package
        #[arg(long, conflicts_with = "packages")]
        all: bool,
    },
    /// Print the path of the executable behind a command
    Which {
        /// Command name
        command: String,
    },
    /// Print the root directory
    #[command(name = "root-dir")]
    RootDir,
    /// Policy commands
    Policy {
        /// The policy subcommand to run.
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

/// Subcommands of `toolshed policy`.
#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Check whether a manifest is trusted by the configured policy
    Check {
        /// Manifest path
        path: PathBuf,
    },
}
