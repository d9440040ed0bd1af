//! Engine configuration.
//!
//! Built once by the binary and shared by `Arc`. Nothing in the engine
//! reads the environment; the CLI translates its flags and variables into
//! an [`EngineConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parallelism used when nothing is configured.
pub const DEFAULT_MAX_PARALLELISM: usize = 5;

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` counts from 1 for the attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Immutable engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the store, shims, staging area and default ledger.
    pub root_dir: PathBuf,
    /// Maximum concurrent installs.
    pub max_parallelism: usize,
    /// Install at apply time instead of on first invocation.
    pub disable_lazy_install: bool,
    /// Skip every policy check. Logged as a trust-reducing state.
    pub disable_policy: bool,
    /// Treat a missing checksum as fatal.
    pub require_checksum: bool,
    /// Policy documents, in precedence order.
    pub policy_paths: Vec<PathBuf>,
    /// Timeout of a single network call.
    pub network_timeout: Duration,
    /// Optional deadline for a whole batch.
    pub batch_timeout: Option<Duration>,
    /// Retry policy for version lookups and downloads.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Defaults rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            disable_lazy_install: false,
            disable_policy: false,
            require_checksum: false,
            policy_paths: Vec::new(),
            network_timeout: Duration::from_secs(60),
            batch_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Directory holding shims.
    pub fn bin_dir(&self) -> PathBuf {
        self.root_dir.join("bin")
    }

    /// Directory holding published store entries.
    pub fn pkgs_dir(&self) -> PathBuf {
        self.root_dir.join("pkgs")
    }

    /// Staging directory. Lives under the root so publishing is a rename on
    /// one filesystem.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root_dir.join("tmp")
    }

    /// Default checksum ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.root_dir.join("checksums.json")
    }

    /// Default policy document, used when none is configured explicitly.
    pub fn default_policy_path(&self) -> PathBuf {
        self.root_dir.join("policy.toml")
    }

    /// Policy documents to load: the configured ones, then the default
    /// document if it exists.
    pub fn effective_policy_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.policy_paths.clone();
        let default = self.default_policy_path();
        if default.is_file() && !paths.contains(&default) {
            paths.push(default);
        }
        paths
    }
}

/// Outcome of interpreting a max-parallelism setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallelism {
    /// Effective value.
    pub value: usize,
    /// Set when the raw value could not be parsed and the default was used.
    pub fell_back: bool,
}

/// Interpret a raw max-parallelism setting.
///
/// Unset means [`DEFAULT_MAX_PARALLELISM`]; an unparsable value falls back to
/// the default (the caller should warn); zero or negative means the number of
/// available CPUs.
pub fn parse_max_parallelism(raw: Option<&str>) -> Parallelism {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Parallelism {
            value: DEFAULT_MAX_PARALLELISM,
            fell_back: false,
        };
    };
    match raw.parse::<i64>() {
        Ok(n) if n <= 0 => Parallelism {
            value: num_cpus::get().max(1),
            fell_back: false,
        },
        Ok(n) => Parallelism {
            value: usize::try_from(n).unwrap_or(usize::MAX),
            fell_back: false,
        },
        Err(_) => Parallelism {
            value: DEFAULT_MAX_PARALLELISM,
            fell_back: true,
        },
    }
}

/// Interpret a boolean toggle. Unset or empty means off.
///
/// # Errors
///
/// Returns the trimmed input if it is not one of `1/0`, `true/false`,
/// `yes/no` or `on/off` (case-insensitive).
pub fn parse_toggle(raw: Option<&str>) -> Result<bool, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(false);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(raw.to_string()),
    }
}

/// Split a colon-separated path list, joining relative entries to `cwd`.
pub fn split_path_list(raw: &str, cwd: &Path) -> Vec<PathBuf> {
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| if p.is_absolute() { p } else { cwd.join(p) })
        .collect()
}
