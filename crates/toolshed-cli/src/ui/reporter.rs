//! Reporter that writes install progress to the log.

use toolshed_core::Reporter;
use toolshed_schema::Package;

/// Routes engine progress through `tracing`.
///
/// Transitions are `debug`, completions `info`, problems `warn`/`error`,
/// so the default filter shows one line per package.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn resolving(&self, package: &Package) {
        tracing::debug!("resolving {package}");
    }

    fn downloading(&self, package: &Package, asset: &str, bytes: u64) {
        tracing::debug!("downloaded {asset} for {package} ({bytes} bytes)");
    }

    fn installing(&self, package: &Package) {
        tracing::debug!("installing {package}");
    }

    fn done(&self, package: &Package, detail: &str) {
        tracing::info!("{package} {detail}");
    }

    fn failed(&self, package: &Package, reason: &str) {
        tracing::error!("{package} failed: {reason}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
}
