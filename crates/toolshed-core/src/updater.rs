//! `update-checksum`: download assets and record their digests.

use std::path::PathBuf;

use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use toolshed_schema::{ChecksumAlgorithm, Package};

use crate::checksum::{self, ChecksumLedger, ChecksumRecord, InsertOutcome};
use crate::coordinator::InstallCoordinator;
use crate::error::EngineError;
use crate::installer::InstallRequest;

/// Counts of what an update did.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Records added.
    pub added: usize,
    /// Records already present and identical.
    pub unchanged: usize,
    /// Differing records left in place because `overwrite` was off.
    pub kept: Vec<ChecksumRecord>,
    /// Records replaced.
    pub replaced: usize,
    /// Requests that could not be processed.
    pub failures: Vec<(Package, EngineError)>,
}

/// Computes and persists ledger records. Ledger writes are serialized.
#[derive(Debug)]
pub struct ChecksumUpdater {
    coordinator: InstallCoordinator,
    ledger: Mutex<ChecksumLedger>,
    path: PathBuf,
    parallelism: usize,
}

impl ChecksumUpdater {
    /// Updater writing to the ledger at `path`, starting from `ledger`.
    pub fn new(
        coordinator: InstallCoordinator,
        ledger: ChecksumLedger,
        path: impl Into<PathBuf>,
        parallelism: usize,
    ) -> Self {
        Self {
            coordinator,
            ledger: Mutex::new(ledger),
            path: path.into(),
            parallelism: parallelism.max(1),
        }
    }

    /// Download every request's asset, record its digest and save the
    /// ledger. Existing records are replaced only with `overwrite`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if the ledger cannot be saved.
    /// Per-request failures are collected in the report.
    pub async fn update(
        &self,
        requests: Vec<InstallRequest>,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, EngineError> {
        let results: Vec<_> = stream::iter(requests)
            .map(|request| async move {
                let package = request.package.clone();
                (package, self.compute(request, cancel).await)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut report = UpdateReport::default();
        let mut ledger = self.ledger.lock().await;
        for (package, result) in results {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping {package}: {e}");
                    report.failures.push((package, e));
                    continue;
                }
            };
            match ledger.insert(record.clone(), overwrite) {
                InsertOutcome::Added => report.added += 1,
                InsertOutcome::Unchanged => report.unchanged += 1,
                InsertOutcome::Replaced => {
                    tracing::info!("Replaced checksum of {}@{}", record.package, record.version);
                    report.replaced += 1;
                }
                InsertOutcome::Kept => {
                    tracing::warn!(
                        "Checksum of {}@{} ({}) differs from the ledger; pass --overwrite to replace it",
                        record.package,
                        record.version,
                        record.asset
                    );
                    report.kept.push(record);
                }
            }
        }

        if report.added > 0 || report.replaced > 0 {
            ledger.save(&self.path)?;
        }
        Ok(report)
    }

    /// A snapshot of the current ledger.
    pub async fn ledger(&self) -> ChecksumLedger {
        self.ledger.lock().await.clone()
    }

    async fn compute(
        &self,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<ChecksumRecord, EngineError> {
        let request = self.coordinator.resolve(request, cancel).await?;
        let installer = self.coordinator.installer();
        let prepared = installer.prepare(request)?;
        let algorithm = prepared
            .asset
            .checksum
            .as_ref()
            .map_or_else(ChecksumAlgorithm::default, |c| c.algorithm);

        let staging = installer.store().stage()?;
        let archive = installer
            .download_asset(&prepared, staging.path(), cancel)
            .await?;
        let digest = checksum::compute_digest_async(&archive, algorithm).await?;

        let key = prepared.key;
        Ok(ChecksumRecord {
            package: key.package,
            version: key.version.to_string(),
            asset: key.asset,
            algorithm,
            digest,
        })
    }
}
