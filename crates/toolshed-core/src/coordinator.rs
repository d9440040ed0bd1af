//! Batch installation.
//!
//! The coordinator resolves versions, runs installs on a bounded pool and
//! makes sure two requests for the same artifact never write the store at
//! the same time: the first claimer of an [`ArtifactKey`] installs it and
//! everyone else waiting on that key receives a clone of its result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use toolshed_schema::Package;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::installer::{InstallRequest, PackageInstaller, PreparedInstall};
use crate::shim::{self, ShimTarget};
use crate::store::{ArtifactKey, StoreEntry};
use crate::version::VersionGetter;

type SharedResult = Arc<OnceCell<Result<StoreEntry, EngineError>>>;

/// How a batch is run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Cancel the rest of the batch after the first failure.
    pub all_or_nothing: bool,
    /// External cancellation signal.
    pub cancel: CancellationToken,
}

/// Result of one request in a batch.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// The package as requested (resolved when resolution succeeded).
    pub package: Package,
    /// Published entry or the reason it failed.
    pub result: Result<StoreEntry, EngineError>,
}

impl InstallOutcome {
    /// Returns `true` if the request installed (or found) its entry.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

struct Inner {
    installer: PackageInstaller,
    versions: VersionGetter,
    max_parallelism: usize,
    batch_timeout: Option<Duration>,
    lazy_install: bool,
    in_flight: Mutex<HashMap<ArtifactKey, SharedResult>>,
}

/// Schedules installs. Cheap to clone; clones share the dedup table.
#[derive(Clone)]
pub struct InstallCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InstallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallCoordinator")
            .field("installer", &self.inner.installer)
            .field("max_parallelism", &self.inner.max_parallelism)
            .field("batch_timeout", &self.inner.batch_timeout)
            .finish_non_exhaustive()
    }
}

impl InstallCoordinator {
    /// Create a coordinator using the parallelism and deadline of `config`.
    pub fn new(config: &EngineConfig, installer: PackageInstaller, versions: VersionGetter) -> Self {
        Self {
            inner: Arc::new(Inner {
                installer,
                versions,
                max_parallelism: config.max_parallelism.max(1),
                batch_timeout: config.batch_timeout,
                lazy_install: !config.disable_lazy_install,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The underlying installer.
    pub fn installer(&self) -> &PackageInstaller {
        &self.inner.installer
    }

    /// The version getter used to resolve unpinned requests.
    pub fn versions(&self) -> &VersionGetter {
        &self.inner.versions
    }

    /// Install every request, at most `max_parallelism` at a time.
    ///
    /// Outcomes are returned in request order. One failure does not affect
    /// siblings unless `all_or_nothing` is set, in which case the remaining
    /// requests are cancelled. Requests that had not started when the batch
    /// was cancelled report [`EngineError::Cancelled`]; entries published
    /// before that stay in the store.
    pub async fn install_all(
        &self,
        requests: Vec<InstallRequest>,
        options: &BatchOptions,
    ) -> Vec<InstallOutcome> {
        let batch = options.cancel.child_token();
        let deadline = self.inner.batch_timeout.map(|timeout| {
            let batch = batch.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => {
                        tracing::warn!("Batch deadline of {}s reached, cancelling", timeout.as_secs());
                        batch.cancel();
                    }
                    () = batch.cancelled() => {}
                }
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.inner.max_parallelism));
        let mut set = JoinSet::new();
        let mut packages = Vec::with_capacity(requests.len());

        for (index, request) in requests.into_iter().enumerate() {
            packages.push(request.package.clone());
            let this = self.clone();
            let semaphore = semaphore.clone();
            let batch = batch.clone();
            set.spawn(async move {
                let result = async {
                    let _permit = tokio::select! {
                        biased;
                        () = batch.cancelled() => return Err(EngineError::Cancelled),
                        permit = semaphore.acquire_owned() => {
                            permit.map_err(|_| EngineError::Cancelled)?
                        }
                    };
                    this.run(request, &batch).await
                }
                .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<(Package, StoreEntry), EngineError>>> =
            (0..packages.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Err(e) = &result {
                        self.report_failure(&packages[index], e);
                        if options.all_or_nothing && !e.is_cancelled() {
                            tracing::debug!("Cancelling batch after failure of {}", packages[index]);
                            batch.cancel();
                        }
                    }
                    results[index] = Some(result);
                }
                Err(e) => tracing::error!("Install task failed: {e}"),
            }
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        packages
            .into_iter()
            .zip(results)
            .map(|(package, result)| match result {
                Some(Ok((resolved, entry))) => InstallOutcome {
                    package: resolved,
                    result: Ok(entry),
                },
                Some(Err(e)) => InstallOutcome {
                    package,
                    result: Err(e),
                },
                None => InstallOutcome {
                    result: Err(EngineError::Io {
                        context: format!("Install task for {package} aborted"),
                        message: "task panicked".to_string(),
                    }),
                    package,
                },
            })
            .collect()
    }

    /// Install a single request through the dedup table. Used by lazy shims.
    ///
    /// With lazy installation disabled this only consults the store, see
    /// [`InstallCoordinator::installed`].
    ///
    /// # Errors
    ///
    /// Any error of the resolve, download, verify or publish steps, or
    /// [`EngineError::NotInstalled`] when lazy installation is disabled and
    /// the entry is missing.
    pub async fn ensure_installed(
        &self,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<StoreEntry, EngineError> {
        if !self.inner.lazy_install {
            return self.installed(request, cancel).await;
        }
        self.run(request, cancel).await.map(|(_, entry)| entry)
    }

    /// The published entry a request resolves to. Never downloads an asset.
    ///
    /// # Errors
    ///
    /// Resolution and asset errors, or [`EngineError::NotInstalled`] if the
    /// store has no complete entry for the request.
    pub async fn installed(
        &self,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<StoreEntry, EngineError> {
        let request = self.resolve(request, cancel).await?;
        let prepared = self.inner.installer.prepare(request)?;
        self.inner
            .installer
            .store()
            .lookup(&prepared.key)
            .ok_or_else(|| EngineError::NotInstalled {
                package: prepared.key.package.clone(),
                version: prepared.key.version.to_string(),
            })
    }

    /// Create lazy shims for every command of every request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if a shim cannot be written.
    pub fn link_lazy(
        &self,
        requests: &[InstallRequest],
        toolshed: &Path,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let target = ShimTarget::Lazy {
            toolshed: toolshed.to_path_buf(),
        };
        let mut linked = Vec::new();
        for request in requests {
            for command in request.info.commands() {
                linked.push(shim::create_shim(&request.target_dir, &command, &target)?);
            }
        }
        Ok(linked)
    }

    /// Fill in the resolved version of a request.
    ///
    /// # Errors
    ///
    /// See [`VersionGetter::resolve`].
    pub async fn resolve(
        &self,
        mut request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<InstallRequest, EngineError> {
        if request.package.resolved_version().is_none() {
            self.inner.installer.reporter().resolving(&request.package);
            request.package = self
                .inner
                .versions
                .resolve(request.package, &request.info, cancel)
                .await?;
        }
        Ok(request)
    }

    async fn run(
        &self,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<(Package, StoreEntry), EngineError> {
        let request = self.resolve(request, cancel).await?;
        let prepared = self.inner.installer.prepare(request)?;
        let entry = self.install_shared(&prepared, cancel).await?;
        self.inner.installer.link(&prepared.request, &entry)?;
        Ok((prepared.request.package, entry))
    }

    /// Run the store install for `prepared`, or wait for the request already
    /// running for the same key.
    async fn install_shared(
        &self,
        prepared: &PreparedInstall,
        cancel: &CancellationToken,
    ) -> Result<StoreEntry, EngineError> {
        loop {
            let cell = self.claim(&prepared.key);
            let result = cell
                .get_or_init(|| self.inner.installer.install_prepared(prepared, cancel))
                .await
                .clone();
            self.release(&prepared.key, &cell);

            // The claimer was cancelled by its own batch; try again unless
            // this request is cancelled too.
            if matches!(result, Err(EngineError::Cancelled)) && !cancel.is_cancelled() {
                tracing::debug!("Shared install of {} was cancelled, retrying", prepared.key);
                continue;
            }
            return result;
        }
    }

    fn claim(&self, key: &ArtifactKey) -> SharedResult {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.entry(key.clone()).or_default().clone()
    }

    /// Drop the table entry once it holds a result, so later requests go
    /// through the store lookup again.
    fn release(&self, key: &ArtifactKey, cell: &SharedResult) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(key).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            in_flight.remove(key);
        }
    }

    fn report_failure(&self, package: &Package, err: &EngineError) {
        tracing::debug!("{package} failed: {err}");
        self.inner
            .installer
            .reporter()
            .failed(package, &err.to_string());
    }
}
