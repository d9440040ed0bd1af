//! Package installation.
//!
//! One install is: resolve asset -> download into staging -> verify checksum
//! -> extract into a second staging directory -> publish by rename -> link
//! shims. Every step fails independently and staging directories are removed
//! on any failure, so nothing partial reaches the store.
//!
//! The store half ([`PackageInstaller::install_prepared`]) is what the
//! coordinator deduplicates; linking shims is per request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use toolshed_schema::{ArchiveKind, ChecksumAlgorithm, Digest, Package, PackageInfo, Platform};

use crate::asset::{AssetResolver, AssetSpec};
use crate::checksum::{self, ChecksumKey, ChecksumLedger, ChecksumRecord};
use crate::config::EngineConfig;
use crate::download::{Downloader, FetchError};
use crate::error::EngineError;
use crate::extract::{self, ExtractError};
use crate::reporter::Reporter;
use crate::retry::{RetryError, retry};
use crate::shim::{self, ShimTarget};
use crate::store::{ArtifactKey, CompletionMarker, EntryFile, Store, StoreEntry};

/// One package to install, built per invocation and consumed once.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Package, resolved or not.
    pub package: Package,
    /// Registry metadata of the package.
    pub info: Arc<PackageInfo>,
    /// Directory receiving shims.
    pub target_dir: PathBuf,
    /// Reinstall even if a complete entry exists.
    pub force_reinstall: bool,
    /// Install into the store without creating shims.
    pub skip_link: bool,
}

impl InstallRequest {
    /// A request with default flags.
    pub fn new(package: Package, info: Arc<PackageInfo>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            package,
            info,
            target_dir: target_dir.into(),
            force_reinstall: false,
            skip_link: false,
        }
    }
}

/// A request whose version and asset are known.
#[derive(Debug, Clone)]
pub struct PreparedInstall {
    /// The originating request, with `package.resolved` set.
    pub request: InstallRequest,
    /// Concrete asset.
    pub asset: AssetSpec,
    /// Dedup and store key.
    pub key: ArtifactKey,
}

/// Downloads, verifies, extracts and publishes packages.
pub struct PackageInstaller {
    config: Arc<EngineConfig>,
    store: Store,
    resolver: AssetResolver,
    downloader: Arc<dyn Downloader>,
    ledger: Arc<ChecksumLedger>,
    reporter: Arc<dyn Reporter>,
    platform: Platform,
}

impl std::fmt::Debug for PackageInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageInstaller")
            .field("store", &self.store)
            .field("platform", &self.platform)
            .field("ledger_records", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl PackageInstaller {
    /// Create an installer for the host platform.
    pub fn new(
        config: Arc<EngineConfig>,
        downloader: Arc<dyn Downloader>,
        ledger: Arc<ChecksumLedger>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let store = Store::new(config.pkgs_dir(), config.tmp_dir());
        Self {
            config,
            store,
            resolver: AssetResolver::default(),
            downloader,
            ledger,
            reporter,
            platform: Platform::current(),
        }
    }

    /// Install for another platform (tests, cross-platform checksum updates).
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Build GitHub download URLs under another base.
    pub fn with_resolver(mut self, resolver: AssetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The store this installer publishes into.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The progress sink.
    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Resolve the asset and store key of a request.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unresolved`] if the package has no resolved version,
    /// otherwise whatever [`AssetResolver::resolve`] returns.
    pub fn prepare(&self, request: InstallRequest) -> Result<PreparedInstall, EngineError> {
        let version = request
            .package
            .resolved_version()
            .cloned()
            .ok_or_else(|| EngineError::Unresolved {
                package: request.package.to_string(),
            })?;
        let asset = self
            .resolver
            .resolve(&request.info, &version, self.platform)
            .map_err(|e| with_package_identity(e, &request.package))?;
        let key = ArtifactKey {
            package: request.package.id(),
            version,
            asset: asset.filename.clone(),
        };
        Ok(PreparedInstall {
            request,
            asset,
            key,
        })
    }

    /// Install a request end to end, including shims.
    ///
    /// # Errors
    ///
    /// See [`PackageInstaller::prepare`] and
    /// [`PackageInstaller::install_prepared`].
    pub async fn install(
        &self,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<StoreEntry, EngineError> {
        let prepared = self.prepare(request)?;
        let entry = self.install_prepared(&prepared, cancel).await?;
        self.link(&prepared.request, &entry)?;
        Ok(entry)
    }

    /// Put the artifact into the store. A no-op when a complete entry exists
    /// and `force_reinstall` is off.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedArchive`], [`EngineError::DownloadFailed`],
    /// [`EngineError::ChecksumMismatch`], [`EngineError::ChecksumMissing`],
    /// [`EngineError::Cancelled`] or [`EngineError::Io`].
    pub async fn install_prepared(
        &self,
        prepared: &PreparedInstall,
        cancel: &CancellationToken,
    ) -> Result<StoreEntry, EngineError> {
        let PreparedInstall {
            request,
            asset,
            key,
        } = prepared;
        let package = &request.package;

        let existing = if request.force_reinstall {
            None
        } else {
            self.store.lookup(key)
        };
        if let Some(entry) = existing {
            tracing::debug!("{key} already installed");
            self.reporter.done(package, "already installed");
            return Ok(entry);
        }

        if let ArchiveKind::Unknown(format) = &asset.archive {
            return Err(EngineError::UnsupportedArchive {
                package: key.package.clone(),
                version: key.version.to_string(),
                asset: asset.filename.clone(),
                format: format.clone(),
            });
        }

        let download_dir = self.store.stage()?;
        let archive_path = self
            .download_asset(prepared, download_dir.path(), cancel)
            .await?;

        self.reporter.installing(package);
        let digest = self.verify_checksum(prepared, &archive_path, cancel).await?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let staged = self.store.stage()?;
        let extract_dir = staged.path().to_path_buf();
        let kind = asset.archive.clone();
        let raw_name = raw_file_name(asset);
        let archive_for_task = archive_path.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract::extract(&archive_for_task, &kind, &extract_dir, &raw_name)
        })
        .await
        .map_err(|e| EngineError::Io {
            context: format!("Extraction task for {key} failed"),
            message: e.to_string(),
        })?
        .map_err(|e| match e {
            ExtractError::UnsupportedFormat(format) => EngineError::UnsupportedArchive {
                package: key.package.clone(),
                version: key.version.to_string(),
                asset: asset.filename.clone(),
                format,
            },
            other => EngineError::Io {
                context: format!("Failed to extract {}", asset.filename),
                message: other.to_string(),
            },
        })?;
        drop(download_dir);

        let mut files = Vec::with_capacity(asset.files.len());
        for file in &asset.files {
            let path = staged.path().join(&file.src);
            if !path.is_file() {
                return Err(EngineError::Io {
                    context: format!("{key} does not contain '{}'", file.src),
                    message: format!("expected executable for command '{}'", file.name),
                });
            }
            let marked = extracted
                .iter()
                .any(|f| f.is_executable && staged.path().join(&f.relative_path) == path);
            if !marked {
                tracing::debug!("{key}: archive left '{}' non-executable, fixing mode", file.src);
                extract::make_executable(&path)
                    .map_err(|e| EngineError::io_at("chmod", &path, &e))?;
            }
            files.push(EntryFile {
                name: file.name.clone(),
                src: file.src.clone(),
            });
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let marker = CompletionMarker {
            package: key.package.clone(),
            version: key.version.to_string(),
            asset: key.asset.clone(),
            digest: Some(digest.to_string()),
            files,
            installed_at: Utc::now(),
        };
        let entry = self
            .store
            .publish(staged, key, marker, request.force_reinstall)?;
        self.reporter.done(package, "installed");
        Ok(entry)
    }

    /// Create the request's shims for a published entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if a shim cannot be written.
    pub fn link(&self, request: &InstallRequest, entry: &StoreEntry) -> Result<Vec<PathBuf>, EngineError> {
        if request.skip_link {
            return Ok(Vec::new());
        }
        entry
            .marker
            .files
            .iter()
            .map(|f| {
                let target = ShimTarget::Binary(entry.path.join(&f.src));
                shim::create_shim(&request.target_dir, &f.name, &target)
            })
            .collect()
    }

    /// Download the asset into `dir` with retries.
    ///
    /// # Errors
    ///
    /// [`EngineError::DownloadFailed`] or [`EngineError::Cancelled`].
    pub async fn download_asset(
        &self,
        prepared: &PreparedInstall,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EngineError> {
        let PreparedInstall {
            request,
            asset,
            key,
        } = prepared;
        let dest = dir.join(safe_file_name(&asset.filename));
        let what = format!("download {}", asset.url);

        let bytes = retry(&self.config.retry, cancel, &what, |_| {
            self.downloader.fetch(&asset.url, &dest, cancel)
        })
        .await
        .map_err(|e| download_error(e, key, &asset.url))?;

        self.reporter.downloading(&request.package, &asset.filename, bytes);
        tracing::debug!("Fetched {} ({bytes} bytes)", asset.filename);
        Ok(dest)
    }

    /// Find the expected checksum and verify `archive` against it.
    ///
    /// Returns the verified digest, or the sha256 of the archive when no
    /// checksum is known and checksums are optional.
    async fn verify_checksum(
        &self,
        prepared: &PreparedInstall,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<Digest, EngineError> {
        let key = &prepared.key;
        match self.expected_checksum(prepared, cancel).await? {
            Some(record) => checksum::verify(archive, &record).await,
            None if self.config.require_checksum => Err(EngineError::ChecksumMissing {
                package: key.package.clone(),
                version: key.version.to_string(),
                asset: key.asset.clone(),
            }),
            None => {
                let msg = format!("No checksum for {key}; installing unverified");
                tracing::warn!("{msg}");
                self.reporter.warning(&msg);
                checksum::compute_digest_async(archive, ChecksumAlgorithm::default()).await
            }
        }
    }

    /// The ledger record for the artifact, else a record built from the
    /// registry's checksum file.
    ///
    /// # Errors
    ///
    /// [`EngineError::DownloadFailed`] if the checksum file cannot be
    /// fetched, [`EngineError::Cancelled`] on cancellation.
    pub async fn expected_checksum(
        &self,
        prepared: &PreparedInstall,
        cancel: &CancellationToken,
    ) -> Result<Option<ChecksumRecord>, EngineError> {
        let key = &prepared.key;
        let ledger_key = ChecksumKey::new(key.package.clone(), &key.version, key.asset.clone());
        if let Some(record) = self.ledger.get(&ledger_key) {
            return Ok(Some(record.clone()));
        }

        let Some(source) = &prepared.asset.checksum else {
            return Ok(None);
        };
        let what = format!("fetch checksums {}", source.url);
        let text = retry(&self.config.retry, cancel, &what, |_| {
            self.downloader.fetch_text(&source.url, cancel)
        })
        .await
        .map_err(|e| download_error(e, key, &source.url))?;

        Ok(
            checksum::parse_checksum_file(&text, &key.asset).map(|digest| ChecksumRecord {
                package: key.package.clone(),
                version: key.version.to_string(),
                asset: key.asset.clone(),
                algorithm: source.algorithm,
                digest,
            }),
        )
    }
}

fn download_error(err: RetryError<FetchError>, key: &ArtifactKey, url: &str) -> EngineError {
    match err {
        RetryError::Cancelled
        | RetryError::Exhausted {
            error: FetchError::Cancelled,
            ..
        } => EngineError::Cancelled,
        RetryError::Exhausted { error, attempts } => EngineError::DownloadFailed {
            package: key.package.clone(),
            version: key.version.to_string(),
            url: url.to_string(),
            attempts,
            message: error.to_string(),
        },
    }
}

/// Replace the bare package name in resolver errors with `registry/name`.
fn with_package_identity(err: EngineError, package: &Package) -> EngineError {
    match err {
        EngineError::UnsupportedPlatform {
            version, platform, ..
        } => EngineError::UnsupportedPlatform {
            package: package.id(),
            version,
            platform,
        },
        other => other,
    }
}

fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        "asset".to_string()
    } else {
        base.to_string()
    }
}

/// Name of a raw executable inside its entry: the first command's path.
fn raw_file_name(asset: &AssetSpec) -> String {
    asset
        .files
        .first()
        .map_or_else(|| safe_file_name(&asset.filename), |f| f.src.clone())
}
