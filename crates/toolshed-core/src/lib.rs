//! toolshed engine
//!
//! Resolves tool versions from registry metadata, downloads and verifies
//! release assets, and publishes them into a local store behind shims.
//!
//! The moving parts, leaf first:
//!
//! - [`version`]: discovers upstream versions ([`VersionGetter`]).
//! - [`checksum`]: ledger and digest verification.
//! - [`policy`]: allow-list over manifests and registries.
//! - [`asset`]: registry templates to a concrete download ([`AssetResolver`]).
//! - [`installer`]: download, verify, extract, publish ([`PackageInstaller`]).
//! - [`coordinator`]: bounded, deduplicated batches ([`InstallCoordinator`]).

pub mod asset;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod extract;
pub mod installer;
pub mod manifest;
pub mod plan;
pub mod policy;
pub mod registry;
pub mod reporter;
pub mod retry;
pub mod shim;
pub mod store;
pub mod updater;
pub mod version;

pub use asset::{AssetResolver, AssetSpec};
pub use checksum::{ChecksumKey, ChecksumLedger, ChecksumRecord};
pub use config::{EngineConfig, RetryPolicy};
pub use coordinator::{BatchOptions, InstallCoordinator, InstallOutcome};
pub use download::{Downloader, FetchError, HttpDownloader};
pub use error::EngineError;
pub use installer::{InstallRequest, PackageInstaller};
pub use manifest::{ConfigFinder, FixedConfigFinder, FsConfigFinder, Manifest};
pub use plan::{Plan, PlanOptions, plan_requests};
pub use policy::{PolicyDocument, PolicyEnforcer};
pub use registry::{FileRegistryLoader, Registry, RegistryLoader, RegistryRef};
pub use reporter::{NullReporter, Reporter};
pub use store::{Store, StoreEntry};
pub use updater::ChecksumUpdater;
pub use version::{VersionFilter, VersionGetter, VersionSources};

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("toolshed/", env!("CARGO_PKG_VERSION"));
