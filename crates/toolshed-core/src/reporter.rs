//! Reporter trait for dependency injection
//!
//! Lets the engine report progress without knowing how (or whether) it is
//! displayed.

use toolshed_schema::Package;

/// Progress sink for install operations.
pub trait Reporter: Send + Sync {
    /// A package version is being resolved.
    fn resolving(&self, package: &Package);

    /// Bytes received for an asset download.
    fn downloading(&self, package: &Package, asset: &str, bytes: u64);

    /// The asset is being verified and unpacked.
    fn installing(&self, package: &Package);

    /// The package was published (or was already present).
    fn done(&self, package: &Package, detail: &str);

    /// The package failed.
    fn failed(&self, package: &Package, reason: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn resolving(&self, package: &Package) {
        (**self).resolving(package);
    }
    fn downloading(&self, package: &Package, asset: &str, bytes: u64) {
        (**self).downloading(package, asset, bytes);
    }
    fn installing(&self, package: &Package) {
        (**self).installing(package);
    }
    fn done(&self, package: &Package, detail: &str) {
        (**self).done(package, detail);
    }
    fn failed(&self, package: &Package, reason: &str) {
        (**self).failed(package, reason);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., `exec`, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn resolving(&self, _: &Package) {}
    fn downloading(&self, _: &Package, _: &str, _: u64) {}
    fn installing(&self, _: &Package) {}
    fn done(&self, _: &Package, _: &str) {}
    fn failed(&self, _: &Package, _: &str) {}
    fn warning(&self, _: &str) {}
}
