#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use toolshed_core::download::{Downloader, FetchError};
use toolshed_core::version::StaticVersionSource;
use toolshed_core::{
    ChecksumLedger, EngineConfig, InstallCoordinator, InstallRequest, NullReporter,
    PackageInstaller, RetryPolicy, VersionGetter, VersionSources,
};
use toolshed_schema::{
    Arch, FileSpec, Os, Package, PackageInfo, PackageName, Platform, RequestedVersion, SourceKind,
};

/// Network double serving canned bodies and counting calls.
#[derive(Default)]
pub struct FakeDownloader {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    texts: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, (u16, usize)>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    fetches: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Duration,
}

impl FakeDownloader {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn serve_text(&self, url: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), text.to_string());
    }

    /// Answer the next `times` fetches of `url` with `status`.
    pub fn fail(&self, url: &str, status: u16, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, times));
    }

    /// Park fetches of `url` until cancelled; the returned handle is
    /// notified when such a fetch starts.
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), notify.clone());
        notify
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn fetches(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn injected_failure(&self, url: &str) -> Option<FetchError> {
        let mut failures = self.failures.lock().unwrap();
        let (status, remaining) = failures.get_mut(url)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(FetchError::Status {
            url: url.to_string(),
            status: *status,
        })
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let gate = self.gates.lock().unwrap().get(url).cloned();
        if let Some(gate) = gate {
            gate.notify_one();
            cancel.cancelled().await;
            return Err(FetchError::Cancelled);
        }
        if !self.delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(self.delay) => {}
            }
        }
        if let Some(err) = self.injected_failure(url) {
            return Err(err);
        }

        let body = self.bodies.lock().unwrap().get(url).cloned();
        let Some(body) = body else {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        };
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }

    async fn fetch_text(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// A gzipped tarball holding `(path, contents)` entries, all executable.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let with_modes: Vec<_> = entries.iter().map(|(n, d)| (*n, *d, 0o755)).collect();
    tar_gz_with_modes(&with_modes)
}

/// A gzipped tarball holding `(path, contents, mode)` entries.
pub fn tar_gz_with_modes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn linux() -> Platform {
    Platform::new(Os::Linux, Arch::Amd64)
}

/// `acme/<name>` published as GitHub release tarballs.
pub fn release_package(name: &str) -> PackageInfo {
    let mut info = PackageInfo::github_release(
        &format!("acme/{name}"),
        &format!("acme/{name}"),
        &format!("{name}_{{{{trimV .Version}}}}_{{{{.OS}}}}_{{{{.Arch}}}}.tar.gz"),
    );
    info.files = vec![FileSpec {
        name: name.to_string(),
        src: Some(format!("bin/{name}")),
    }];
    info
}

/// Download URL of [`release_package`] on linux/amd64.
pub fn release_url(name: &str, version: &str) -> String {
    format!(
        "https://github.com/acme/{name}/releases/download/{version}/{name}_{}_linux_amd64.tar.gz",
        version.trim_start_matches('v')
    )
}

/// An engine rooted in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<EngineConfig>,
    pub downloader: Arc<FakeDownloader>,
}

impl Harness {
    pub fn new(downloader: FakeDownloader) -> Self {
        Self::with_config(downloader, |_| {})
    }

    pub fn with_config(downloader: FakeDownloader, tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path().join("root"));
        config.retry = RetryPolicy::immediate(3);
        tweak(&mut config);
        Self {
            dir,
            config: Arc::new(config),
            downloader: Arc::new(downloader),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root_dir
    }

    pub fn installer(&self, ledger: ChecksumLedger) -> PackageInstaller {
        PackageInstaller::new(
            self.config.clone(),
            self.downloader.clone(),
            Arc::new(ledger),
            Arc::new(NullReporter),
        )
        .with_platform(linux())
    }

    pub fn coordinator(&self, ledger: ChecksumLedger) -> InstallCoordinator {
        let sources = VersionSources::new().with(SourceKind::Http, StaticVersionSource);
        InstallCoordinator::new(
            &self.config,
            self.installer(ledger),
            VersionGetter::new(sources, self.config.retry),
        )
    }

    pub fn request(&self, info: &PackageInfo, version: &str) -> InstallRequest {
        let package = Package::new(
            "standard",
            PackageName::new(info.name.as_str()),
            RequestedVersion::parse(version),
        );
        InstallRequest::new(package, Arc::new(info.clone()), self.config.bin_dir())
    }

    pub fn bin(&self, command: &str) -> PathBuf {
        self.config.bin_dir().join(command)
    }
}

/// Write `data` to a file under `dir` and return its path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    std::io::Write::write_all(&mut file, data).unwrap();
    path
}
