//! Registries: named sources of [`PackageInfo`].
//!
//! A registry file is TOML with one `[[packages]]` table per package. The
//! engine only ever sees registries through [`RegistryLoader`]; the loader
//! is handed references that the policy enforcer has already cleared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use toolshed_schema::{PackageInfo, PackageName};

use crate::config::RetryPolicy;
use crate::download::Downloader;
use crate::error::EngineError;
use crate::policy::normalize_path;
use crate::retry::{RetryError, retry};

/// Where a registry comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryRef {
    /// A registry file on disk.
    Local {
        /// Name manifests refer to.
        name: String,
        /// Absolute path of the registry file.
        path: PathBuf,
    },
    /// A registry file served over HTTP.
    Remote {
        /// Name manifests refer to.
        name: String,
        /// URL of the registry file.
        url: String,
    },
}

impl RegistryRef {
    /// Name manifests refer to.
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Remote { name, .. } => name,
        }
    }

    /// What policy rules are matched against: the normalized path or the
    /// URL.
    pub fn identity(&self) -> String {
        match self {
            Self::Local { path, .. } => normalize_path(path).display().to_string(),
            Self::Remote { url, .. } => url.clone(),
        }
    }
}

/// A loaded registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Registry name.
    pub name: String,
    packages: HashMap<PackageName, Arc<PackageInfo>>,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    packages: Vec<PackageInfo>,
}

impl Registry {
    /// Build a registry from package metadata. Later duplicates win.
    pub fn new(name: impl Into<String>, packages: impl IntoIterator<Item = PackageInfo>) -> Self {
        Self {
            name: name.into(),
            packages: packages
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
        }
    }

    /// Parse registry TOML.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registry`] if the document is not a valid
    /// registry.
    pub fn parse(name: &str, content: &str) -> Result<Self, EngineError> {
        let file: RegistryFile = toml::from_str(content).map_err(|e| EngineError::Registry {
            registry: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(name, file.packages))
    }

    /// Metadata of a package.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PackageNotFound`] if the registry does not
    /// list it.
    pub fn package(&self, name: &PackageName) -> Result<Arc<PackageInfo>, EngineError> {
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::PackageNotFound {
                registry: self.name.clone(),
                package: name.to_string(),
            })
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns `true` if the registry lists no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Loads registries.
#[async_trait]
pub trait RegistryLoader: Send + Sync {
    /// Load the registry behind `reference`.
    async fn load(&self, reference: &RegistryRef) -> Result<Registry, EngineError>;
}

/// Reads local registry files and fetches remote ones.
pub struct FileRegistryLoader {
    downloader: Arc<dyn Downloader>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FileRegistryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistryLoader")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FileRegistryLoader {
    /// Loader fetching remote registries through `downloader`.
    pub fn new(downloader: Arc<dyn Downloader>, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            downloader,
            retry,
            cancel,
        }
    }

    async fn read_local(name: &str, path: &Path) -> Result<String, EngineError> {
        fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Registry {
                registry: name.to_string(),
                message: format!("Failed to read {}: {e}", path.display()),
            })
    }

    async fn fetch_remote(&self, name: &str, url: &str) -> Result<String, EngineError> {
        let what = format!("fetch registry {url}");
        retry(&self.retry, &self.cancel, &what, |_| {
            self.downloader.fetch_text(url, &self.cancel)
        })
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => EngineError::Cancelled,
            RetryError::Exhausted { error, attempts } => EngineError::Registry {
                registry: name.to_string(),
                message: format!("{error} (after {attempts} attempt(s))"),
            },
        })
    }
}

#[async_trait]
impl RegistryLoader for FileRegistryLoader {
    async fn load(&self, reference: &RegistryRef) -> Result<Registry, EngineError> {
        let name = reference.name();
        let content = match reference {
            RegistryRef::Local { path, .. } => Self::read_local(name, path).await?,
            RegistryRef::Remote { url, .. } => self.fetch_remote(name, url).await?,
        };
        let registry = Registry::parse(name, &content)?;
        tracing::debug!(
            "Loaded registry '{name}' ({} packages) from {}",
            registry.len(),
            reference.identity()
        );
        Ok(registry)
    }
}

/// Registries held in memory. Test double and embedding helper.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistryLoader {
    registries: HashMap<String, Registry>,
}

impl StaticRegistryLoader {
    /// Add a registry, served for any reference with the same name.
    pub fn with(mut self, registry: Registry) -> Self {
        self.registries.insert(registry.name.clone(), registry);
        self
    }
}

#[async_trait]
impl RegistryLoader for StaticRegistryLoader {
    async fn load(&self, reference: &RegistryRef) -> Result<Registry, EngineError> {
        self.registries
            .get(reference.name())
            .cloned()
            .ok_or_else(|| EngineError::Registry {
                registry: reference.name().to_string(),
                message: "not loaded".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::HttpDownloader;
    use std::time::Duration;

    const REGISTRY: &str = r#"
[[packages]]
name = "cli/cli"
repo = "cli/cli"
asset = "gh_{{trimV .Version}}_{{.OS}}_{{.Arch}}.tar.gz"

[[packages]]
name = "jqlang/jq"
repo = "jqlang/jq"
asset = "jq-{{.OS}}-{{.Arch}}"
format = "raw"
version_prefix = "jq-"
"#;

    #[test]
    fn parse_and_lookup() {
        let registry = Registry::parse("standard", REGISTRY).unwrap();
        assert_eq!(registry.len(), 2);
        let jq = registry.package(&PackageName::new("jqlang/jq")).unwrap();
        assert_eq!(jq.version_prefix.as_deref(), Some("jq-"));

        let err = registry.package(&PackageName::new("nope/nope")).unwrap_err();
        assert!(matches!(err, EngineError::PackageNotFound { .. }));
    }

    #[test]
    fn malformed_registry_is_an_error() {
        let err = Registry::parse("broken", "[[packages]]\nrepo = 3").unwrap_err();
        assert!(matches!(err, EngineError::Registry { registry, .. } if registry == "broken"));
    }

    #[tokio::test]
    async fn loads_local_and_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, REGISTRY).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/registry.toml")
            .with_body(REGISTRY)
            .create_async()
            .await;

        let downloader = Arc::new(HttpDownloader::new(
            reqwest::Client::new(),
            Duration::from_secs(5),
        ));
        let loader = FileRegistryLoader::new(
            downloader,
            RetryPolicy::immediate(1),
            CancellationToken::new(),
        );

        let local = loader
            .load(&RegistryRef::Local {
                name: "standard".into(),
                path: path.clone(),
            })
            .await
            .unwrap();
        assert_eq!(local.len(), 2);

        let remote = RegistryRef::Remote {
            name: "remote".into(),
            url: format!("{}/registry.toml", server.url()),
        };
        assert_eq!(remote.identity(), format!("{}/registry.toml", server.url()));
        let dotted = RegistryRef::Local {
            name: "dotted".into(),
            path: PathBuf::from("/srv/registries/../other/registry.toml"),
        };
        assert_eq!(dotted.identity(), "/srv/other/registry.toml");
        let registry = loader.load(&remote).await.unwrap();
        assert_eq!(registry.name, "remote");
        mock.assert_async().await;
    }
}
