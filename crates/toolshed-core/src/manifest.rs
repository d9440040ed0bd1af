//! Manifest parsing and discovery.
//!
//! A manifest (`toolshed.toml`) declares the registries it trusts and the
//! packages it wants:
//!
//! ```toml
//! [[registries]]
//! name = "standard"
//! path = "registry.toml"
//!
//! [[packages]]
//! name = "cli/cli@v2.40.1"
//! tags = ["ci"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use toolshed_schema::{DEFAULT_REGISTRY, PackageName, RequestedVersion};

use crate::error::EngineError;
use crate::policy::normalize_path;
use crate::registry::RegistryRef;

/// File names searched in every directory, in order.
pub const MANIFEST_NAMES: [&str; 2] = ["toolshed.toml", ".toolshed.toml"];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    registries: Vec<RawRegistry>,
    #[serde(default)]
    packages: Vec<RawPackage>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    name: String,
    path: Option<PathBuf>,
    url: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    registry: Option<String>,
    version: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// A package entry of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPackage {
    /// Package name.
    pub name: PackageName,
    /// Registry name.
    pub registry: String,
    /// Requested version.
    pub requested: RequestedVersion,
    /// Tags used by `--tags` / `--exclude-tags`.
    pub tags: Vec<String>,
}

impl ManifestPackage {
    /// Keep this package under the given tag selection.
    ///
    /// With `only` non-empty the package needs one of its tags; any tag in
    /// `exclude` drops it.
    pub fn selected(&self, only: &[String], exclude: &[String]) -> bool {
        let has = |wanted: &[String]| self.tags.iter().any(|t| wanted.contains(t));
        (only.is_empty() || has(only)) && !has(exclude)
    }
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// File the manifest was read from.
    pub path: PathBuf,
    /// Declared registries.
    pub registries: Vec<RegistryRef>,
    /// Requested packages, in file order.
    pub packages: Vec<ManifestPackage>,
}

impl Manifest {
    /// Read and parse a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Manifest`] if the file cannot be read or is
    /// invalid.
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| manifest_err(path, e.to_string()))?;
        Self::parse(path, &content)
    }

    /// Parse manifest TOML. Relative registry paths are resolved against the
    /// manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Manifest`] for invalid TOML, a registry with
    /// neither or both of `path` and `url`, or a version given twice.
    pub fn parse(path: &Path, content: &str) -> Result<Self, EngineError> {
        let raw: RawManifest =
            toml::from_str(content).map_err(|e| manifest_err(path, e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let registries = raw
            .registries
            .into_iter()
            .map(|r| match (r.path, r.url) {
                (Some(p), None) => Ok(RegistryRef::Local {
                    name: r.name,
                    path: normalize_path(&base.join(p)),
                }),
                (None, Some(url)) => Ok(RegistryRef::Remote { name: r.name, url }),
                _ => Err(manifest_err(
                    path,
                    format!("registry '{}' needs exactly one of `path` and `url`", r.name),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let packages = raw
            .packages
            .into_iter()
            .map(|p| {
                let (name, shorthand) = match p.name.rsplit_once('@') {
                    Some((name, version)) if !name.is_empty() => (name, Some(version)),
                    _ => (p.name.as_str(), None),
                };
                let version = match (shorthand, p.version.as_deref()) {
                    (Some(_), Some(_)) => {
                        return Err(manifest_err(
                            path,
                            format!("package '{}' sets its version twice", p.name),
                        ));
                    }
                    (Some(v), None) | (None, Some(v)) => v,
                    (None, None) => "",
                };
                Ok(ManifestPackage {
                    name: PackageName::new(name),
                    registry: p.registry.unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
                    requested: RequestedVersion::parse(version),
                    tags: p.tags,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            registries,
            packages,
        })
    }

    /// The declared registry called `name`.
    pub fn registry(&self, name: &str) -> Option<&RegistryRef> {
        self.registries.iter().find(|r| r.name() == name)
    }
}

fn manifest_err(path: &Path, message: String) -> EngineError {
    EngineError::Manifest {
        path: path.display().to_string(),
        message,
    }
}

/// Finds the manifests that apply to a working directory.
pub trait ConfigFinder: Send + Sync {
    /// Manifest paths, highest precedence first.
    fn finds(&self, working_dir: &Path, explicit: Option<&Path>) -> Vec<PathBuf>;
}

/// Searches the working directory and its ancestors, then global manifests.
#[derive(Debug, Clone, Default)]
pub struct FsConfigFinder {
    global: Vec<PathBuf>,
}

impl FsConfigFinder {
    /// Finder that appends `global` manifests (when they exist).
    pub fn new(global: Vec<PathBuf>) -> Self {
        Self { global }
    }
}

impl ConfigFinder for FsConfigFinder {
    fn finds(&self, working_dir: &Path, explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Some(explicit) = explicit {
            found.push(normalize_path(&working_dir.join(explicit)));
        }
        for dir in working_dir.ancestors() {
            found.extend(
                MANIFEST_NAMES
                    .iter()
                    .map(|name| dir.join(name))
                    .filter(|p| p.is_file()),
            );
        }
        found.extend(
            self.global
                .iter()
                .filter(|p| p.is_file())
                .map(|p| normalize_path(&working_dir.join(p))),
        );
        dedup_preserving_order(found)
    }
}

/// Returns a fixed list of paths.
#[derive(Debug, Clone, Default)]
pub struct FixedConfigFinder {
    paths: Vec<PathBuf>,
}

impl FixedConfigFinder {
    /// Finder that always returns `paths` (after an explicit path, if any).
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl ConfigFinder for FixedConfigFinder {
    fn finds(&self, working_dir: &Path, explicit: Option<&Path>) -> Vec<PathBuf> {
        let explicit = explicit.map(|p| normalize_path(&working_dir.join(p)));
        dedup_preserving_order(explicit.into_iter().chain(self.paths.iter().cloned()).collect())
    }
}

fn dedup_preserving_order(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}
