//! Registry metadata for a single package.
//!
//! A registry file is a list of `[[packages]]` tables, each deserializing
//! into a [`PackageInfo`]:
//!
//! ```toml
//! [[packages]]
//! name = "cli/cli"
//! repo = "cli/cli"
//! asset = "gh_{{trimV .Version}}_{{.OS}}_{{.Arch}}.{{.Format}}"
//! format = "tar.gz"
//! files = [{ name = "gh", src = "{{.AssetWithoutExt}}/bin/gh" }]
//! supported_envs = ["linux", "darwin"]
//! replacements = { darwin = "macOS" }
//!
//! [[packages.overrides]]
//! goos = "darwin"
//! format = "zip"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arch::{Arch, Os, Platform};
use crate::hash::ChecksumAlgorithm;
use crate::types::PackageName;

/// How the versions and assets of a package are published upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// GitHub releases; assets are attached to the release.
    #[default]
    GithubRelease,
    /// Git tags on GitHub; the asset URL is a template.
    GithubTag,
    /// Arbitrary HTTP download with a static version list.
    Http,
}

/// A command provided by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Command name exposed through a shim.
    pub name: String,
    /// Path of the executable inside the extracted asset (template).
    /// Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

/// Where to find an upstream checksum file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChecksumHint {
    /// Release asset name of the checksum file (template).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    /// Full URL of the checksum file (template).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Algorithm used by the checksum file.
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

/// Per-platform replacement of asset naming fields.
///
/// An override applies when every selector it sets matches; unset selectors
/// match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Override {
    /// Operating system selector.
    #[serde(default)]
    pub goos: Option<Os>,
    /// Architecture selector.
    #[serde(default)]
    pub goarch: Option<Arch>,
    /// Replaces the asset filename template.
    #[serde(default)]
    pub asset: Option<String>,
    /// Replaces the download URL template.
    #[serde(default)]
    pub url: Option<String>,
    /// Replaces the archive format.
    #[serde(default)]
    pub format: Option<String>,
    /// Replaces the command list.
    #[serde(default)]
    pub files: Option<Vec<FileSpec>>,
    /// Replaces the package-level replacement table when set.
    #[serde(default)]
    pub replacements: Option<BTreeMap<String, String>>,
    /// Replaces the checksum file hint.
    #[serde(default)]
    pub checksum: Option<ChecksumHint>,
}

impl Override {
    /// Returns `true` if every selector set on this override matches.
    pub fn matches(&self, platform: Platform) -> bool {
        self.goos.is_none_or(|os| os == platform.os)
            && self.goarch.is_none_or(|arch| arch == platform.arch)
    }

    /// Number of selectors set; more selectors means more specific.
    pub fn specificity(&self) -> usize {
        usize::from(self.goos.is_some()) + usize::from(self.goarch.is_some())
    }
}

/// Registry metadata for one package. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name, unique within its registry.
    pub name: PackageName,
    /// Version and asset hosting convention.
    #[serde(default)]
    pub source: SourceKind,
    /// `owner/repo` on GitHub.
    #[serde(default)]
    pub repo: Option<String>,
    /// Asset filename template.
    #[serde(default)]
    pub asset: Option<String>,
    /// Download URL template. Required for `http` sources.
    #[serde(default)]
    pub url: Option<String>,
    /// Archive format (`tar.gz`, `zip`, `raw`, ...). Detected from the
    /// asset name when unset.
    #[serde(default)]
    pub format: Option<String>,
    /// Commands provided by the package. Defaults to one command named
    /// after the package.
    #[serde(default)]
    pub files: Vec<FileSpec>,
    /// Supported platforms: `all`, an OS, an architecture or `os/arch`.
    /// Empty means every platform.
    #[serde(default)]
    pub supported_envs: Vec<String>,
    /// Canonical OS/arch name to the spelling used in asset names.
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,
    /// On darwin/arm64, use the darwin/amd64 asset.
    #[serde(default)]
    pub rosetta2: bool,
    /// Tag prefix (e.g. `jq-`), stripped from versions and re-added to tags.
    #[serde(default)]
    pub version_prefix: Option<String>,
    /// Known versions for `http` sources.
    #[serde(default)]
    pub versions: Vec<String>,
    /// Per-platform overrides.
    #[serde(default)]
    pub overrides: Vec<Override>,
    /// Upstream checksum file hint.
    #[serde(default)]
    pub checksum: Option<ChecksumHint>,
    /// One-line summary shown in listings.
    #[serde(default)]
    pub description: Option<String>,
}

impl PackageInfo {
    /// Minimal metadata for a GitHub release package.
    pub fn github_release(name: &str, repo: &str, asset: &str) -> Self {
        Self {
            name: PackageName::new(name),
            source: SourceKind::GithubRelease,
            repo: Some(repo.to_string()),
            asset: Some(asset.to_string()),
            url: None,
            format: None,
            files: Vec::new(),
            supported_envs: Vec::new(),
            replacements: BTreeMap::new(),
            rosetta2: false,
            version_prefix: None,
            versions: Vec::new(),
            overrides: Vec::new(),
            checksum: None,
            description: None,
        }
    }

    /// Split `repo` into owner and repository name.
    pub fn repo_parts(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.repo.as_deref()?.split_once('/')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some((owner, name))
    }

    /// Returns `true` if `supported_envs` admits `platform`.
    pub fn supports(&self, platform: Platform) -> bool {
        if self.supported_envs.is_empty() {
            return true;
        }
        let os = platform.os.as_str();
        let arch = platform.arch.as_str();
        let full = platform.to_string();
        self.supported_envs
            .iter()
            .map(|e| e.trim().to_lowercase())
            .any(|e| e == "all" || e == os || e == arch || e == full)
    }

    /// Command names provided by this package.
    pub fn commands(&self) -> Vec<String> {
        if self.files.is_empty() {
            vec![self.name.command_name().to_string()]
        } else {
            self.files.iter().map(|f| f.name.clone()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct RegistryFile {
        packages: Vec<PackageInfo>,
    }

    const REGISTRY: &str = r#"
[[packages]]
name = "cli/cli"
repo = "cli/cli"
asset = "gh_{{trimV .Version}}_{{.OS}}_{{.Arch}}.{{.Format}}"
format = "tar.gz"
files = [{ name = "gh", src = "{{.AssetWithoutExt}}/bin/gh" }]
supported_envs = ["linux", "darwin/arm64"]
replacements = { darwin = "macOS" }

[[packages.overrides]]
goos = "darwin"
format = "zip"

[[packages]]
name = "stedolan/jq"
source = "github_tag"
repo = "stedolan/jq"
version_prefix = "jq-"
checksum = { asset = "sha256sum.txt", algorithm = "sha256" }
"#;

    fn load() -> Vec<PackageInfo> {
        toml::from_str::<RegistryFile>(REGISTRY).unwrap().packages
    }

    #[test]
    fn parses_registry_toml() {
        let pkgs = load();
        assert_eq!(pkgs.len(), 2);

        let gh = &pkgs[0];
        assert_eq!(gh.source, SourceKind::GithubRelease);
        assert_eq!(gh.repo_parts(), Some(("cli", "cli")));
        assert_eq!(gh.commands(), vec!["gh".to_string()]);
        assert_eq!(gh.overrides[0].goos, Some(Os::Darwin));
        assert_eq!(gh.overrides[0].specificity(), 1);

        let jq = &pkgs[1];
        assert_eq!(jq.source, SourceKind::GithubTag);
        assert_eq!(jq.version_prefix.as_deref(), Some("jq-"));
        assert_eq!(jq.commands(), vec!["jq".to_string()]);
        assert_eq!(
            jq.checksum.as_ref().map(|c| c.algorithm),
            Some(ChecksumAlgorithm::Sha256)
        );
    }

    #[test]
    fn supported_envs_matching() {
        let gh = &load()[0];
        assert!(gh.supports(Platform::new(Os::Linux, Arch::Amd64)));
        assert!(gh.supports(Platform::new(Os::Darwin, Arch::Arm64)));
        assert!(!gh.supports(Platform::new(Os::Darwin, Arch::Amd64)));
        assert!(!gh.supports(Platform::new(Os::Windows, Arch::Amd64)));

        let any = PackageInfo::github_release("a/b", "a/b", "b");
        assert!(any.supports(Platform::new(Os::Windows, Arch::Arm64)));
    }

    #[test]
    fn override_selectors() {
        let o = Override {
            goos: Some(Os::Linux),
            ..Override::default()
        };
        assert!(o.matches(Platform::new(Os::Linux, Arch::Arm64)));
        assert!(!o.matches(Platform::new(Os::Darwin, Arch::Arm64)));
        assert!(Override::default().matches(Platform::new(Os::Darwin, Arch::Arm64)));
    }
}
