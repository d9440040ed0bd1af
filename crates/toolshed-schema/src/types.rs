//! Identity and version newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A normalized package name, e.g. `cli/cli` or `jq`.
///
/// Package names are lowercased on construction so lookups do not depend on
/// how a manifest spelled them.
///
/// # Example
///
/// ```
/// use toolshed_schema::PackageName;
///
/// let name = PackageName::new("BurntSushi/ripgrep");
/// assert_eq!(name.as_str(), "burntsushi/ripgrep");
/// assert_eq!(name.command_name(), "ripgrep");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Get the normalized package name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment, used as the default command name.
    pub fn command_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A concrete version string exactly as the upstream source spells it
/// (`v1.2.3`, `1.2.3`, `2024-01-05`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wrap a version string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The version without a leading `v` marker.
    pub fn trim_v(&self) -> &str {
        self.0.strip_prefix('v').unwrap_or(&self.0)
    }

    /// Parse as a semantic version, tolerating a leading `v` and missing
    /// minor/patch components (`1.2` is read as `1.2.0`).
    pub fn semver(&self) -> Option<semver::Version> {
        parse_lenient_semver(self.trim_v())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn parse_lenient_semver(s: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(s) {
        return Some(v);
    }
    // Pad bare `1` and `1.2` to three components. Anything with a suffix
    // must already be valid semver.
    let parts = s.split('.').count();
    if parts >= 3 || !s.split('.').all(|p| p.parse::<u64>().is_ok()) {
        return None;
    }
    let padded = format!("{s}{}", ".0".repeat(3 - parts));
    semver::Version::parse(&padded).ok()
}

/// What a manifest asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestedVersion {
    /// The newest version matching the active filters.
    #[default]
    Latest,
    /// An exact upstream tag, used verbatim.
    Exact(Version),
    /// A semantic version range such as `^1.2` or `>=1, <2`.
    Range(semver::VersionReq),
}

impl RequestedVersion {
    /// Parse a manifest version string.
    ///
    /// `""` and `latest` mean [`RequestedVersion::Latest`]. Strings starting
    /// with a comparison operator (`^ ~ = > < *`) or containing a comma are
    /// ranges when they parse as one; everything else is an exact tag.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") {
            return Self::Latest;
        }
        let looks_like_range =
            s.starts_with(['^', '~', '=', '>', '<', '*']) || s.contains(',');
        let range = looks_like_range
            .then(|| semver::VersionReq::parse(s).ok())
            .flatten();
        if let Some(req) = range {
            return Self::Range(req);
        }
        Self::Exact(Version::new(s))
    }

    /// Returns `true` if no network lookup is needed to resolve this request.
    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl From<String> for RequestedVersion {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RequestedVersion> for String {
    fn from(v: RequestedVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for RequestedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(req) => write!(f, "{req}"),
        }
    }
}

/// A package requested from a registry.
///
/// `resolved` stays `None` until the version getter has picked a concrete
/// version; the installer refuses to run before that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Name of the registry that supplies the package metadata.
    pub registry: String,
    /// Package name within that registry.
    pub name: PackageName,
    /// Version as written in the manifest.
    pub requested: RequestedVersion,
    /// Concrete version, filled after resolution.
    pub resolved: Option<Version>,
}

impl Package {
    /// Create an unresolved package request.
    pub fn new(registry: impl Into<String>, name: PackageName, requested: RequestedVersion) -> Self {
        let resolved = match &requested {
            RequestedVersion::Exact(v) => Some(v.clone()),
            _ => None,
        };
        Self {
            registry: registry.into(),
            name,
            requested,
            resolved,
        }
    }

    /// Return a copy with the resolved version filled in.
    pub fn with_resolved(mut self, version: Version) -> Self {
        self.resolved = Some(version);
        self
    }

    /// The resolved version, ignoring empty strings.
    pub fn resolved_version(&self) -> Option<&Version> {
        self.resolved.as_ref().filter(|v| !v.is_empty())
    }

    /// `registry/name`, unique across registries.
    pub fn id(&self) -> String {
        format!("{}/{}", self.registry, self.name)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved_version() {
            Some(v) => write!(f, "{}:{}@{v}", self.registry, self.name),
            None => write!(f, "{}:{}@{}", self.registry, self.name, self.requested),
        }
    }
}

/// Archive format of a downloaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArchiveKind {
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    TarGz,
    /// Zstandard-compressed tar archive (`.tar.zst`).
    TarZst,
    /// Uncompressed tar archive (`.tar`).
    Tar,
    /// Zip archive (`.zip`).
    Zip,
    /// A single gzip-compressed executable (`.gz`).
    Gz,
    /// Standalone executable with no archive wrapper.
    Raw,
    /// A format this engine cannot unpack; installation fails with
    /// `UnsupportedArchive`.
    Unknown(String),
}

impl ArchiveKind {
    /// Map a registry `format` value to a kind.
    pub fn from_format(format: &str) -> Self {
        match format.trim().to_lowercase().as_str() {
            "tar.gz" | "tgz" => Self::TarGz,
            "tar.zst" | "tzst" => Self::TarZst,
            "tar" => Self::Tar,
            "zip" => Self::Zip,
            "gz" => Self::Gz,
            "" | "raw" => Self::Raw,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Detect the kind from an asset filename.
    #[allow(clippy::case_sensitive_file_extension_comparisons)]
    pub fn detect(filename: &str) -> Self {
        let f = filename.to_lowercase();
        if f.ends_with(".tar.gz") || f.ends_with(".tgz") {
            Self::TarGz
        } else if f.ends_with(".tar.zst") || f.ends_with(".tzst") {
            Self::TarZst
        } else if f.ends_with(".tar") {
            Self::Tar
        } else if f.ends_with(".zip") {
            Self::Zip
        } else if f.ends_with(".gz") {
            Self::Gz
        } else if let Some(ext) = UNSUPPORTED_EXTENSIONS.iter().find(|ext| f.ends_with(*ext)) {
            Self::Unknown(ext.trim_start_matches('.').to_string())
        } else {
            Self::Raw
        }
    }

    /// Registry spelling of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::Gz => "gz",
            Self::Raw => "raw",
            Self::Unknown(s) => s,
        }
    }
}

const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    ".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tbz", ".7z", ".dmg", ".pkg", ".msi", ".xz",
    ".bz2",
];

impl From<String> for ArchiveKind {
    fn from(s: String) -> Self {
        Self::from_format(&s)
    }
}

impl From<ArchiveKind> for String {
    fn from(kind: ArchiveKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
