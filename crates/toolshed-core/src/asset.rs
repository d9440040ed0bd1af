//! Asset resolution: registry templates to a concrete download.
//!
//! Resolution is pure. The same metadata, version and platform always
//! produce the same [`AssetSpec`], which is what makes the asset filename
//! usable as part of the install dedup key.

use std::collections::BTreeMap;

use toolshed_schema::{
    Arch, ArchiveKind, ChecksumAlgorithm, ChecksumHint, FileSpec, Os, Override, PackageInfo,
    Platform, SourceKind, Version,
};

use crate::error::EngineError;
use crate::shim::validate_command_name;

/// Where an upstream checksum file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSource {
    /// Expanded URL of the checksum file.
    pub url: String,
    /// Algorithm of the digests it lists.
    pub algorithm: ChecksumAlgorithm,
}

/// A command inside the unpacked asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Command name exposed through a shim.
    pub name: String,
    /// Relative path of the executable inside the store entry.
    pub src: String,
}

/// The concrete artifact for one package version on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    /// Download URL.
    pub url: String,
    /// Asset filename, part of the dedup key and the checksum key.
    pub filename: String,
    /// How to unpack it.
    pub archive: ArchiveKind,
    /// Commands provided.
    pub files: Vec<ResolvedFile>,
    /// Upstream checksum file, if the registry names one.
    pub checksum: Option<ChecksumSource>,
}

/// Expands registry templates.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    github_base: String,
}

impl Default for AssetResolver {
    fn default() -> Self {
        Self::new("https://github.com")
    }
}

impl AssetResolver {
    /// Resolver building GitHub release URLs under `github_base`.
    pub fn new(github_base: impl Into<String>) -> Self {
        Self {
            github_base: github_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the asset of `info` at `version` for `platform`.
    ///
    /// The most specific matching override (OS and arch beat OS or arch
    /// alone; earlier declarations win ties) replaces the generic fields it
    /// sets.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedPlatform`] when `supported_envs` or the
    /// templates do not cover `platform`; [`EngineError::Registry`] for a
    /// malformed template; [`EngineError::InvalidCommand`] for a command
    /// name that cannot be a shim.
    pub fn resolve(
        &self,
        info: &PackageInfo,
        version: &Version,
        platform: Platform,
    ) -> Result<AssetSpec, EngineError> {
        let unsupported = || EngineError::UnsupportedPlatform {
            package: info.name.to_string(),
            version: version.to_string(),
            platform: platform.to_string(),
        };

        let asset_platform = effective_platform(info, platform).ok_or_else(unsupported)?;
        let fields = Fields::merge(info, asset_platform);
        if fields.asset.is_none() && fields.url.is_none() {
            return Err(unsupported());
        }

        let template_err = |message: String| EngineError::Registry {
            registry: info.name.to_string(),
            message,
        };

        let tag = match info.version_prefix.as_deref() {
            Some(prefix) => format!("{prefix}{version}"),
            None => version.to_string(),
        };
        let mut vars = Vars::new();
        vars.set("Version", version.as_str());
        vars.set("SemVer", version.trim_v());
        vars.set("OS", replace(fields.replacements, asset_platform.os.as_str()));
        vars.set("Arch", replace(fields.replacements, asset_platform.arch.as_str()));
        vars.set("Format", fields.format.unwrap_or(""));

        let (filename, url) = if let Some(t) = fields.asset {
            let filename = expand(t, &vars).map_err(template_err)?;
            vars.set("Asset", &filename);
            vars.set("AssetWithoutExt", strip_archive_ext(&filename));
            let url = match fields.url {
                Some(t) => expand(t, &vars).map_err(template_err)?,
                None => self.release_url(info, &tag, &filename).ok_or_else(|| {
                    template_err(format!(
                        "{} source needs a url template",
                        source_name(info.source)
                    ))
                })?,
            };
            (filename, url)
        } else {
            let url = expand(fields.url.unwrap_or_default(), &vars).map_err(template_err)?;
            let filename = url
                .rsplit('/')
                .next()
                .and_then(|s| s.split(['?', '#']).next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| template_err(format!("url '{url}' has no filename")))?;
            vars.set("Asset", &filename);
            vars.set("AssetWithoutExt", strip_archive_ext(&filename));
            (filename, url)
        };

        let archive = match fields.format.filter(|f| !f.is_empty()) {
            Some(format) => ArchiveKind::from_format(format),
            None => ArchiveKind::detect(&filename),
        };

        let files = resolve_files(info, fields.files, &vars, asset_platform.os)
            .map_err(template_err)?;
        for file in &files {
            validate_command_name(&file.name)?;
        }

        let checksum = match fields.checksum {
            Some(hint) => Some(
                self.checksum_source(info, hint, &tag, &vars)
                    .map_err(template_err)?,
            ),
            None => None,
        };

        Ok(AssetSpec {
            url,
            filename,
            archive,
            files,
            checksum,
        })
    }

    fn release_url(&self, info: &PackageInfo, tag: &str, filename: &str) -> Option<String> {
        if info.source == SourceKind::Http {
            return None;
        }
        let (owner, repo) = info.repo_parts()?;
        Some(format!(
            "{}/{owner}/{repo}/releases/download/{tag}/{filename}",
            self.github_base
        ))
    }

    fn checksum_source(
        &self,
        info: &PackageInfo,
        hint: &ChecksumHint,
        tag: &str,
        vars: &Vars,
    ) -> Result<ChecksumSource, String> {
        let url = if let Some(t) = &hint.url {
            expand(t, vars)?
        } else if let Some(t) = &hint.asset {
            let name = expand(t, vars)?;
            self.release_url(info, tag, &name)
                .ok_or("checksum asset needs a GitHub repo")?
        } else {
            return Err("checksum hint needs `asset` or `url`".to_string());
        };
        Ok(ChecksumSource {
            url,
            algorithm: hint.algorithm,
        })
    }
}

fn source_name(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::GithubRelease => "github_release",
        SourceKind::GithubTag => "github_tag",
        SourceKind::Http => "http",
    }
}

/// The platform whose asset should be installed, or `None` if unsupported.
///
/// With `rosetta2`, darwin/arm64 hosts get the darwin/amd64 asset.
fn effective_platform(info: &PackageInfo, platform: Platform) -> Option<Platform> {
    let intel_mac = Platform::new(Os::Darwin, Arch::Amd64);
    let apple_silicon = platform == Platform::new(Os::Darwin, Arch::Arm64);
    if info.rosetta2 && apple_silicon && info.supports(intel_mac) {
        return Some(intel_mac);
    }
    info.supports(platform).then_some(platform)
}

/// Generic fields with the winning override applied.
struct Fields<'a> {
    asset: Option<&'a str>,
    url: Option<&'a str>,
    format: Option<&'a str>,
    files: &'a [FileSpec],
    replacements: &'a BTreeMap<String, String>,
    checksum: Option<&'a ChecksumHint>,
}

impl<'a> Fields<'a> {
    fn merge(info: &'a PackageInfo, platform: Platform) -> Self {
        let best = info
            .overrides
            .iter()
            .filter(|o| o.matches(platform))
            .fold(None, |best: Option<&Override>, o| match best {
                Some(b) if o.specificity() <= b.specificity() => Some(b),
                _ => Some(o),
            });

        let mut fields = Self {
            asset: info.asset.as_deref(),
            url: info.url.as_deref(),
            format: info.format.as_deref(),
            files: &info.files,
            replacements: &info.replacements,
            checksum: info.checksum.as_ref(),
        };
        if let Some(o) = best {
            if o.asset.is_some() {
                fields.asset = o.asset.as_deref();
            }
            if o.url.is_some() {
                fields.url = o.url.as_deref();
            }
            if o.format.is_some() {
                fields.format = o.format.as_deref();
            }
            if let Some(files) = &o.files {
                fields.files = files;
            }
            if let Some(replacements) = &o.replacements {
                fields.replacements = replacements;
            }
            if o.checksum.is_some() {
                fields.checksum = o.checksum.as_ref();
            }
        }
        fields
    }
}

fn replace<'a>(replacements: &'a BTreeMap<String, String>, name: &'a str) -> &'a str {
    replacements.get(name).map_or(name, String::as_str)
}

fn resolve_files(
    info: &PackageInfo,
    files: &[FileSpec],
    vars: &Vars,
    os: Os,
) -> Result<Vec<ResolvedFile>, String> {
    let defaults;
    let files = if files.is_empty() {
        defaults = vec![FileSpec {
            name: info.name.command_name().to_string(),
            src: None,
        }];
        &defaults
    } else {
        files
    };

    files
        .iter()
        .map(|f| {
            let mut src = match &f.src {
                Some(t) => expand(t, vars)?,
                None => f.name.clone(),
            };
            if os == Os::Windows && std::path::Path::new(&src).extension().is_none() {
                src.push_str(".exe");
            }
            Ok(ResolvedFile {
                name: f.name.clone(),
                src,
            })
        })
        .collect()
}

/// Extensions of the kinds `ArchiveKind::detect` can unpack, longest first.
const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tar.zst", ".tgz", ".tzst", ".tar", ".zip", ".gz",
];

/// Filename without its archive extension.
pub fn strip_archive_ext(filename: &str) -> &str {
    let lower = filename.to_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map_or(filename, |ext| &filename[..filename.len() - ext.len()])
}

/// Template variables.
#[derive(Debug, Default)]
struct Vars(BTreeMap<&'static str, String>);

impl Vars {
    fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, name: &'static str, value: &str) {
        self.0.insert(name, value.to_string());
    }
}

/// Expand `{{.Name}}` and `{{trimV .Name}}` placeholders.
///
/// An unknown variable, an unknown function or an unterminated placeholder
/// is an error naming the template.
fn expand(template: &str, vars: &Vars) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unterminated placeholder in template '{template}'"))?;
        let expr = after[..end].trim();

        let (func, var) = match expr.split_once(char::is_whitespace) {
            Some((func, var)) => (Some(func), var.trim()),
            None => (None, expr),
        };
        let name = var
            .strip_prefix('.')
            .ok_or_else(|| format!("unsupported expression '{expr}' in template '{template}'"))?;
        let value = vars
            .0
            .get(name)
            .ok_or_else(|| format!("unknown variable '.{name}' in template '{template}'"))?;

        match func {
            None => out.push_str(value),
            Some("trimV") => out.push_str(value.strip_prefix('v').unwrap_or(value)),
            Some(other) => {
                return Err(format!(
                    "unknown function '{other}' in template '{template}'"
                ));
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
