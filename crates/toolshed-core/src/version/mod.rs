//! Version discovery and selection.
//!
//! Each hosting convention has a [`VersionSource`]; the [`VersionGetter`]
//! picks the source named by the package metadata, retries transient
//! faults, filters the candidates and orders them newest-first.
//!
//! Ordering:
//! - semver-parseable candidates come first, highest version first;
//! - the rest follow, most recently published first, then lexically
//!   descending (which orders `YYYY-MM-DD` style versions correctly);
//! - ties are broken by publish time, then lexically descending.

mod filter;
mod github;
mod listed;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use tokio_util::sync::CancellationToken;
use toolshed_schema::{Package, PackageInfo, RequestedVersion, SourceKind, Version};

use crate::config::RetryPolicy;
use crate::download::FetchError;
use crate::error::EngineError;
use crate::retry::{RetryError, retry};

pub use filter::VersionFilter;
pub use github::{GitHubApi, GitHubReleaseSource, GitHubTagSource};
pub use listed::StaticVersionSource;

/// A version offered by an upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCandidate {
    /// Version with any registry tag prefix removed.
    pub version: Version,
    /// Source-reported prerelease flag.
    pub prerelease: bool,
    /// Source-reported publish time, when known.
    pub published_at: Option<DateTime<Utc>>,
}

impl VersionCandidate {
    /// A candidate with no metadata beyond the version string.
    pub fn new(version: impl Into<Version>) -> Self {
        Self {
            version: version.into(),
            prerelease: false,
            published_at: None,
        }
    }

    /// Returns `true` if the source flags it or it has a semver prerelease part.
    pub fn is_prerelease(&self) -> bool {
        self.prerelease || self.version.semver().is_some_and(|v| !v.pre.is_empty())
    }
}

/// Lists versions for one hosting convention.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Fetch every version the upstream publishes, in any order. A single
    /// attempt; the getter retries.
    async fn list_versions(
        &self,
        info: &PackageInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionCandidate>, FetchError>;
}

/// Version sources keyed by [`SourceKind`].
#[derive(Clone, Default)]
pub struct VersionSources {
    sources: HashMap<SourceKind, Arc<dyn VersionSource>>,
}

impl std::fmt::Debug for VersionSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSources")
            .field("kinds", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VersionSources {
    /// No sources registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// GitHub releases, GitHub tags and static lists.
    pub fn standard(client: reqwest::Client, github: GitHubApi) -> Self {
        let api = Arc::new(github);
        Self::new()
            .with(
                SourceKind::GithubRelease,
                GitHubReleaseSource::new(client.clone(), Arc::clone(&api)),
            )
            .with(SourceKind::GithubTag, GitHubTagSource::new(client, api))
            .with(SourceKind::Http, StaticVersionSource)
    }

    /// Register (or replace) the source for `kind`.
    pub fn with(mut self, kind: SourceKind, source: impl VersionSource + 'static) -> Self {
        self.sources.insert(kind, Arc::new(source));
        self
    }

    fn get(&self, kind: SourceKind) -> Option<&Arc<dyn VersionSource>> {
        self.sources.get(&kind)
    }
}

/// Resolves requested versions to concrete ones.
#[derive(Debug, Clone)]
pub struct VersionGetter {
    sources: VersionSources,
    retry: RetryPolicy,
}

impl VersionGetter {
    /// Create a getter over `sources`.
    pub fn new(sources: VersionSources, retry: RetryPolicy) -> Self {
        Self { sources, retry }
    }

    /// The newest version matching `filter`.
    ///
    /// # Errors
    ///
    /// [`EngineError::ResolutionFailed`] if the source keeps failing,
    /// [`EngineError::NoVersionFound`] if nothing matches,
    /// [`EngineError::Cancelled`] on cancellation.
    pub async fn get(
        &self,
        package: &str,
        info: &PackageInfo,
        filter: &VersionFilter,
        cancel: &CancellationToken,
    ) -> Result<Version, EngineError> {
        let candidates = self.list(package, info, filter, Some(1), cancel).await?;
        candidates
            .into_iter()
            .next()
            .map(|c| c.version)
            .ok_or_else(|| EngineError::NoVersionFound {
                package: package.to_string(),
                filter: filter.to_string(),
            })
    }

    /// Candidates matching `filter`, newest first, truncated to `limit`.
    ///
    /// # Errors
    ///
    /// [`EngineError::ResolutionFailed`] if the source keeps failing,
    /// [`EngineError::Cancelled`] on cancellation.
    pub async fn list(
        &self,
        package: &str,
        info: &PackageInfo,
        filter: &VersionFilter,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionCandidate>, EngineError> {
        let source = self
            .sources
            .get(info.source)
            .ok_or_else(|| EngineError::ResolutionFailed {
                package: package.to_string(),
                attempts: 0,
                message: format!("no version source registered for {:?}", info.source),
            })?;

        let what = format!("list versions of {package}");
        let raw = retry(&self.retry, cancel, &what, |_| source.list_versions(info, cancel))
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => EngineError::Cancelled,
                RetryError::Exhausted { error, attempts } => EngineError::ResolutionFailed {
                    package: package.to_string(),
                    attempts,
                    message: error.to_string(),
                },
            })?;

        let mut candidates = select(raw, filter);
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        tracing::debug!("{package}: {} candidate version(s)", candidates.len());
        Ok(candidates)
    }

    /// Fill in the resolved version of `package`.
    ///
    /// Exact requests are used verbatim without a lookup. `latest` picks the
    /// newest stable version; a range picks the newest version inside it.
    ///
    /// # Errors
    ///
    /// See [`VersionGetter::get`].
    pub async fn resolve(
        &self,
        package: Package,
        info: &PackageInfo,
        cancel: &CancellationToken,
    ) -> Result<Package, EngineError> {
        let filter = match &package.requested {
            RequestedVersion::Exact(v) => return Ok(package.clone().with_resolved(v.clone())),
            RequestedVersion::Latest => VersionFilter::default(),
            RequestedVersion::Range(req) => VersionFilter::default().with_constraint(req.clone()),
        };
        let version = self.get(&package.id(), info, &filter, cancel).await?;
        tracing::debug!("Resolved {} to {version}", package.id());
        Ok(package.with_resolved(version))
    }
}

/// Apply `filter`, order newest-first and cap at the filter's max count.
pub fn select(candidates: Vec<VersionCandidate>, filter: &VersionFilter) -> Vec<VersionCandidate> {
    let mut selected: Vec<_> = candidates.into_iter().filter(|c| filter.matches(c)).collect();
    sort_newest_first(&mut selected);
    selected.dedup_by(|a, b| a.version == b.version);
    if let Some(max) = filter.max_count {
        selected.truncate(max);
    }
    selected
}

/// Sort candidates newest-first using the documented ordering.
pub fn sort_newest_first(candidates: &mut [VersionCandidate]) {
    candidates.sort_by(newest_first);
}

fn newest_first(a: &VersionCandidate, b: &VersionCandidate) -> Ordering {
    let by_recency = || match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    let lexical = || b.version.as_str().cmp(a.version.as_str());

    match (a.version.semver(), b.version.semver()) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(by_recency).then_with(lexical),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => by_recency().then_with(lexical),
    }
}

/// Rank candidates against a fuzzy query for interactive selection.
///
/// Candidates that do not match are dropped; equal scores keep their
/// newest-first order. An empty query returns every candidate.
pub fn fuzzy_rank<'a>(candidates: &'a [VersionCandidate], query: &str) -> Vec<&'a VersionCandidate> {
    if query.trim().is_empty() {
        return candidates.iter().collect();
    }
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, &VersionCandidate)> = candidates
        .iter()
        .filter_map(|c| matcher.fuzzy_match(c.version.as_str(), query).map(|s| (s, c)))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use chrono::TimeZone;
    use toolshed_schema::PackageName;

    use super::*;

    struct Fixed(Vec<&'static str>);

    #[async_trait]
    impl VersionSource for Fixed {
        async fn list_versions(
            &self,
            _: &PackageInfo,
            _: &CancellationToken,
        ) -> Result<Vec<VersionCandidate>, FetchError> {
            Ok(self.0.iter().map(|v| VersionCandidate::new(*v)).collect())
        }
    }

    struct Flaky {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl VersionSource for Flaky {
        async fn list_versions(
            &self,
            _: &PackageInfo,
            _: &CancellationToken,
        ) -> Result<Vec<VersionCandidate>, FetchError> {
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.failures {
                return Err(FetchError::Status {
                    url: "https://api.github.com/x".into(),
                    status: 502,
                });
            }
            Ok(vec![VersionCandidate::new("v1.0.0")])
        }
    }

    fn info() -> PackageInfo {
        PackageInfo::github_release("owner/tool", "owner/tool", "tool")
    }

    fn getter(source: impl VersionSource + 'static) -> VersionGetter {
        VersionGetter::new(
            VersionSources::new().with(SourceKind::GithubRelease, source),
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn latest_excludes_prereleases() {
        let g = getter(Fixed(vec!["1.0.0", "1.1.0", "2.0.0-rc1"]));
        let v = g
            .get("standard/tool", &info(), &VersionFilter::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, "1.1.0");

        let with_pre = VersionFilter {
            include_prerelease: true,
            ..VersionFilter::default()
        };
        let v = g
            .get("standard/tool", &info(), &with_pre, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, "2.0.0-rc1");
    }

    #[tokio::test]
    async fn no_match_is_an_error() {
        let g = getter(Fixed(vec!["2.0.0-rc1"]));
        let err = g
            .get("standard/tool", &info(), &VersionFilter::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoVersionFound { .. }));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let g = getter(Fixed(vec!["v1.2.0", "v1.10.0", "v1.9.3", "nightly", "v0.1"]));
        let list = g
            .list(
                "standard/tool",
                &info(),
                &VersionFilter::default(),
                Some(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let names: Vec<_> = list.iter().map(|c| c.version.as_str()).collect();
        assert_eq!(names, vec!["v1.10.0", "v1.9.3", "v1.2.0"]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let g = getter(Flaky {
            calls: Arc::clone(&calls),
            failures: 2,
        });
        let v = g
            .get("standard/tool", &info(), &VersionFilter::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, "v1.0.0");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_resolution_failed() {
        let g = getter(Flaky {
            calls: Arc::new(AtomicU32::new(0)),
            failures: 10,
        });
        let err = g
            .get("standard/tool", &info(), &VersionFilter::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ResolutionFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn resolve_handles_each_request_kind() {
        let g = getter(Fixed(vec!["1.2.0", "1.3.5", "2.0.0"]));
        let cancel = CancellationToken::new();
        let name = PackageName::new("owner/tool");

        let exact = Package::new("standard", name.clone(), RequestedVersion::parse("9.9.9"));
        let resolved = g.resolve(exact, &info(), &cancel).await.unwrap();
        assert_eq!(resolved.resolved_version().unwrap(), &Version::from("9.9.9"));

        let range = Package::new("standard", name.clone(), RequestedVersion::parse("^1.2"));
        let resolved = g.resolve(range, &info(), &cancel).await.unwrap();
        assert_eq!(resolved.resolved_version().unwrap(), &Version::from("1.3.5"));

        let latest = Package::new("standard", name, RequestedVersion::Latest);
        let resolved = g.resolve(latest, &info(), &cancel).await.unwrap();
        assert_eq!(resolved.resolved_version().unwrap(), &Version::from("2.0.0"));
    }

    #[test]
    fn non_semver_orders_by_recency_then_lexically() {
        let at = |d: u32| Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
        let mut list = vec![
            VersionCandidate {
                published_at: at(1),
                ..VersionCandidate::new("build-b")
            },
            VersionCandidate::new("2024-01-05"),
            VersionCandidate::new("2024-02-01"),
            VersionCandidate {
                published_at: at(9),
                ..VersionCandidate::new("build-a")
            },
            VersionCandidate::new("1.0.0"),
        ];
        sort_newest_first(&mut list);
        let names: Vec<_> = list.iter().map(|c| c.version.as_str()).collect();
        assert_eq!(
            names,
            vec!["1.0.0", "build-a", "build-b", "2024-02-01", "2024-01-05"]
        );
    }

    #[test]
    fn semver_ties_break_by_recency() {
        let at = |d: u32| Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
        let mut list = vec![
            VersionCandidate {
                published_at: at(1),
                ..VersionCandidate::new("1.0.0")
            },
            VersionCandidate {
                published_at: at(2),
                ..VersionCandidate::new("v1.0.0")
            },
        ];
        sort_newest_first(&mut list);
        assert_eq!(list[0].version, "v1.0.0");
    }

    #[test]
    fn fuzzy_rank_filters_and_orders() {
        let list: Vec<_> = ["v2.1.0", "v2.0.0", "v1.21.0"]
            .into_iter()
            .map(VersionCandidate::new)
            .collect();
        let ranked = fuzzy_rank(&list, "21");
        assert!(ranked.iter().any(|c| c.version == "v2.1.0"));
        assert!(ranked.iter().any(|c| c.version == "v1.21.0"));
        assert_eq!(fuzzy_rank(&list, "").len(), 3);
        assert!(fuzzy_rank(&list, "zzz").is_empty());
    }
}
