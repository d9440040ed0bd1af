//! GitHub release and tag listings.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use toolshed_schema::PackageInfo;

use super::{VersionCandidate, VersionSource};
use crate::download::FetchError;

const PER_PAGE: usize = 100;

/// Connection settings for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubApi {
    /// API root, `https://api.github.com` unless overridden.
    pub base_url: String,
    /// Optional token sent as a bearer credential.
    pub token: Option<String>,
    /// Pages of 100 entries to read before stopping.
    pub max_pages: usize,
}

impl Default for GitHubApi {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            max_pages: 3,
        }
    }
}

impl GitHubApi {
    /// Point at a different API root (tests use a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Authenticate requests.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        client: &Client,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, FetchError> {
        let mut request = client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = request.send() => r.map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        client: &Client,
        info: &PackageInfo,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, FetchError> {
        let (owner, repo) = info.repo_parts().ok_or_else(|| FetchError::Decode {
            url: format!("registry entry {}", info.name),
            message: "missing or malformed `repo` (expected owner/repo)".to_string(),
        })?;

        let mut all = Vec::new();
        for page in 1..=self.max_pages.max(1) {
            let url = format!(
                "{}/repos/{owner}/{repo}/{endpoint}?per_page={PER_PAGE}&page={page}",
                self.base_url
            );
            let batch: Vec<T> = self.get_page(client, &url, cancel).await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }
}

/// Strip the registry's tag prefix; tags without it do not belong to the
/// package (monorepos tag several tools).
fn strip_tag_prefix<'a>(info: &PackageInfo, tag: &'a str) -> Option<&'a str> {
    match info.version_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => tag.strip_prefix(prefix),
        _ => Some(tag),
    }
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

/// Versions from GitHub releases. Drafts are skipped.
#[derive(Debug, Clone)]
pub struct GitHubReleaseSource {
    client: Client,
    api: Arc<GitHubApi>,
}

impl GitHubReleaseSource {
    /// Create a release source.
    pub fn new(client: Client, api: Arc<GitHubApi>) -> Self {
        Self { client, api }
    }
}

#[async_trait]
impl VersionSource for GitHubReleaseSource {
    async fn list_versions(
        &self,
        info: &PackageInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionCandidate>, FetchError> {
        let releases: Vec<Release> = self
            .api
            .list_all(&self.client, info, "releases", cancel)
            .await?;
        Ok(releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter_map(|r| {
                let version = strip_tag_prefix(info, &r.tag_name)?.to_string();
                Some(VersionCandidate {
                    version: version.into(),
                    prerelease: r.prerelease,
                    published_at: r.published_at,
                })
            })
            .collect())
    }
}

/// Versions from GitHub tags. Tags carry no publish time.
#[derive(Debug, Clone)]
pub struct GitHubTagSource {
    client: Client,
    api: Arc<GitHubApi>,
}

impl GitHubTagSource {
    /// Create a tag source.
    pub fn new(client: Client, api: Arc<GitHubApi>) -> Self {
        Self { client, api }
    }
}

#[async_trait]
impl VersionSource for GitHubTagSource {
    async fn list_versions(
        &self,
        info: &PackageInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionCandidate>, FetchError> {
        let tags: Vec<Tag> = self.api.list_all(&self.client, info, "tags", cancel).await?;
        Ok(tags
            .iter()
            .filter_map(|t| strip_tag_prefix(info, &t.name))
            .map(VersionCandidate::new)
            .collect())
    }
}
