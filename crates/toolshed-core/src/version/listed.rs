use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use toolshed_schema::PackageInfo;

use super::{VersionCandidate, VersionSource};
use crate::download::FetchError;

/// Versions listed in the registry entry itself (`versions = [...]`), used
/// by `http` packages that have no release API.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticVersionSource;

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn list_versions(
        &self,
        info: &PackageInfo,
        _cancel: &CancellationToken,
    ) -> Result<Vec<VersionCandidate>, FetchError> {
        Ok(info
            .versions
            .iter()
            .map(|v| VersionCandidate::new(v.as_str()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_registry_versions() {
        let mut info = PackageInfo::github_release("x", "a/x", "x");
        info.versions = vec!["1.0".into(), "2.0".into()];
        let versions = StaticVersionSource
            .list_versions(&info, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
    }
}
