//! Turning manifests into install requests.
//!
//! Both policy enforcement points live here: a manifest is checked before
//! it is parsed, and each registry before it is loaded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use toolshed_schema::{Package, PackageName};

use crate::error::EngineError;
use crate::installer::InstallRequest;
use crate::manifest::{ConfigFinder, Manifest};
use crate::policy::PolicyEnforcer;
use crate::registry::{Registry, RegistryLoader, RegistryRef};

/// Inputs of a plan.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Explicit manifest (`-c`), highest precedence.
    pub explicit: Option<PathBuf>,
    /// Keep only packages with one of these tags.
    pub tags: Vec<String>,
    /// Drop packages with any of these tags.
    pub exclude_tags: Vec<String>,
    /// Shim directory of the produced requests.
    pub target_dir: PathBuf,
    /// Set `force_reinstall` on every request.
    pub force_reinstall: bool,
}

/// Requests derived from the applicable manifests.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Manifests that contributed, nearest first.
    pub manifests: Vec<PathBuf>,
    /// One request per package.
    pub requests: Vec<InstallRequest>,
}

impl Plan {
    /// The request providing `command`.
    pub fn find_command(&self, command: &str) -> Option<&InstallRequest> {
        self.requests
            .iter()
            .find(|r| r.info.commands().iter().any(|c| c == command))
    }
}

/// Find, check and parse manifests, load their registries and build one
/// request per package. A package listed by several manifests comes from
/// the nearest one.
///
/// # Errors
///
/// [`EngineError::PolicyViolation`] for an untrusted manifest or registry,
/// [`EngineError::Manifest`] for an invalid manifest or an undeclared
/// registry, and whatever the registry loader returns.
pub async fn plan_requests(
    finder: &dyn ConfigFinder,
    working_dir: &Path,
    policy: &PolicyEnforcer,
    loader: &dyn RegistryLoader,
    options: &PlanOptions,
) -> Result<Plan, EngineError> {
    let mut plan = Plan::default();
    let mut registries: HashMap<RegistryRef, Registry> = HashMap::new();
    let mut seen: HashSet<(String, PackageName)> = HashSet::new();

    for path in finder.finds(working_dir, options.explicit.as_deref()) {
        policy.check_config(&path)?;
        let manifest = Manifest::load(&path).await?;
        tracing::debug!(
            "Manifest {} lists {} package(s)",
            path.display(),
            manifest.packages.len()
        );

        for entry in &manifest.packages {
            if !entry.selected(&options.tags, &options.exclude_tags) {
                continue;
            }
            if !seen.insert((entry.registry.clone(), entry.name.clone())) {
                tracing::debug!("{} already planned from a nearer manifest", entry.name);
                continue;
            }

            let reference = manifest
                .registry(&entry.registry)
                .ok_or_else(|| EngineError::Manifest {
                    path: path.display().to_string(),
                    message: format!(
                        "package '{}' uses undeclared registry '{}'",
                        entry.name, entry.registry
                    ),
                })?;
            if !registries.contains_key(reference) {
                policy.check_registry(&reference.identity())?;
                let registry = loader.load(reference).await?;
                registries.insert(reference.clone(), registry);
            }
            let info = registries[reference].package(&entry.name)?;

            let package = Package::new(
                entry.registry.clone(),
                entry.name.clone(),
                entry.requested.clone(),
            );
            let mut request = InstallRequest::new(package, info, &options.target_dir);
            request.force_reinstall = options.force_reinstall;
            plan.requests.push(request);
        }
        plan.manifests.push(path);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FixedConfigFinder;
    use crate::policy::PolicyDocument;
    use crate::registry::StaticRegistryLoader;
    use std::fs;
    use toolshed_schema::{PackageInfo, RequestedVersion};

    fn loader() -> StaticRegistryLoader {
        StaticRegistryLoader::default().with(Registry::new(
            "standard",
            vec![
                PackageInfo::github_release("cli/cli", "cli/cli", "gh.tar.gz"),
                PackageInfo::github_release("jqlang/jq", "jqlang/jq", "jq"),
            ],
        ))
    }

    fn write_manifests(dir: &Path) -> (PathBuf, PathBuf) {
        let near = dir.join("project/toolshed.toml");
        let far = dir.join("toolshed.toml");
        fs::create_dir_all(dir.join("project")).unwrap();
        fs::write(
            &near,
            r#"
[[registries]]
name = "standard"
path = "registry.toml"

[[packages]]
name = "cli/cli@v2.40.1"
tags = ["ci"]
"#,
        )
        .unwrap();
        fs::write(
            &far,
            r#"
[[registries]]
name = "standard"
path = "registry.toml"

[[packages]]
name = "cli/cli@v1.0.0"

[[packages]]
name = "jqlang/jq@jq-1.7.1"
"#,
        )
        .unwrap();
        (near, far)
    }

    #[tokio::test]
    async fn nearest_manifest_wins_and_tags_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (near, far) = write_manifests(dir.path());
        let finder = FixedConfigFinder::new(vec![near, far]);
        let policy = PolicyEnforcer::default();

        let plan = plan_requests(&finder, dir.path(), &policy, &loader(), &PlanOptions::default())
            .await
            .unwrap();
        assert_eq!(plan.requests.len(), 2);
        assert_eq!(
            plan.requests[0].package.requested,
            RequestedVersion::Exact("v2.40.1".into())
        );
        assert!(plan.find_command("jq").is_some());

        let tagged = PlanOptions {
            tags: vec!["ci".into()],
            ..PlanOptions::default()
        };
        let plan = plan_requests(&finder, dir.path(), &policy, &loader(), &tagged)
            .await
            .unwrap();
        assert_eq!(plan.requests.len(), 1);
        assert_eq!(plan.requests[0].package.name.as_str(), "cli/cli");
    }

    #[tokio::test]
    async fn untrusted_registry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (near, _) = write_manifests(dir.path());
        let policy_path = dir.path().join("policy.toml");
        let policy = PolicyEnforcer::new(vec![
            PolicyDocument::parse(
                &policy_path,
                r#"
[[rules]]
kind = "allow"
target = "config"
pattern = "**/toolshed.toml"
"#,
            )
            .unwrap(),
        ]);
        let finder = FixedConfigFinder::new(vec![near]);

        let err = plan_requests(&finder, dir.path(), &policy, &loader(), &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PolicyViolation { path, .. } if path.ends_with("registry.toml")));
    }

    #[tokio::test]
    async fn untrusted_manifest_is_rejected_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("toolshed.toml");
        fs::write(&manifest, "not = [valid").unwrap();
        let policy = PolicyEnforcer::new(vec![
            PolicyDocument::parse(&dir.path().join("policy.toml"), "").unwrap(),
        ]);
        let finder = FixedConfigFinder::new(vec![manifest]);

        let err = plan_requests(&finder, dir.path(), &policy, &loader(), &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PolicyViolation { .. }));
    }
}
