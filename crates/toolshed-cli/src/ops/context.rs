//! Shared command context.
//!
//! Builds the engine once per invocation: configuration, policy, HTTP
//! stack, checksum ledger and the coordinator on top of them.

use anyhow::{Context as _, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use toolshed_core::download::http_client;
use toolshed_core::version::GitHubApi;
use toolshed_core::{
    ChecksumLedger, EngineConfig, FileRegistryLoader, FsConfigFinder, HttpDownloader,
    InstallCoordinator, PackageInstaller, Plan, PlanOptions, PolicyEnforcer, Reporter,
    VersionGetter, VersionSources, plan_requests,
};

use super::settings;
use crate::GlobalArgs;

/// Groups the engine pieces a command needs.
#[derive(Clone)]
pub struct Context {
    /// Effective engine configuration.
    pub config: Arc<EngineConfig>,
    /// Directory the command runs in.
    pub working_dir: PathBuf,
    /// Manifest named by `--config`.
    pub explicit_config: Option<PathBuf>,
    /// Policy gating manifests and registries.
    pub policy: Arc<PolicyEnforcer>,
    /// HTTP stack for registries and assets.
    pub downloader: Arc<HttpDownloader>,
    /// Installs packages.
    pub coordinator: InstallCoordinator,
    /// Finds the manifests in scope.
    pub finder: FsConfigFinder,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root_dir", &self.config.root_dir)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Build the engine from flags and variables.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an unloadable policy or ledger, or
    /// an HTTP client that cannot be built.
    pub fn new(global: &GlobalArgs, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let working_dir = std::env::current_dir().context("Failed to read working directory")?;
        let config = Arc::new(settings::engine_config(global, &working_dir)?);
        let policy = PolicyEnforcer::from_config(&config)?;

        let client = http_client().context("Failed to build HTTP client")?;
        let downloader = Arc::new(HttpDownloader::new(client.clone(), config.network_timeout));
        let github = GitHubApi::default().with_token(global.github_token.clone());
        let versions = VersionGetter::new(VersionSources::standard(client, github), config.retry);

        let ledger = ChecksumLedger::load(&config.ledger_path())?;
        let installer = PackageInstaller::new(
            Arc::clone(&config),
            downloader.clone(),
            Arc::new(ledger),
            reporter,
        );
        let coordinator = InstallCoordinator::new(&config, installer, versions);

        Ok(Self {
            finder: FsConfigFinder::new(settings::global_configs(global, &working_dir)),
            explicit_config: global.config.clone(),
            policy: Arc::new(policy),
            cancel: interrupt_token(),
            config,
            working_dir,
            downloader,
            coordinator,
        })
    }

    /// Plan options targeting the bin directory.
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            explicit: self.explicit_config.clone(),
            target_dir: self.config.bin_dir(),
            ..PlanOptions::default()
        }
    }

    /// Requests for every manifest in scope.
    ///
    /// # Errors
    ///
    /// Fails if a manifest or registry cannot be loaded or is denied by
    /// policy.
    pub async fn plan(&self, options: &PlanOptions) -> Result<Plan> {
        let loader = FileRegistryLoader::new(
            self.downloader.clone(),
            self.config.retry,
            self.cancel.clone(),
        );
        let plan = plan_requests(
            &self.finder,
            &self.working_dir,
            &self.policy,
            &loader,
            options,
        )
        .await?;
        if plan.manifests.is_empty() {
            tracing::warn!(
                "No toolshed.toml found in {} or its parents",
                self.working_dir.display()
            );
        }
        Ok(plan)
    }
}

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after in-flight steps");
            on_interrupt.cancel();
        }
    });
    token
}
