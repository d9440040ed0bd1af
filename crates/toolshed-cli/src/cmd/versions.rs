//! Versions command

use anyhow::{Context as _, Result};
use std::sync::Arc;

use toolshed_core::version::fuzzy_rank;
use toolshed_core::{NullReporter, VersionFilter};

use crate::GlobalArgs;
use crate::ops::context::Context;
use crate::ui::table::versions_table;

/// List upstream versions of a package from the manifests in scope.
///
/// # Errors
///
/// Fails if no manifest lists `package` or its versions cannot be fetched.
pub async fn versions(
    global: &GlobalArgs,
    package: &str,
    query: Option<&str>,
    limit: usize,
    prerelease: bool,
) -> Result<()> {
    let ctx = Context::new(global, Arc::new(NullReporter))?;
    let plan = ctx.plan(&ctx.plan_options()).await?;
    let request = plan
        .requests
        .iter()
        .find(|r| r.package.name.as_str() == package || r.package.id() == package)
        .with_context(|| format!("'{package}' is not listed in any manifest in scope"))?;

    let filter = VersionFilter {
        include_prerelease: prerelease,
        ..VersionFilter::default()
    };
    let candidates = ctx
        .coordinator
        .versions()
        .list(&request.package.id(), &request.info, &filter, None, &ctx.cancel)
        .await?;

    let ranked: Vec<_> = fuzzy_rank(&candidates, query.unwrap_or_default())
        .into_iter()
        .take(limit)
        .collect();
    if ranked.is_empty() {
        println!("No versions of {} match.", request.package.id());
        return Ok(());
    }
    println!("{}", versions_table(&ranked));
    Ok(())
}
