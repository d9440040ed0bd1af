//! Table rendering for listings.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{ContentArrangement, Table};
use toolshed_core::StoreEntry;
use toolshed_core::version::VersionCandidate;

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

/// Version candidates, newest first.
pub fn versions_table(candidates: &[&VersionCandidate]) -> Table {
    let mut table = table(&["VERSION", "PUBLISHED", "PRERELEASE"]);
    for candidate in candidates {
        let published = candidate
            .published_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let prerelease = if candidate.is_prerelease() { "yes" } else { "" };
        table.add_row(vec![
            candidate.version.to_string(),
            published,
            prerelease.to_string(),
        ]);
    }
    table
}

/// Published store entries.
pub fn entries_table(entries: &[StoreEntry]) -> Table {
    let mut table = table(&["PACKAGE", "VERSION", "COMMANDS", "INSTALLED"]);
    for entry in entries {
        let commands = entry
            .marker
            .files
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            entry.key.package.clone(),
            entry.key.version.to_string(),
            commands,
            entry.marker.installed_at.format("%Y-%m-%d").to_string(),
        ]);
    }
    table
}
