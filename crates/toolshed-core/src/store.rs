//! The package store.
//!
//! ```text
//! <root>/pkgs/<registry>/<package>/<version>/<asset>/   published entries
//! <root>/tmp/stage-*/                                 staging directories
//! ```
//!
//! An entry is published by writing the completion marker into a staging
//! directory and renaming that directory into place, so a partially
//! extracted entry is never visible at its final path. A final directory
//! without a marker is debris from a foreign writer and gets replaced.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use toolshed_schema::Version;
use walkdir::WalkDir;

use crate::error::EngineError;

/// Name of the completion marker inside every published entry.
pub const MARKER_FILE: &str = ".toolshed-complete";

/// Identity of an installed artifact: (package, version, asset filename).
///
/// Two requests with equal keys write the same store path, so the
/// coordinator lets only one of them run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    /// Package identity (`registry/name`).
    pub package: String,
    /// Resolved version.
    pub version: Version,
    /// Asset filename.
    pub asset: String,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.package, self.version, self.asset)
    }
}

/// A command provided by an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFile {
    /// Command name.
    pub name: String,
    /// Path relative to the entry directory.
    pub src: String,
}

/// Contents of the completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Package identity (`registry/name`).
    pub package: String,
    /// Resolved version.
    pub version: String,
    /// Asset filename.
    pub asset: String,
    /// Digest verified at install time, if any.
    #[serde(default)]
    pub digest: Option<String>,
    /// Commands provided.
    #[serde(default)]
    pub files: Vec<EntryFile>,
    /// When the entry was published.
    pub installed_at: DateTime<Utc>,
}

/// A published (package, version, asset) directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Artifact identity.
    pub key: ArtifactKey,
    /// Final directory.
    pub path: PathBuf,
    /// Marker contents.
    pub marker: CompletionMarker,
}

impl StoreEntry {
    /// Absolute path of the executable behind `command`.
    pub fn command_path(&self, command: &str) -> Option<PathBuf> {
        self.marker
            .files
            .iter()
            .find(|f| f.name == command)
            .map(|f| self.path.join(&f.src))
    }
}

/// Percent-escape `%`, path separators and `:` so a value is one directory
/// component and distinct values stay distinct. Dot-only names have their
/// dots escaped and the empty string becomes `%`.
fn component(s: &str) -> String {
    if s.is_empty() {
        return "%".to_string();
    }
    let dots_only = s.chars().all(|c| c == '.');
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            '.' if dots_only => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

/// The on-disk store.
#[derive(Debug, Clone)]
pub struct Store {
    pkgs: PathBuf,
    tmp: PathBuf,
}

impl Store {
    /// Store rooted at `pkgs`, staging under `tmp`. Both must be on the same
    /// filesystem.
    pub fn new(pkgs: impl Into<PathBuf>, tmp: impl Into<PathBuf>) -> Self {
        Self {
            pkgs: pkgs.into(),
            tmp: tmp.into(),
        }
    }

    /// Final directory of `key`.
    pub fn entry_dir(&self, key: &ArtifactKey) -> PathBuf {
        let mut path = self.pkgs.clone();
        for segment in key.package.split('/') {
            path.push(component(segment));
        }
        path.push(component(key.version.as_str()));
        path.push(component(&key.asset));
        path
    }

    /// The published entry for `key`, if complete.
    pub fn lookup(&self, key: &ArtifactKey) -> Option<StoreEntry> {
        let path = self.entry_dir(key);
        let marker = read_marker(&path)?;
        Some(StoreEntry {
            key: key.clone(),
            path,
            marker,
        })
    }

    /// Create a fresh staging directory. Dropping it removes it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the directory cannot be created.
    pub fn stage(&self) -> Result<TempDir, EngineError> {
        fs::create_dir_all(&self.tmp).map_err(|e| EngineError::io_at("create", &self.tmp, &e))?;
        tempfile::Builder::new()
            .prefix("stage-")
            .tempdir_in(&self.tmp)
            .map_err(|e| EngineError::io_at("create staging directory in", &self.tmp, &e))
    }

    /// Write the marker into `staged` and rename it to the final path.
    ///
    /// An existing complete entry is kept unless `replace` is set; an
    /// existing incomplete directory is always replaced. A replaced entry is
    /// first moved aside, so the final path never holds a mix of old and new
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the marker cannot be written or a
    /// rename fails. The staging directory is removed on failure.
    pub fn publish(
        &self,
        staged: TempDir,
        key: &ArtifactKey,
        marker: CompletionMarker,
        replace: bool,
    ) -> Result<StoreEntry, EngineError> {
        let marker_path = staged.path().join(MARKER_FILE);
        let json = serde_json::to_string_pretty(&marker).map_err(|e| EngineError::Io {
            context: format!("Failed to encode marker for {key}"),
            message: e.to_string(),
        })?;
        fs::write(&marker_path, json).map_err(|e| EngineError::io_at("write", &marker_path, &e))?;

        let final_dir = self.entry_dir(key);
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io_at("create", parent, &e))?;
        }

        let mut trash = None;
        if final_dir.exists() {
            if !replace {
                if let Some(existing) = self.lookup(key) {
                    tracing::debug!("{key} already published, discarding staged copy");
                    return Ok(existing);
                }
                tracing::warn!(
                    "Replacing incomplete store directory {}",
                    final_dir.display()
                );
            }
            let aside = tempfile::Builder::new()
                .prefix("trash-")
                .tempdir_in(&self.tmp)
                .map_err(|e| EngineError::io_at("create trash directory in", &self.tmp, &e))?;
            let old = aside.path().join("old");
            fs::rename(&final_dir, &old)
                .map_err(|e| EngineError::io_at("move aside", &final_dir, &e))?;
            trash = Some(aside);
        }

        let staged_path = staged.keep();
        if let Err(e) = fs::rename(&staged_path, &final_dir) {
            let _ = fs::remove_dir_all(&staged_path);
            return Err(EngineError::io_at("publish", &final_dir, &e));
        }
        // Removes the previous entry, if any.
        drop(trash);

        tracing::info!("Published {key} to {}", final_dir.display());
        Ok(StoreEntry {
            key: key.clone(),
            path: final_dir,
            marker,
        })
    }

    /// Delete the directory of `key`, returning the entry it held if it was
    /// complete.
    ///
    /// The directory is renamed into the staging area first, so a concurrent
    /// lookup sees either the whole entry or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the directory cannot be moved aside.
    pub fn remove(&self, key: &ArtifactKey) -> Result<Option<StoreEntry>, EngineError> {
        let final_dir = self.entry_dir(key);
        if !final_dir.exists() {
            return Ok(None);
        }
        let entry = self.lookup(key);
        fs::create_dir_all(&self.tmp).map_err(|e| EngineError::io_at("create", &self.tmp, &e))?;
        let aside = tempfile::Builder::new()
            .prefix("trash-")
            .tempdir_in(&self.tmp)
            .map_err(|e| EngineError::io_at("create trash directory in", &self.tmp, &e))?;
        fs::rename(&final_dir, aside.path().join("old"))
            .map_err(|e| EngineError::io_at("move aside", &final_dir, &e))?;
        aside
            .close()
            .map_err(|e| EngineError::io_at("remove", &final_dir, &e))?;
        tracing::info!("Removed {key} from {}", final_dir.display());
        Ok(entry)
    }

    /// Every complete entry in the store.
    pub fn installed(&self) -> Vec<StoreEntry> {
        let mut entries: Vec<StoreEntry> = WalkDir::new(&self.pkgs)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == MARKER_FILE)
            .filter_map(|e| {
                let path = e.path().parent()?.to_path_buf();
                let marker = read_marker(&path)?;
                Some(StoreEntry {
                    key: ArtifactKey {
                        package: marker.package.clone(),
                        version: Version::new(marker.version.clone()),
                        asset: marker.asset.clone(),
                    },
                    path,
                    marker,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Remove staging directories left behind by interrupted installs.
    ///
    /// Only safe while no install is running against this store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the staging area cannot be read.
    pub fn clean_staging(&self) -> Result<usize, EngineError> {
        let Ok(entries) = fs::read_dir(&self.tmp) else {
            return Ok(0);
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io_at("read", &self.tmp, &e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if (name.starts_with("stage-") || name.starts_with("trash-"))
                && fs::remove_dir_all(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_marker(dir: &Path) -> Option<CompletionMarker> {
    let content = fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}
