//! Checksum ledger and verification.
//!
//! The ledger is a pretty-printed JSON file holding at most one record per
//! (package, version, asset). It is loaded fully into memory and read without
//! locks during installs; only [`crate::updater::ChecksumUpdater`] mutates it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use toolshed_schema::{ChecksumAlgorithm, Digest, Version};

use crate::error::EngineError;

/// Identity of a ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChecksumKey {
    /// Package identity (`registry/name`).
    pub package: String,
    /// Resolved version.
    pub version: String,
    /// Asset filename.
    pub asset: String,
}

impl ChecksumKey {
    /// Build a key from its parts.
    pub fn new(package: impl Into<String>, version: &Version, asset: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.to_string(),
            asset: asset.into(),
        }
    }
}

/// Expected digest of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    /// Package identity (`registry/name`).
    pub package: String,
    /// Resolved version.
    pub version: String,
    /// Asset filename.
    pub asset: String,
    /// Digest algorithm; sha256 when omitted.
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
    /// Expected digest.
    pub digest: Digest,
}

impl ChecksumRecord {
    /// The record's key.
    pub fn key(&self) -> ChecksumKey {
        ChecksumKey {
            package: self.package.clone(),
            version: self.version.clone(),
            asset: self.asset.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    checksums: Vec<ChecksumRecord>,
}

/// What [`ChecksumLedger::insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No record existed.
    Added,
    /// An identical record existed.
    Unchanged,
    /// A different record existed and was kept (`overwrite` was false).
    Kept,
    /// A different record existed and was replaced.
    Replaced,
}

/// In-memory checksum ledger.
#[derive(Debug, Default, Clone)]
pub struct ChecksumLedger {
    records: BTreeMap<ChecksumKey, ChecksumRecord>,
}

impl ChecksumLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a ledger. A missing file yields an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if the file cannot be read or parsed,
    /// or if it holds two different records for the same key.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let ledger_err = |message: String| EngineError::Ledger {
            path: path.display().to_string(),
            message,
        };
        let content = fs::read_to_string(path).map_err(|e| ledger_err(e.to_string()))?;
        let file: LedgerFile =
            serde_json::from_str(&content).map_err(|e| ledger_err(e.to_string()))?;

        let mut records = BTreeMap::new();
        for record in file.checksums {
            let key = record.key();
            if let Some(existing) = records.get(&key) {
                if existing != &record {
                    return Err(ledger_err(format!(
                        "conflicting records for {}@{} ({})",
                        key.package, key.version, key.asset
                    )));
                }
                continue;
            }
            records.insert(key, record);
        }
        Ok(Self { records })
    }

    /// Atomically persist the ledger to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if serialization, writing or the
    /// atomic rename fails.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let ledger_err = |message: String| EngineError::Ledger {
            path: path.display().to_string(),
            message,
        };
        let file = LedgerFile {
            checksums: self.records.values().cloned().collect(),
        };
        let mut content =
            serde_json::to_string_pretty(&file).map_err(|e| ledger_err(e.to_string()))?;
        content.push('\n');

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ledger_err(e.to_string()))?;
        }
        let temp_path = temp_sibling(path);
        fs::write(&temp_path, &content).map_err(|e| ledger_err(e.to_string()))?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            ledger_err(e.to_string())
        })
    }

    /// Look up the record for an artifact.
    pub fn get(&self, key: &ChecksumKey) -> Option<&ChecksumRecord> {
        self.records.get(key)
    }

    /// Add a record. An existing different record is replaced only when
    /// `overwrite` is set.
    pub fn insert(&mut self, record: ChecksumRecord, overwrite: bool) -> InsertOutcome {
        let key = record.key();
        match self.records.get(&key) {
            None => {
                self.records.insert(key, record);
                InsertOutcome::Added
            }
            Some(existing) if existing == &record => InsertOutcome::Unchanged,
            Some(_) if overwrite => {
                self.records.insert(key, record);
                InsertOutcome::Replaced
            }
            Some(_) => InsertOutcome::Kept,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the ledger holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &ChecksumRecord> {
        self.records.values()
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Compute the digest of a file, streaming it through the hasher.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the file cannot be read.
pub fn compute_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Digest, EngineError> {
    let mut file = fs::File::open(path).map_err(|e| EngineError::io_at("open", path, &e))?;
    let mut feed = |update: &mut dyn FnMut(&[u8])| -> Result<(), EngineError> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| EngineError::io_at("read", path, &e))?;
            if n == 0 {
                return Ok(());
            }
            update(&buf[..n]);
        }
    };

    let bytes = match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            feed(&mut |chunk| hasher.update(chunk))?;
            hasher.finalize().to_vec()
        }
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = sha2::Sha512::new();
            feed(&mut |chunk| hasher.update(chunk))?;
            hasher.finalize().to_vec()
        }
        ChecksumAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            feed(&mut |chunk| {
                hasher.update(chunk);
            })?;
            hasher.finalize().as_bytes().to_vec()
        }
    };
    Ok(Digest::from_bytes(&bytes))
}

/// Compute a digest on the blocking pool.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the file cannot be read or the blocking
/// task panics.
pub async fn compute_digest_async(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<Digest, EngineError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_digest(&path, algorithm))
        .await
        .map_err(|e| EngineError::Io {
            context: "Checksum task failed".to_string(),
            message: e.to_string(),
        })?
}

/// Check `path` against `record`.
///
/// # Errors
///
/// Returns [`EngineError::ChecksumMismatch`] if the digests differ.
pub async fn verify(path: &Path, record: &ChecksumRecord) -> Result<Digest, EngineError> {
    let actual = compute_digest_async(path, record.algorithm).await?;
    // Both sides are normalized to lowercase hex.
    if actual != record.digest {
        return Err(EngineError::ChecksumMismatch {
            package: record.package.clone(),
            version: record.version.clone(),
            asset: record.asset.clone(),
            algorithm: record.algorithm.to_string(),
            expected: record.digest.to_string(),
            actual: actual.to_string(),
        });
    }
    tracing::debug!(
        "Verified {}@{} ({}) {}:{}",
        record.package,
        record.version,
        record.asset,
        record.algorithm,
        actual
    );
    Ok(actual)
}

/// Find the digest for `asset` in a `<digest> <filename>` checksum file.
///
/// A leading `*` (binary mode marker) and `./` on the filename are ignored.
/// A file containing a single bare digest applies to any asset.
pub fn parse_checksum_file(text: &str, asset: &str) -> Option<Digest> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    for line in &lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            let filename = parts[1].trim_start_matches('*').trim_start_matches("./");
            if filename == asset {
                return Digest::parse(parts[0]).ok();
            }
        }
    }

    match lines.as_slice() {
        [only] if !only.contains(char::is_whitespace) => Digest::parse(only).ok(),
        _ => None,
    }
}
