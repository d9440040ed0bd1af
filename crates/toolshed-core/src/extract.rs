//! Archive extraction
//!
//! Handles tar.gz, tar.zst, plain tar, zip, gzip-compressed executables and
//! raw executables. Extraction is synchronous; callers run it on the
//! blocking pool.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use toolshed_schema::ArchiveKind;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Why an asset could not be unpacked.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Reading the asset or writing below the destination failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The asset kind has no extractor; carries the format name.
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// The archive is malformed or an entry would land outside the
    /// destination; carries a description of the offending entry.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Information about an extracted file
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Whether the archive marked it executable
    pub is_executable: bool,
}

/// Unpack `archive_path` into `dest_dir` according to `kind`.
///
/// Raw assets are copied, and gzip-compressed executables decompressed, to
/// `dest_dir/<raw_name>` and made executable.
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedFormat`] for [`ArchiveKind::Unknown`],
/// or an io/archive error if unpacking fails or an entry escapes `dest_dir`.
pub fn extract(
    archive_path: &Path,
    kind: &ArchiveKind,
    dest_dir: &Path,
    raw_name: &str,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    match kind {
        ArchiveKind::TarGz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArchiveKind::TarZst => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(ZstdDecoder::new(reader)?, dest_dir)
        }
        ArchiveKind::Tar => extract_tar(BufReader::new(File::open(archive_path)?), dest_dir),
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir),
        ArchiveKind::Gz => {
            let reader = BufReader::new(File::open(archive_path)?);
            write_single(&mut flate2::read::GzDecoder::new(reader), dest_dir, raw_name)
        }
        ArchiveKind::Raw => write_single(&mut File::open(archive_path)?, dest_dir, raw_name),
        ArchiveKind::Unknown(format) => Err(ExtractError::UnsupportedFormat(format.clone())),
    }
}

/// Reject absolute paths and `..` so entries stay under the destination.
fn sanitize(path: &Path) -> Result<PathBuf, ExtractError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::Archive(format!(
                    "Invalid path in archive: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(clean)
}

/// Returns `true` if a link stored at `parent/<name>` pointing at `target`
/// resolves outside the extraction root.
fn link_escapes(parent: &Path, target: &Path) -> bool {
    let mut depth = parent.components().count();
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

/// Extract a tar archive from a reader
///
/// Symlinks and hard links must point inside `dest_dir`, and every entry is
/// written through [`tar::Entry::unpack_in`], which refuses to follow a link
/// out of the destination.
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut extracted_files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let relative_path = sanitize(&entry.path()?)?;
        if relative_path.as_os_str().is_empty() {
            continue;
        }

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry.link_name()?.ok_or_else(|| {
                ExtractError::Archive(format!("Link without target: {}", relative_path.display()))
            })?;
            // Hard link targets are archive paths; symlinks resolve from
            // their own directory.
            let parent = if entry_type.is_hard_link() {
                Path::new("")
            } else {
                relative_path.parent().unwrap_or_else(|| Path::new(""))
            };
            if link_escapes(parent, &target) {
                return Err(ExtractError::Archive(format!(
                    "Link escapes destination: {} -> {}",
                    relative_path.display(),
                    target.display()
                )));
            }
        }

        if !entry.unpack_in(dest_dir)? {
            return Err(ExtractError::Archive(format!(
                "Entry escapes destination: {}",
                relative_path.display()
            )));
        }
        if entry_type.is_dir() {
            continue;
        }

        let is_executable = entry.header().mode().is_ok_and(|m| m & 0o111 != 0);
        extracted_files.push(ExtractedFile {
            relative_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };

        let absolute_path = dest_dir.join(&relative_path);
        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        let is_executable = if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
            mode & 0o111 != 0
        } else {
            false
        };
        #[cfg(not(unix))]
        let is_executable = false;

        extracted_files.push(ExtractedFile {
            relative_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

/// Write a single executable read from `reader` to `dest_dir/<raw_name>`.
fn write_single(
    reader: &mut impl Read,
    dest_dir: &Path,
    raw_name: &str,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let relative_path = sanitize(Path::new(raw_name))?;
    if relative_path.as_os_str().is_empty() {
        return Err(ExtractError::Archive("Invalid filename".to_string()));
    }
    let dest_path = dest_dir.join(&relative_path);
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(&dest_path)?;
    io::copy(reader, &mut out)?;
    drop(out);
    make_executable(&dest_path)?;

    Ok(vec![ExtractedFile {
        relative_path,
        is_executable: true,
    }])
}

/// Add execute permission (no-op off unix).
///
/// # Errors
///
/// Returns the io error if the permissions cannot be read or written.
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
