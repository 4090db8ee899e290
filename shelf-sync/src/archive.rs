//! Archive installer: unpack a module zip over its folder and prune leftovers.
//!
//! ## Install protocol
//!
//! 1. Fetch the archive bytes.
//! 2. Validate every entry name (no entry may escape the target).
//! 3. For each file entry not under an excluded path: create parents, write
//!    to `<path>.shelf.tmp`, rename into place, record `(path, sha256)`.
//!    A failed write is logged and skipped.
//! 4. If the target existed before, delete files that were not written and
//!    directories left with nothing to keep. Refuse if that would empty the
//!    folder while the archive has entries that were not excluded.
//! 5. Return the digest of the written set.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

use shelf_core::types::path_within;

use crate::collab::Fetcher;
use crate::error::{io_err, SyncError};
use crate::hasher::{digest_map, relative_key, sha256_hex, FileHashes};

/// Outcome of one archive install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Digest of the written `(path, hash)` set. Becomes the installed baseline.
    pub digest: String,
    pub written: usize,
    /// Entries whose write failed and were skipped.
    pub failed: Vec<String>,
    /// Entries skipped because they sit under an excluded path.
    pub excluded: usize,
    /// Stale files removed from a pre-existing folder.
    pub pruned: usize,
}

/// Download `archive_url` and install it into `target`.
///
/// `exclude` lists module-relative paths (opted-out submodule paths) whose
/// entries are skipped, and therefore pruned from an existing folder.
pub async fn install(
    fetcher: &dyn Fetcher,
    archive_url: &str,
    target: &Path,
    exclude: &[String],
) -> Result<InstallReport, SyncError> {
    let bytes = fetcher.fetch(archive_url).await?;
    tracing::debug!(
        url = archive_url,
        bytes = bytes.len(),
        target = %target.display(),
        "archive downloaded",
    );

    let url = archive_url.to_string();
    let target = target.to_path_buf();
    let exclude = exclude.to_vec();
    tokio::task::spawn_blocking(move || install_bytes(&url, &bytes, &target, &exclude)).await?
}

/// Blocking half of [`install`]; `url` is only used for error context.
pub fn install_bytes(
    url: &str,
    bytes: &[u8],
    target: &Path,
    exclude: &[String],
) -> Result<InstallReport, SyncError> {
    let format_err = |source| SyncError::ArchiveFormat {
        url: url.to_string(),
        source,
    };
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(format_err)?;

    // Validate names before touching the filesystem.
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(format_err)?;
        if file.is_dir() {
            continue;
        }
        let Some(key) = file.enclosed_name().and_then(|p| entry_key(&p)) else {
            return Err(SyncError::UnsafeEntry {
                name: file.name().to_string(),
            });
        };
        entries.push((index, key));
    }

    let pre_existed = target.exists();
    fs::create_dir_all(target).map_err(|e| io_err(target, e))?;

    let mut written = FileHashes::new();
    let mut failed = Vec::new();
    let mut excluded = 0usize;

    for (index, key) in &entries {
        if exclude.iter().any(|prefix| path_within(key, prefix)) {
            excluded += 1;
            continue;
        }

        let mut file = archive.by_index(*index).map_err(format_err)?;
        let mut content = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut content)
            .map_err(|e| format_err(zip::result::ZipError::Io(e)))?;

        let dest = target.join(key);
        match write_entry(&dest, &content) {
            Ok(()) => {
                written.insert(key.clone(), sha256_hex(&content));
            }
            Err(err) => {
                tracing::warn!(
                    path = %dest.display(),
                    error = %err,
                    "failed to write archive entry, skipping",
                );
                failed.push(key.clone());
            }
        }
    }

    let mut pruned = 0;
    if pre_existed {
        let wanted = entries.len() - excluded;
        if wanted > 0 && written.is_empty() {
            return Err(SyncError::Consistency(format!(
                "refusing to prune {}: archive has {wanted} wanted entries but none were written",
                target.display(),
            )));
        }
        pruned = prune(target, &written)?;
    }

    tracing::info!(
        target = %target.display(),
        written = written.len(),
        failed = failed.len(),
        excluded,
        pruned,
        "archive installed",
    );

    Ok(InstallReport {
        digest: digest_map(&written),
        written: written.len(),
        failed,
        excluded,
        pruned,
    })
}

/// Write one entry via a `.shelf.tmp` sibling and rename.
fn write_entry(dest: &Path, content: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}.shelf.tmp", dest.display()));
    fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(dest, e));
    }
    Ok(())
}

/// Delete every file under `target` not in `keep`, then every directory
/// that neither is nor contains a kept path. Individual failures are logged.
///
/// Returns the number of files removed.
pub fn prune(target: &Path, keep: &FileHashes) -> Result<usize, SyncError> {
    let keep_dirs = ancestor_dirs(keep.keys().map(String::as_str));
    let mut removed = 0usize;

    for entry in WalkDir::new(target)
        .min_depth(1)
        .contents_first(true)
        .follow_links(false)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry while pruning");
                continue;
            }
        };
        let key = relative_key(target, entry.path())?;

        if entry.file_type().is_dir() {
            if keep_dirs.contains(key.as_str()) {
                continue;
            }
            if let Err(err) = fs::remove_dir(entry.path()) {
                tracing::warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove stale directory",
                );
            }
        } else {
            if keep.contains_key(&key) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(path = %entry.path().display(), "pruned stale file");
                }
                Err(err) => tracing::warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove stale file",
                ),
            }
        }
    }
    Ok(removed)
}

/// Every proper ancestor directory of each path: `a/b/c.txt` → `a`, `a/b`.
fn ancestor_dirs<'a>(paths: impl Iterator<Item = &'a str>) -> HashSet<&'a str> {
    let mut dirs = HashSet::new();
    for path in paths {
        let mut end = 0;
        while let Some(pos) = path[end..].find('/') {
            end += pos;
            dirs.insert(&path[..end]);
            end += 1;
        }
    }
    dirs
}

/// Normalised `/`-joined key for a sanitized entry path, or `None` if empty.
fn entry_key(path: &Path) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
