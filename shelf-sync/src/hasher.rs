//! Content fingerprints.
//!
//! A fingerprint is SHA-256 over the concatenation `path || hash` of every
//! file, with entries ordered by `hash` (then `path`). Ordering by content
//! hash makes the digest a function of the *set* of `(path, hash)` pairs and
//! independent of enumeration order. The empty set hashes the empty string.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{io_err, SyncError};

/// Relative `/`-separated path → SHA-256 hex of the file's bytes.
pub type FileHashes = HashMap<String, String>;

const READ_CHUNK: usize = 64 * 1024;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stream `reader` through SHA-256 without buffering it whole.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Order-independent digest over `(path, hash)` pairs.
pub fn digest<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut list: Vec<(&str, &str)> = entries.into_iter().collect();
    // Ties on hash (identical content) fall back to path so the order is total.
    list.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));

    let mut hasher = Sha256::new();
    for (path, hash) in list {
        hasher.update(path.as_bytes());
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn digest_map(hashes: &FileHashes) -> String {
    digest(hashes.iter().map(|(p, h)| (p.as_str(), h.as_str())))
}

// ---------------------------------------------------------------------------
// Folder fingerprint
// ---------------------------------------------------------------------------

/// Fingerprint every regular file under `root`, hidden files included.
///
/// Any unreadable entry fails the whole walk: a fingerprint that silently
/// dropped a file would hide a modification.
pub async fn fingerprint(root: &Path) -> Result<String, SyncError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_blocking(&root)).await?
}

pub fn fingerprint_blocking(root: &Path) -> Result<String, SyncError> {
    Ok(digest_map(&hash_tree(root)?))
}

/// Hash every regular file under `root`. Only the hashes are held in memory.
pub fn hash_tree(root: &Path) -> Result<FileHashes, SyncError> {
    let mut hashes = FileHashes::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| walk_err(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let key = relative_key(root, entry.path())?;
        let file = File::open(entry.path()).map_err(|e| io_err(entry.path(), e))?;
        let hash = hash_reader(BufReader::new(file)).map_err(|e| io_err(entry.path(), e))?;
        hashes.insert(key, hash);
    }
    Ok(hashes)
}

/// Cheap metadata summary of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub files: usize,
    pub latest_mtime: Option<SystemTime>,
}

pub async fn tree_stats(root: &Path) -> Result<TreeStats, SyncError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || tree_stats_blocking(&root)).await?
}

pub fn tree_stats_blocking(root: &Path) -> Result<TreeStats, SyncError> {
    let mut stats = TreeStats {
        files: 0,
        latest_mtime: None,
    };
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| walk_err(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        stats.files += 1;
        let modified = entry
            .metadata()
            .map_err(|e| walk_err(root, e))?
            .modified()
            .map_err(|e| io_err(entry.path(), e))?;
        stats.latest_mtime = Some(match stats.latest_mtime {
            Some(latest) if latest >= modified => latest,
            _ => modified,
        });
    }
    Ok(stats)
}

/// `root/a/b.txt` → `"a/b.txt"` regardless of platform separator.
pub fn relative_key(root: &Path, path: &Path) -> Result<String, SyncError> {
    let rel = path.strip_prefix(root).map_err(|_| {
        SyncError::Consistency(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

pub(crate) fn walk_err(root: &Path, err: walkdir::Error) -> SyncError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    io_err(path, source)
}
