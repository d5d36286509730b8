//! Filesystem helpers for bundle directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{ShardError, ShardResult};

pub const PROXIES_DIR: &str = "proxies";
pub const TARGETS_DIR: &str = "targets";
pub const POLICIES_DIR: &str = "policies";
pub const MANIFESTS_DIR: &str = "manifests";

fn is_xml(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// Locate the root descriptor: the single `*.xml` file directly inside `dir`.
pub fn find_descriptor(dir: &Path) -> ShardResult<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ShardError::Parse(format!("cannot read bundle directory {}: {e}", dir.display()))
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_xml(path))
        .collect();

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(ShardError::Parse(format!(
            "directory {} has no xml file at root",
            dir.display()
        ))),
        _ => Err(ShardError::Parse(format!(
            "directory {} contains multiple xml files at root",
            dir.display()
        ))),
    }
}

/// Names (file stems) of every `*.xml` document in `dir`, sorted.
///
/// A missing directory yields an empty list.
pub fn list_documents(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return vec![],
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_xml(path))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

/// Path of the named document inside `dir`.
pub fn document_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.xml"))
}

/// Recursively copy `src` into `dst`, creating `dst` as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> ShardResult<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ShardError::Split(format!("cannot relativize {}: {e}", entry.path().display())))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Delete every `*.xml` document in `dir` whose name is not in `keep`.
///
/// Returns the number of documents removed.
pub fn prune_documents(dir: &Path, keep: &HashSet<String>) -> ShardResult<usize> {
    let mut removed = 0;
    for name in list_documents(dir) {
        if !keep.contains(&name) {
            std::fs::remove_file(document_path(dir, &name))?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "pruned unreferenced documents");
    }
    Ok(removed)
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(dir: &Path) -> ShardResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Hex SHA-256 digest of a file's contents.
pub fn compute_content_hash(path: &Path) -> ShardResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}
