//! Zip packaging of proxy bundles.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{ShardError, ShardResult};

/// Unpack every `*.zip` in `zip_dir` into `dest/<stem>/`.
///
/// Returns the unpacked bundle names, sorted.  An archive that fails to
/// unpack is logged and skipped so one corrupt export does not stop the rest.
pub fn unpack_bundles(zip_dir: &Path, dest: &Path) -> ShardResult<Vec<String>> {
    std::fs::create_dir_all(dest)?;

    let mut archives: Vec<_> = std::fs::read_dir(zip_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("zip"))
                    .unwrap_or(false)
        })
        .collect();
    archives.sort();

    let mut unpacked = Vec::with_capacity(archives.len());
    for archive_path in archives {
        let Some(stem) = archive_path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        match unpack_archive(&archive_path, &dest.join(&stem)) {
            Ok(()) => unpacked.push(stem),
            Err(e) => warn!(archive = %archive_path.display(), error = %e, "failed to unpack bundle"),
        }
    }
    info!(count = unpacked.len(), dest = %dest.display(), "unpacked bundles");
    Ok(unpacked)
}

/// Unpack one archive into `dest`.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> ShardResult<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;
    archive.extract(dest)?;
    Ok(())
}

/// Zip the directory `src` into `archive_path`, with entries rooted at
/// `<prefix>/` (typically `apiproxy`).
pub fn pack_directory(src: &Path, archive_path: &Path, prefix: &str) -> ShardResult<()> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).map_err(|e| {
            ShardError::Split(format!("cannot relativize {}: {e}", entry.path().display()))
        })?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let name = if relative.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{relative}")
        };

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            std::io::copy(&mut source, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pack_then_unpack() {
        let work = TempDir::new().unwrap();
        let src = work.path().join("apiproxy");
        std::fs::create_dir_all(src.join("policies")).unwrap();
        std::fs::write(src.join("orders.xml"), "<APIProxy name=\"orders\"/>").unwrap();
        std::fs::write(src.join("policies").join("q.xml"), "<Quota/>").unwrap();

        let zips = work.path().join("zips");
        pack_directory(&src, &zips.join("orders.zip"), "apiproxy").unwrap();

        let out = work.path().join("out");
        let names = unpack_bundles(&zips, &out).unwrap();
        assert_eq!(names, vec!["orders"]);
        assert!(out.join("orders/apiproxy/orders.xml").is_file());
        assert!(out.join("orders/apiproxy/policies/q.xml").is_file());
    }

    #[test]
    fn test_corrupt_archive_is_skipped() {
        let work = TempDir::new().unwrap();
        let zips = work.path().join("zips");
        std::fs::create_dir_all(&zips).unwrap();
        std::fs::write(zips.join("broken.zip"), b"not a zip").unwrap();
        let names = unpack_bundles(&zips, &work.path().join("out")).unwrap();
        assert!(names.is_empty());
    }
}
