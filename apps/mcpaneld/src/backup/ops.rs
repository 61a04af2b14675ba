use std::fs as stdfs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use mcpanel_core::CoreError;
use tracing::debug;
use walkdir::WalkDir;

/// Stream a max-compression tar.gz of `source` into `out`. Entry names are
/// relative to `root`, and anything under `exclude` is skipped. A partially
/// written archive is removed before the error is returned.
pub(crate) fn write_archive_blocking(
    root: &Path,
    source: &Path,
    exclude: &Path,
    out: &Path,
) -> Result<(), CoreError> {
    let file = stdfs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(out)
        .map_err(|e| CoreError::Archive(format!("create {} failed: {}", out.display(), e)))?;

    let result = fill_archive(file, root, source, exclude);
    if result.is_err() {
        let _ = stdfs::remove_file(out);
    }
    result
}

fn fill_archive(file: stdfs::File, root: &Path, source: &Path, exclude: &Path) -> Result<(), CoreError> {
    let archive_err = |e: std::io::Error| CoreError::Archive(e.to_string());

    let root = root.canonicalize().map_err(archive_err)?;
    let source = source.canonicalize().map_err(archive_err)?;
    let exclude = exclude.canonicalize().unwrap_or_else(|_| exclude.to_path_buf());

    let encoder = GzEncoder::new(file, Compression::best());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);

    let walker = WalkDir::new(&source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(&exclude));

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::Archive(format!("walk failed: {e}")))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(&root)
            .map_err(|_| CoreError::Archive(format!("{} escapes {}", path.display(), root.display())))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        tar.append_path_with_name(path, rel).map_err(archive_err)?;
    }

    let encoder = tar.into_inner().map_err(archive_err)?;
    let file = encoder.finish().map_err(archive_err)?;
    file.sync_all().map_err(archive_err)
}

pub(crate) fn extract_archive_blocking(archive: &Path, dest: &Path) -> Result<(), CoreError> {
    let tar_gz = stdfs::File::open(archive)
        .map_err(|e| CoreError::Archive(format!("open {} failed: {}", archive.display(), e)))?;
    let tar = GzDecoder::new(BufReader::new(tar_gz));
    let mut archive = tar::Archive::new(tar);
    archive
        .unpack(dest)
        .map_err(|e| CoreError::Archive(format!("extract failed: {e}")))
}

/// Recursive copy of regular files and directories, skipping `exclude`.
pub(crate) fn copy_dir_recursive_blocking(src: &Path, dst: &Path, exclude: &Path) -> Result<(), CoreError> {
    stdfs::create_dir_all(dst).map_err(|e| CoreError::io("creating snapshot directory", e))?;
    for entry in stdfs::read_dir(src).map_err(|e| CoreError::io("reading instance directory", e))? {
        let entry = entry.map_err(|e| CoreError::io("reading instance directory", e))?;
        let path = entry.path();
        if path.starts_with(exclude) {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| CoreError::io("reading instance directory", e))?;
        let dest = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive_blocking(&path, &dest, exclude)?;
        } else if file_type.is_file() {
            stdfs::copy(&path, &dest).map_err(|e| CoreError::io("copying snapshot file", e))?;
        } else {
            debug!("snapshot skips special file {}", path.display());
        }
    }
    Ok(())
}

/// Remove every top-level entry of `dir` except the one holding `keep`.
pub(crate) fn clear_dir_except_blocking(dir: &Path, keep: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut removed = Vec::new();
    for entry in stdfs::read_dir(dir).map_err(|e| CoreError::io("reading instance directory", e))? {
        let entry = entry.map_err(|e| CoreError::io("reading instance directory", e))?;
        let path = entry.path();
        if keep.starts_with(&path) {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| CoreError::io("reading instance directory", e))?;
        if file_type.is_dir() {
            stdfs::remove_dir_all(&path).map_err(|e| CoreError::io("clearing instance directory", e))?;
        } else {
            stdfs::remove_file(&path).map_err(|e| CoreError::io("clearing instance directory", e))?;
        }
        removed.push(path);
    }
    Ok(removed)
}
