use crate::error::{Error, Result};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write `content` to `path`, creating parent directories as needed.
/// Returns the number of bytes written.
pub fn write_file(path: &Path, content: &str) -> Result<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| Error::fs(path, e))?;
    Ok(content.len() as u64)
}

/// Create a directory and any missing parents.
pub fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::fs(path, e))
}

/// Check if two paths are on the same filesystem.
#[cfg(unix)]
fn same_filesystem(src: &Path, dst: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let src_meta = std::fs::metadata(src).map_err(|e| Error::fs(src, e))?;
    let dst_parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let dst_parent_meta = std::fs::metadata(dst_parent).map_err(|e| Error::fs(dst_parent, e))?;
    Ok(src_meta.dev() == dst_parent_meta.dev())
}

#[cfg(not(unix))]
fn same_filesystem(_src: &Path, _dst: &Path) -> Result<bool> {
    // volume_serial_number is unstable on Windows; fall back to copy+delete,
    // which is safe but slower.
    Ok(false)
}

/// Move a file or directory, preferring an atomic rename within the same
/// filesystem and falling back to copy+delete across devices.
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }
    if same_filesystem(src, dst)? {
        std::fs::rename(src, dst).map_err(|e| Error::fs(src, e))?;
        return Ok(());
    }
    let metadata = std::fs::metadata(src).map_err(|e| Error::fs(src, e))?;
    copy_path(src, dst)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(src).map_err(|e| Error::fs(src, e))?;
    } else {
        std::fs::remove_file(src).map_err(|e| Error::fs(src, e))?;
    }
    Ok(())
}

/// Copy a file or a directory tree. Returns bytes copied.
pub fn copy_path(src: &Path, dst: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(src).map_err(|e| Error::fs(src, e))?;
    if metadata.is_dir() {
        copy_tree(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        let bytes = std::fs::copy(src, dst).map_err(|e| Error::fs(src, e))?;
        copy_mtime(src, dst)?;
        Ok(bytes)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    std::fs::create_dir_all(dst).map_err(|e| Error::fs(dst, e))?;
    let mut bytes = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::fs(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::fs(&target, e))?;
        } else {
            bytes += std::fs::copy(entry.path(), &target).map_err(|e| Error::fs(entry.path(), e))?;
            copy_mtime(entry.path(), &target)?;
        }
    }
    Ok(bytes)
}

/// Save a copy of `src` under `backup_dir`, named after the recording
/// operation so concurrent backups of same-named files cannot collide.
pub fn backup_to(src: &Path, backup_dir: &Path, op_id: Uuid) -> Result<PathBuf> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let dest = backup_dir.join(format!("{op_id}-{name}"));
    copy_path(src, &dest)?;
    Ok(dest)
}

/// Restore a backup over `target`, replacing whatever is there.
// TODO: preserve unix permission bits across backup/restore, not just mtime.
pub fn restore(backup: &Path, target: &Path) -> Result<()> {
    let metadata = std::fs::metadata(backup).map_err(|e| Error::fs(backup, e))?;
    if metadata.is_dir() {
        if target.exists() {
            std::fs::remove_dir_all(target).map_err(|e| Error::fs(target, e))?;
        }
        copy_tree(backup, target)?;
    } else {
        copy_path(backup, target)?;
    }
    Ok(())
}

/// Remove a directory only if it is empty. Returns false when it was kept.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path).map_err(|e| Error::fs(path, e))?;
    if entries.next().is_some() {
        return Ok(false);
    }
    std::fs::remove_dir(path).map_err(|e| Error::fs(path, e))?;
    Ok(true)
}

fn copy_mtime(src: &Path, dst: &Path) -> Result<()> {
    let metadata = std::fs::metadata(src).map_err(|e| Error::fs(src, e))?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(dst, mtime).map_err(|e| Error::fs(dst, e))
}
