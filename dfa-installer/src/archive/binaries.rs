//! Placement and permissions of the top-level binaries.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{InstallError, InstallResult};

/// Mode applied to every top-level binary.
pub const BINARY_MODE: u32 = 0o755;

/// Move every file directly inside `src` into `dst`.
///
/// Subdirectories and hidden entries are left behind. Returns the number of
/// entries moved.
pub fn move_binaries(src: &Path, dst: &Path) -> InstallResult<usize> {
    fs::create_dir_all(dst).map_err(|e| InstallError::CreateDirFailed {
        path: dst.to_path_buf(),
        source: e,
    })?;
    let entries = fs::read_dir(src).map_err(|e| InstallError::ReadFailed {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut moved = 0;
    for entry in entries {
        let entry = entry.map_err(|e| InstallError::ReadFailed {
            path: src.to_path_buf(),
            source: e,
        })?;
        let file_type = entry.file_type().map_err(|e| InstallError::ReadFailed {
            path: entry.path(),
            source: e,
        })?;
        if file_type.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let target = dst.join(entry.file_name());
        relocate(&entry.path(), &target).map_err(|e| InstallError::WriteFailed {
            path: target.clone(),
            source: e,
        })?;
        debug!(file = %target.display(), "Installed binary");
        moved += 1;
    }

    info!(from = %src.display(), to = %dst.display(), count = moved, "Moved binaries");
    Ok(moved)
}

/// Rename, falling back to copy + delete across filesystems.
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) if !fs::symlink_metadata(from)?.file_type().is_symlink() => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Set [`BINARY_MODE`] on every file directly inside `bin_dir`.
///
/// Not recursive. Directories and symlinks are skipped, so a link never
/// changes the mode of whatever it points at. Returns the number of files
/// updated.
pub fn normalize_permissions(bin_dir: &Path) -> InstallResult<usize> {
    let entries = fs::read_dir(bin_dir).map_err(|e| InstallError::ReadFailed {
        path: bin_dir.to_path_buf(),
        source: e,
    })?;

    let mut updated = 0;
    for entry in entries {
        let entry = entry.map_err(|e| InstallError::ReadFailed {
            path: bin_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| InstallError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }
        set_mode(&path, BINARY_MODE).map_err(|e| InstallError::WriteFailed {
            path: path.clone(),
            source: e,
        })?;
        updated += 1;
    }

    debug!(dir = %bin_dir.display(), count = updated, "Normalized binary permissions");
    Ok(updated)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
