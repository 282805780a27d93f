//! Streaming tar.gz extraction with member prefix stripping.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

use crate::error::{InstallError, InstallResult};

/// Counts of what an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    /// Members ignored: unsupported kinds and symlinks that could not be created.
    pub skipped: usize,
}

/// Extract `archive_path` under `dest_root`.
///
/// When `strip_prefix` is non-empty, members starting with it have it removed
/// first; a member that becomes empty (the prefix directory itself) is
/// skipped. The archive is read sequentially and never held in memory.
///
/// Symlinks already on disk are replaced rather than written through, and a
/// member whose parent resolves outside `dest_root` fails the extraction.
pub fn extract(archive_path: &Path, dest_root: &Path, strip_prefix: &str) -> InstallResult<ExtractSummary> {
    let file = File::open(archive_path).map_err(|e| InstallError::ReadFailed {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    fs::create_dir_all(dest_root).map_err(|e| InstallError::CreateDirFailed {
        path: dest_root.to_path_buf(),
        source: e,
    })?;
    let root = fs::canonicalize(dest_root).map_err(|e| InstallError::ReadFailed {
        path: dest_root.to_path_buf(),
        source: e,
    })?;

    let archive_name = archive_path.display().to_string();
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive.entries().map_err(|e| InstallError::ExtractionFailed {
        member: archive_name.clone(),
        cause: e,
    })?;

    let mut summary = ExtractSummary::default();
    for entry in entries {
        let mut entry = entry.map_err(|e| InstallError::ExtractionFailed {
            member: archive_name.clone(),
            cause: e,
        })?;

        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let name = strip_member_prefix(&raw_name, strip_prefix);
        let relative = match sanitize_member_path(name) {
            Ok(Some(relative)) => relative,
            Ok(None) => continue,
            Err(cause) => {
                return Err(InstallError::ExtractionFailed {
                    member: raw_name,
                    cause,
                })
            }
        };
        let target = root.join(&relative);
        let failed = |cause: io::Error| InstallError::ExtractionFailed {
            member: raw_name.clone(),
            cause,
        };
        check_parents(&root, &relative).map_err(&failed)?;

        let kind = entry.header().entry_type();
        let mode = entry.header().mode().map_err(&failed)?;
        match kind {
            EntryType::Directory => {
                remove_symlink(&target).map_err(&failed)?;
                create_dir_with_mode(&target, mode).map_err(&failed)?;
                summary.directories += 1;
            }
            kind if kind.is_file() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(&failed)?;
                }
                remove_symlink(&target).map_err(&failed)?;
                let mut out = open_with_mode(&target, mode).map_err(&failed)?;
                io::copy(&mut entry, &mut out).map_err(&failed)?;
                // The open mode only applies to newly created files.
                set_mode(&target, mode).map_err(&failed)?;
                summary.files += 1;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(&failed)?
                    .map(Cow::into_owned)
                    .unwrap_or_default();
                match create_symlink(&link, &target) {
                    Ok(()) => summary.symlinks += 1,
                    Err(e) => {
                        warn!(
                            member = %raw_name,
                            link = %link.display(),
                            error = %e,
                            "Cannot create symlink, skipping"
                        );
                        summary.skipped += 1;
                    }
                }
            }
            other => {
                debug!(member = %raw_name, kind = ?other, "Skipping unsupported member");
                summary.skipped += 1;
            }
        }
    }

    info!(
        archive = %archive_name,
        dest = %dest_root.display(),
        files = summary.files,
        dirs = summary.directories,
        symlinks = summary.symlinks,
        skipped = summary.skipped,
        "Extracted archive"
    );
    Ok(summary)
}

/// Remove `prefix` from `name` if present.
///
/// The prefix directory's own entry, with or without its trailing slash,
/// strips to the empty name.
pub fn strip_member_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return name;
    }
    if let Some(rest) = name.strip_prefix(prefix) {
        return rest;
    }
    if prefix.ends_with('/') && name == prefix.trim_end_matches('/') {
        return "";
    }
    name
}

/// Reduce a member name to a relative path with normal components only.
///
/// Returns `None` for names that name the destination root itself, and an
/// error for names that climb out of it.
fn sanitize_member_path(name: &str) -> io::Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "member path escapes the destination",
                ))
            }
        }
    }
    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(relative))
    }
}

/// Reject members whose parent directories resolve outside `root` through a
/// symlink already on disk.
fn check_parents(root: &Path, relative: &Path) -> io::Result<()> {
    let Some(parents) = relative.parent() else {
        return Ok(());
    };
    let mut current = root.to_path_buf();
    for part in parents.components() {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if !fs::canonicalize(&current)?.starts_with(root) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "member path escapes the destination through a symlink",
                    ));
                }
            }
            Ok(_) => {}
            // Nothing further down exists yet, so nothing can be a link.
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a symlink sitting where a member is about to be written, so the
/// write lands at the path itself instead of the link's target.
fn remove_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn create_symlink(link: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // Re-running the installer finds the previous link in place.
    remove_symlink(target)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn create_symlink(_link: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    enum Member<'a> {
        File(&'a str, &'a [u8], u32),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
    }

    fn build_archive(path: &Path, members: &[Member<'_>]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = Builder::new(encoder);
        for member in members {
            let mut header = Header::new_gnu();
            match member {
                Member::File(name, data, mode) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_size(data.len() as u64);
                    header.set_mode(*mode);
                    builder.append_data(&mut header, name, *data).unwrap();
                }
                Member::Dir(name) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
                Member::Symlink(name, link) => {
                    header.set_entry_type(EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_link_name(link).unwrap();
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
    }

    #[test]
    fn test_round_trip_with_nested_directories() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[Member::File("a.txt", b"X", 0o644), Member::File("dir/b.txt", b"Y", 0o644)],
        );
        let dest = temp.path().join("out");

        let summary = extract(&archive, &dest, "").unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "X");
        assert_eq!(fs::read_to_string(dest.join("dir/b.txt")).unwrap(), "Y");
        assert_eq!(summary.files, 2);
    }

    #[test]
    fn test_prefix_stripping_skips_bare_prefix_dir() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bin.tar.gz");
        build_archive(
            &archive,
            &[
                Member::Dir("bundle/arm64_bin/"),
                Member::File("bundle/arm64_bin/docker", b"ELF", 0o755),
                Member::File("README", b"readme", 0o644),
            ],
        );
        let dest = temp.path().join("out");

        let summary = extract(&archive, &dest, "bundle/arm64_bin/").unwrap();

        assert_eq!(fs::read(dest.join("docker")).unwrap(), b"ELF");
        assert!(!dest.join("bundle").exists());
        // Members outside the prefix keep their names.
        assert!(dest.join("README").exists());
        assert_eq!(summary.directories, 0);
        assert_eq!(summary.files, 2);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(&archive, &[Member::Dir("d/"), Member::File("d/f", b"1", 0o644)]);
        let dest = temp.path().join("out");

        extract(&archive, &dest, "").unwrap();
        fs::write(dest.join("d/f"), b"modified and longer").unwrap();
        extract(&archive, &dest, "").unwrap();

        assert_eq!(fs::read(dest.join("d/f")).unwrap(), b"1");
    }

    #[cfg(unix)]
    #[test]
    fn test_declared_modes_applied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::File("run.sh", b"#!/bin/sh\n", 0o750),
                Member::File("data.txt", b"d", 0o600),
            ],
        );
        let dest = temp.path().join("out");
        extract(&archive, &dest, "").unwrap();

        let mode = |p: &str| fs::metadata(dest.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("run.sh"), 0o750);
        assert_eq!(mode("data.txt"), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_created() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::File("bin/dockerd", b"d", 0o755),
                Member::Symlink("bin/docker-init", "dockerd"),
            ],
        );
        let dest = temp.path().join("out");

        let summary = extract(&archive, &dest, "").unwrap();
        assert_eq!(summary.symlinks, 1);
        assert_eq!(
            fs::read_link(dest.join("bin/docker-init")).unwrap(),
            PathBuf::from("dockerd")
        );

        // A second run replaces the existing link instead of failing.
        let summary = extract(&archive, &dest, "").unwrap();
        assert_eq!(summary.symlinks, 1);
    }

    #[test]
    fn test_symlink_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::File("blocker", b"i am a file", 0o644),
                Member::Symlink("blocker/link", "elsewhere"),
                Member::File("after.txt", b"still extracted", 0o644),
            ],
        );
        let dest = temp.path().join("out");

        let summary = extract(&archive, &dest, "").unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(dest.join("after.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_replaces_symlink_instead_of_following_it() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside.txt");
        fs::write(&outside, "original").unwrap();
        let outside_str = outside.to_str().unwrap();

        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::Symlink("link", outside_str),
                Member::File("link", b"PWNED", 0o644),
            ],
        );
        let dest = temp.path().join("out");
        extract(&archive, &dest, "").unwrap();

        assert_eq!(fs::read_to_string(&outside).unwrap(), "original");
        let meta = fs::symlink_metadata(dest.join("link")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read(dest.join("link")).unwrap(), b"PWNED");
    }

    #[cfg(unix)]
    #[test]
    fn test_member_under_escaping_symlink_rejected() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("elsewhere");
        fs::create_dir(&outside).unwrap();
        let outside_str = outside.to_str().unwrap();

        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::Symlink("escape", outside_str),
                Member::File("escape/owned.txt", b"x", 0o644),
            ],
        );
        let dest = temp.path().join("out");
        match extract(&archive, &dest, "") {
            Err(InstallError::ExtractionFailed { member, .. }) => {
                assert_eq!(member, "escape/owned.txt")
            }
            other => panic!("expected extraction failure, got {:?}", other),
        }
        assert!(!outside.join("owned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_member_under_internal_symlink_allowed() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(
            &archive,
            &[
                Member::Dir("lib"),
                Member::Symlink("lib64", "lib"),
                Member::File("lib64/libc.so", b"elf", 0o644),
            ],
        );
        let dest = temp.path().join("out");
        extract(&archive, &dest, "").unwrap();

        assert_eq!(fs::read(dest.join("lib/libc.so")).unwrap(), b"elf");
    }

    #[cfg(unix)]
    #[test]
    fn test_reinstall_restores_declared_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_archive(&archive, &[Member::File("bin/dockerd", b"d", 0o755)]);
        let dest = temp.path().join("out");
        extract(&archive, &dest, "").unwrap();

        let binary = dest.join("bin/dockerd");
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o600)).unwrap();
        extract(&archive, &dest, "").unwrap();

        let mode = fs::metadata(&binary).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_parent_dir_member_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.tar.gz");
        {
            let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
            let mut builder = Builder::new(encoder);
            let mut header = Header::new_gnu();
            let name = b"../evil.txt";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_entry_type(EntryType::Regular);
            header.set_size(1);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &b"x"[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let dest = temp.path().join("out");

        match extract(&archive, &dest, "") {
            Err(InstallError::ExtractionFailed { member, .. }) => assert_eq!(member, "../evil.txt"),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_invalid_gzip_fails() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bad.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(matches!(
            extract(&archive, &temp.path().join("out"), ""),
            Err(InstallError::ExtractionFailed { .. })
        ));
    }

    #[test]
    fn test_missing_archive_fails() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            extract(&temp.path().join("missing.tar.gz"), temp.path(), ""),
            Err(InstallError::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_strip_member_prefix() {
        assert_eq!(strip_member_prefix("arm64_bin/docker", "arm64_bin/"), "docker");
        assert_eq!(strip_member_prefix("other/docker", "arm64_bin/"), "other/docker");
        assert_eq!(strip_member_prefix("arm64_bin/", "arm64_bin/"), "");
        assert_eq!(strip_member_prefix("arm64_bin", "arm64_bin/"), "");
        assert_eq!(strip_member_prefix("docker", ""), "docker");
    }

    #[test]
    fn test_sanitize_member_path() {
        assert_eq!(sanitize_member_path("./").unwrap(), None);
        assert_eq!(sanitize_member_path("").unwrap(), None);
        assert_eq!(
            sanitize_member_path("/abs/./x").unwrap(),
            Some(PathBuf::from("abs/x"))
        );
        assert!(sanitize_member_path("a/../../b").is_err());
    }
}
