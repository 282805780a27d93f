//! Installation root discovery.
//!
//! Candidate mount points are scanned in priority order and the one with the
//! most free space wins; an attached high-capacity volume listed late still
//! beats a small local partition listed early. Probing only ever issues
//! read-only `statvfs` calls, so it can be repeated freely.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{InstallError, InstallResult};

/// A probed volume that exists and reported its free space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCandidate {
    pub path: PathBuf,
    pub free_space_kb: u64,
}

/// Source of free-space figures for a path.
pub trait SpaceQuery {
    /// Free space available to unprivileged writers, in KB.
    fn free_space_kb(&self, path: &Path) -> io::Result<u64>;
}

/// `statvfs(3)` backed space query.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsSpace;

impl SpaceQuery for StatvfsSpace {
    #[cfg(unix)]
    fn free_space_kb(&self, path: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let available = stat.f_bavail as u64 * stat.f_frsize as u64;
        Ok(available / 1024)
    }

    #[cfg(not(unix))]
    fn free_space_kb(&self, _path: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free space query is only implemented for unix",
        ))
    }
}

/// Selects the installation root for a run.
#[derive(Debug, Clone)]
pub struct StorageProbe<Q: SpaceQuery = StatvfsSpace> {
    candidates: Vec<String>,
    min_free_kb: u64,
    space: Q,
}

impl StorageProbe<StatvfsSpace> {
    /// Create a probe over the configured candidates.
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_space_query(config, StatvfsSpace)
    }
}

impl<Q: SpaceQuery> StorageProbe<Q> {
    /// Create a probe with a custom space query.
    pub fn with_space_query(config: &StorageConfig, space: Q) -> Self {
        Self {
            candidates: config.candidates.clone(),
            min_free_kb: config.min_free_kb,
            space,
        }
    }

    /// Pick the candidate with the most free space, falling back to the
    /// current working directory.
    pub fn select_installation_root(&self) -> InstallResult<PathBuf> {
        let probed = self.probe_candidates();
        if let Some(best) = select_best(&probed, self.min_free_kb) {
            info!(
                path = %best.path.display(),
                free_kb = best.free_space_kb,
                "Selected installation root"
            );
            return Ok(best.path.clone());
        }

        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(free) = self.space.free_space_kb(&cwd) {
                if free >= self.min_free_kb {
                    info!(
                        path = %cwd.display(),
                        free_kb = free,
                        "No candidate volume qualified, using working directory"
                    );
                    return Ok(cwd);
                }
            }
        }

        Err(InstallError::NoStorageFound {
            min_free_kb: self.min_free_kb,
        })
    }

    /// Stat every existing candidate in priority order.
    pub fn probe_candidates(&self) -> Vec<StorageCandidate> {
        let mut probed = Vec::new();
        for path in expand_candidates(&self.candidates) {
            if !path.is_dir() {
                continue;
            }
            match self.space.free_space_kb(&path) {
                Ok(free_space_kb) => {
                    debug!(path = %path.display(), free_kb = free_space_kb, "Probed candidate");
                    probed.push(StorageCandidate {
                        path,
                        free_space_kb,
                    });
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Cannot stat candidate"),
            }
        }
        probed
    }
}

/// The qualifying candidate with strictly maximal free space; the first one
/// seen wins a tie.
pub fn select_best(candidates: &[StorageCandidate], min_free_kb: u64) -> Option<&StorageCandidate> {
    let mut best: Option<&StorageCandidate> = None;
    for candidate in candidates
        .iter()
        .filter(|c| c.free_space_kb >= min_free_kb)
    {
        match best {
            Some(current) if current.free_space_kb >= candidate.free_space_kb => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Expand `dir/*` patterns into their subdirectories, preserving list order.
fn expand_candidates(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') {
            match glob::glob(pattern) {
                Ok(matches) => {
                    let mut found: Vec<PathBuf> = matches.filter_map(Result::ok).collect();
                    found.sort();
                    paths.extend(found);
                }
                Err(e) => debug!(pattern = %pattern, error = %e, "Invalid candidate pattern"),
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use proptest::prelude::*;
    use tempfile::TempDir;

    const GIB_KB: u64 = 1024 * 1024;

    struct FakeSpace(HashMap<PathBuf, u64>);

    impl SpaceQuery for FakeSpace {
        fn free_space_kb(&self, path: &Path) -> io::Result<u64> {
            self.0
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown"))
        }
    }

    fn candidate(path: &str, free: u64) -> StorageCandidate {
        StorageCandidate {
            path: PathBuf::from(path),
            free_space_kb: free,
        }
    }

    #[test]
    fn test_largest_free_space_wins_over_priority() {
        let candidates = vec![
            candidate("/data/local", 2 * GIB_KB),
            candidate("/mnt/media_rw/usb", 500 * GIB_KB),
        ];
        let best = select_best(&candidates, GIB_KB).unwrap();
        assert_eq!(best.path, PathBuf::from("/mnt/media_rw/usb"));
    }

    #[test]
    fn test_below_threshold_rejected() {
        let candidates = vec![candidate("/data", GIB_KB - 1)];
        assert!(select_best(&candidates, GIB_KB).is_none());
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let candidates = vec![candidate("/first", 5 * GIB_KB), candidate("/second", 5 * GIB_KB)];
        assert_eq!(select_best(&candidates, GIB_KB).unwrap().path, PathBuf::from("/first"));
    }

    #[test]
    fn test_probe_expands_wildcards_and_skips_missing() {
        let temp = TempDir::new().unwrap();
        let media = temp.path().join("media_rw");
        fs::create_dir_all(media.join("disk-a")).unwrap();
        fs::create_dir_all(media.join("disk-b")).unwrap();
        let local = temp.path().join("local");
        fs::create_dir_all(&local).unwrap();

        let mut space = HashMap::new();
        space.insert(media.join("disk-a"), 3 * GIB_KB);
        space.insert(media.join("disk-b"), 8 * GIB_KB);
        space.insert(local.clone(), 4 * GIB_KB);

        let config = StorageConfig {
            candidates: vec![
                format!("{}/*", media.display()),
                local.display().to_string(),
                temp.path().join("missing").display().to_string(),
            ],
            min_free_kb: GIB_KB,
        };
        let probe = StorageProbe::with_space_query(&config, FakeSpace(space));

        let probed = probe.probe_candidates();
        assert_eq!(probed.len(), 3);
        assert_eq!(probed[0].path, media.join("disk-a"));

        assert_eq!(probe.select_installation_root().unwrap(), media.join("disk-b"));
        // Probing is side-effect free and repeatable.
        assert_eq!(probe.select_installation_root().unwrap(), media.join("disk-b"));
    }

    #[test]
    fn test_nothing_qualifies() {
        let temp = TempDir::new().unwrap();
        let mut space = HashMap::new();
        space.insert(temp.path().to_path_buf(), 10);

        let config = StorageConfig {
            candidates: vec![temp.path().display().to_string()],
            min_free_kb: GIB_KB,
        };
        let probe = StorageProbe::with_space_query(&config, FakeSpace(space));

        match probe.select_installation_root() {
            Err(InstallError::NoStorageFound { min_free_kb }) => assert_eq!(min_free_kb, GIB_KB),
            other => panic!("expected NoStorageFound, got {:?}", other),
        }
    }

    #[test]
    fn test_working_directory_used_when_no_candidate_qualifies() {
        let temp = TempDir::new().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let mut space = HashMap::new();
        space.insert(temp.path().to_path_buf(), GIB_KB - 1);
        space.insert(cwd.clone(), GIB_KB);

        let config = StorageConfig {
            candidates: vec![temp.path().display().to_string()],
            min_free_kb: GIB_KB,
        };
        let storage = StorageProbe::with_space_query(&config, FakeSpace(space));

        assert_eq!(storage.select_installation_root().unwrap(), cwd);
    }

    #[cfg(unix)]
    #[test]
    fn test_statvfs_reports_space_for_existing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(StatvfsSpace.free_space_kb(temp.path()).is_ok());
        assert!(StatvfsSpace
            .free_space_kb(&temp.path().join("does-not-exist"))
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_selects_strict_maximum_first_seen(frees in proptest::collection::vec(0u64..10_000, 1..12),
                                                  threshold in 0u64..10_000) {
            let candidates: Vec<StorageCandidate> = frees
                .iter()
                .enumerate()
                .map(|(i, free)| StorageCandidate { path: PathBuf::from(format!("/c{}", i)), free_space_kb: *free })
                .collect();

            let qualifying: Vec<&StorageCandidate> =
                candidates.iter().filter(|c| c.free_space_kb >= threshold).collect();

            match select_best(&candidates, threshold) {
                None => prop_assert!(qualifying.is_empty()),
                Some(best) => {
                    let max = qualifying.iter().map(|c| c.free_space_kb).max().unwrap();
                    prop_assert_eq!(best.free_space_kb, max);
                    let first = qualifying.iter().find(|c| c.free_space_kb == max).unwrap();
                    prop_assert_eq!(&best.path, &first.path);
                }
            }
        }
    }
}
