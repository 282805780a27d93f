//! Multi-source artifact acquisition.
//!
//! Sources are tried strictly in order. Any failure at one source (transport
//! error, non-200 status, checksum mismatch, local write error) is recorded
//! and the next source is tried; only when every source has failed does the
//! fetch fail, carrying the per-source failures.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::checksum::verify_checksum;
use super::http::{BodyTimeout, HttpTransport, Transport};
use super::progress::{FetchEvent, FetchObserver, ProgressThrottle, PROGRESS_INTERVAL};
use crate::error::{InstallError, InstallResult};

/// Body is streamed to disk in chunks of this size (32KB).
const CHUNK_SIZE: usize = 32 * 1024;

/// Downloads named artifacts from an ordered list of base URLs.
#[derive(Debug)]
pub struct ArtifactFetcher<T: Transport = HttpTransport> {
    transport: T,
    base_urls: Vec<String>,
    offline_dir: Option<PathBuf>,
}

impl<T: Transport> ArtifactFetcher<T> {
    /// Create a fetcher over `base_urls`, tried in order.
    pub fn new(transport: T, base_urls: Vec<String>) -> Self {
        Self {
            transport,
            base_urls: base_urls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            offline_dir: None,
        }
    }

    /// Prefer pre-downloaded artifacts found in `dir`.
    pub fn with_offline_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.offline_dir = dir;
        self
    }

    /// The configured base URLs, in trial order.
    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    /// Fetch `filename` into `dest`, verifying it against `expected_checksum`
    /// unless that is empty.
    pub fn fetch(&self, dest: &Path, filename: &str, expected_checksum: &str) -> InstallResult<u64> {
        self.fetch_with_events(dest, filename, expected_checksum, &|_| {})
    }

    /// Like [`fetch`](Self::fetch), reporting progress to `observer`.
    ///
    /// Returns the size of the retained file in bytes.
    pub fn fetch_with_events(
        &self,
        dest: &Path,
        filename: &str,
        expected_checksum: &str,
        observer: FetchObserver<'_>,
    ) -> InstallResult<u64> {
        let partial = partial_path(dest);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if let Some(size) = self.try_offline_copy(&partial, dest, filename, expected_checksum, observer)? {
            return Ok(size);
        }

        let mut failures = Vec::new();
        for base in &self.base_urls {
            let url = format!("{}/{}", base, filename);
            observer(&FetchEvent::Attempt {
                source_url: url.clone(),
            });
            info!(url = %url, "Downloading {}", filename);

            let attempt = self
                .download(&url, &partial, observer)
                .and_then(|written| {
                    verify_checksum(&partial, filename, expected_checksum)?;
                    Ok(written)
                });

            match attempt {
                Ok(written) => {
                    if !expected_checksum.is_empty() {
                        observer(&FetchEvent::Verified);
                    }
                    commit(&partial, dest)?;
                    info!(url = %url, bytes = written, "Fetched {}", filename);
                    return Ok(written);
                }
                Err(e) => {
                    discard(&partial);
                    warn!(url = %url, error = %e, "Source failed, trying next");
                    observer(&FetchEvent::SourceFailed {
                        source_url: url.clone(),
                        reason: e.to_string(),
                    });
                    failures.push(InstallError::SourceFetchFailed {
                        source_url: url,
                        cause: Box::new(e),
                    });
                }
            }
        }

        Err(InstallError::AllSourcesExhausted {
            filename: filename.to_string(),
            failures,
        })
    }

    /// Use `{offline_dir}/{filename}` when present and valid.
    fn try_offline_copy(
        &self,
        partial: &Path,
        dest: &Path,
        filename: &str,
        expected_checksum: &str,
        observer: FetchObserver<'_>,
    ) -> InstallResult<Option<u64>> {
        let Some(dir) = &self.offline_dir else {
            return Ok(None);
        };
        let local = dir.join(filename);
        if !local.is_file() {
            return Ok(None);
        }

        info!(path = %local.display(), "Using local copy of {}", filename);
        observer(&FetchEvent::UsingLocalCopy {
            path: local.display().to_string(),
        });

        let copied = fs::copy(&local, partial).map_err(|e| InstallError::WriteFailed {
            path: partial.to_path_buf(),
            source: e,
        });
        let verified = copied.and_then(|size| {
            verify_checksum(partial, filename, expected_checksum)?;
            Ok(size)
        });

        match verified {
            Ok(size) => {
                if !expected_checksum.is_empty() {
                    observer(&FetchEvent::Verified);
                }
                commit(partial, dest)?;
                Ok(Some(size))
            }
            Err(e) => {
                discard(partial);
                warn!(path = %local.display(), error = %e, "Local copy unusable, downloading instead");
                Ok(None)
            }
        }
    }

    /// Stream one URL into `partial`.
    fn download(&self, url: &str, partial: &Path, observer: FetchObserver<'_>) -> InstallResult<u64> {
        let download = self.transport.get(url)?;
        let file = File::create(partial).map_err(|e| InstallError::WriteFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        let mut body = download.body;

        let total = download.content_length;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL, Instant::now());
        let mut written = 0u64;
        loop {
            let n = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(match BodyTimeout::from_io(&e) {
                        Some(timeout) => InstallError::Timeout {
                            url: url.to_string(),
                            timeout_secs: timeout.timeout_secs,
                        },
                        None => InstallError::Http {
                            url: url.to_string(),
                            reason: format!("read error: {}", e),
                        },
                    })
                }
            };
            writer
                .write_all(&buffer[..n])
                .map_err(|e| InstallError::WriteFailed {
                    path: partial.to_path_buf(),
                    source: e,
                })?;
            written += n as u64;
            // Without a declared length there is nothing to measure against;
            // the total is reported once the body ends.
            if let Some(total) = total {
                if throttle.should_emit(Instant::now()) {
                    observer(&FetchEvent::Progress { written, total });
                }
            }
        }

        writer.flush().map_err(|e| InstallError::WriteFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

        observer(&FetchEvent::Transferred { written, total });
        debug!(url = %url, bytes = written, "Transfer complete");
        Ok(written)
    }
}

/// Download target before verification: `<dest>.part`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn commit(partial: &Path, dest: &Path) -> InstallResult<()> {
    fs::rename(partial, dest).map_err(|e| InstallError::WriteFailed {
        path: dest.to_path_buf(),
        source: e,
    })
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
        }
    }
}
