//! Release manifest resolution.
//!
//! The manifest is a line-oriented `KEY=VALUE` file:
//!
//! ```text
//! # docker-for-android release
//! VERSION=1.2.3
//! DOCKER_SHA256=<runtime package digest>
//! BIN_ARM64_SHA256=<arm64 binary package digest>
//! BIN_X86_64_SHA256=<x86_64 binary package digest>
//! ```
//!
//! It is the trust root for every later checksum, so it is fetched without
//! one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::MANIFEST_FILENAME;
use crate::error::{InstallError, InstallResult};
use crate::fetch::{ArtifactFetcher, FetchObserver, Transport};
use crate::probe::Architecture;

/// Parsed release metadata for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub version: String,
    pub runtime_package_checksum: String,
    pub binary_package_checksum: String,
    pub architecture: Architecture,
}

impl ReleaseManifest {
    /// Parse manifest text, selecting the binary checksum for `arch`.
    ///
    /// Blank lines, `#` comments, lines without `=` and unknown keys are
    /// ignored. A later duplicate key overrides an earlier one.
    pub fn parse(text: &str, arch: Architecture) -> InstallResult<Self> {
        let binary_key = binary_checksum_key(arch);
        let mut version = String::new();
        let mut runtime = String::new();
        let mut binary = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "VERSION" => version = value.to_string(),
                "DOCKER_SHA256" => runtime = value.to_string(),
                k if k == binary_key => binary = value.to_string(),
                other => debug!(key = other, "Ignoring manifest key"),
            }
        }

        require("VERSION", &version)?;
        require("DOCKER_SHA256", &runtime)?;
        require(&binary_key, &binary)?;

        Ok(Self {
            version,
            runtime_package_checksum: runtime,
            binary_package_checksum: binary,
            architecture: arch,
        })
    }

    /// File name of the runtime package: `docker-{version}.tar.gz`.
    pub fn runtime_package_name(&self) -> String {
        format!("docker-{}.tar.gz", self.version)
    }

    /// File name of the binary package:
    /// `docker-for-android-bin-{version}-{arch}.tar.gz`.
    pub fn binary_package_name(&self) -> String {
        format!(
            "docker-for-android-bin-{}-{}.tar.gz",
            self.version, self.architecture
        )
    }
}

/// Manifest key holding the binary package checksum, e.g. `BIN_ARM64_SHA256`.
pub fn binary_checksum_key(arch: Architecture) -> String {
    format!("BIN_{}_SHA256", arch.as_str().to_uppercase())
}

fn require(field: &str, value: &str) -> InstallResult<()> {
    if value.is_empty() {
        return Err(InstallError::MissingManifestField {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Fetches and parses the release manifest.
pub struct ManifestResolver<'a, T: Transport> {
    fetcher: &'a ArtifactFetcher<T>,
    work_dir: PathBuf,
}

impl<'a, T: Transport> ManifestResolver<'a, T> {
    /// The manifest is downloaded into `work_dir`.
    pub fn new(fetcher: &'a ArtifactFetcher<T>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            work_dir: work_dir.into(),
        }
    }

    /// Fetch the manifest and resolve it for `arch`.
    pub fn resolve(&self, arch: Architecture) -> InstallResult<ReleaseManifest> {
        self.resolve_with_events(arch, &|_| {})
    }

    /// Like [`resolve`](Self::resolve), forwarding fetch events.
    pub fn resolve_with_events(
        &self,
        arch: Architecture,
        observer: FetchObserver<'_>,
    ) -> InstallResult<ReleaseManifest> {
        let path = self.work_dir.join(MANIFEST_FILENAME);
        self.fetcher
            .fetch_with_events(&path, MANIFEST_FILENAME, "", observer)?;
        let manifest = read_manifest(&path, arch)?;
        info!(
            version = %manifest.version,
            arch = %manifest.architecture,
            "Resolved release manifest"
        );
        Ok(manifest)
    }
}

fn read_manifest(path: &Path, arch: Architecture) -> InstallResult<ReleaseManifest> {
    let text = fs::read_to_string(path).map_err(|e| InstallError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    ReleaseManifest::parse(&text, arch)
}
