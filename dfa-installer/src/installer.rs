//! End-to-end installation.
//!
//! This module sequences the full install:
//! 1. Pick the storage volume with the most free space
//! 2. Resolve the release manifest for this device's architecture
//! 3. Download the runtime and binary packages (with source fallback)
//! 4. Stop any running service
//! 5. Extract both packages and put the binaries in place
//! 6. Hand off to the deployment script
//! 7. Clean up the run directory
//!
//! Any failing step aborts the run. Files already written are left in place;
//! running the installer again is the recovery path.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::{extract, move_binaries, normalize_permissions, ExtractSummary};
use crate::config::{InstallerConfig, LayoutConfig, MANIFEST_FILENAME};
use crate::deploy::{run_deploy_script, OutputStream};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{ArtifactFetcher, FetchEvent, HttpTransport, Transport};
use crate::manifest::{ManifestResolver, ReleaseManifest};
use crate::probe::{
    detect_architecture, Architecture, ArchitectureQuery, SpaceQuery, StatvfsSpace, StorageProbe,
    UnameQuery,
};
use crate::service::{QuiesceOutcome, ServiceControl, ServiceQuiescer, SystemServiceControl};

/// Installation stages for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Choosing the storage volume.
    ProbingStorage,
    /// Fetching and parsing the release manifest.
    ResolvingManifest,
    /// Downloading the packages.
    Downloading,
    /// Stopping the running service.
    Quiescing,
    /// Unpacking archives and placing binaries.
    Extracting,
    /// Running the deployment script.
    Deploying,
    /// Removing temporary files.
    Cleanup,
    /// Installation complete.
    Complete,
}

impl InstallStage {
    /// Get a human-readable name for the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProbingStorage => "Probing storage",
            Self::ResolvingManifest => "Resolving manifest",
            Self::Downloading => "Downloading",
            Self::Quiescing => "Stopping service",
            Self::Extracting => "Extracting",
            Self::Deploying => "Deploying",
            Self::Cleanup => "Cleaning up",
            Self::Complete => "Complete",
        }
    }
}

/// Receives progress from an install run.
pub trait InstallObserver {
    /// A stage has started.
    fn on_stage(&self, _stage: InstallStage, _message: &str) {}

    /// A fetch event for `filename`.
    fn on_fetch(&self, _filename: &str, _event: &FetchEvent) {}

    /// A non-fatal problem was tolerated.
    fn on_warning(&self, _message: &str) {}

    /// One line printed by the deployment script.
    fn on_script_line(&self, _stream: OutputStream, _line: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl InstallObserver for NoopObserver {}

/// Summary of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Storage volume the run used.
    pub storage_root: PathBuf,
    /// Installed release version.
    pub version: String,
    /// Device architecture.
    pub architecture: Architecture,
    /// Bytes fetched for the manifest and both packages.
    pub bytes_downloaded: u64,
    /// Regular files written by both extractions.
    pub files_extracted: usize,
}

/// Runs the install sequence.
pub struct Installer<
    T: Transport = HttpTransport,
    S: SpaceQuery = StatvfsSpace,
    C: ServiceControl = SystemServiceControl,
> {
    layout: LayoutConfig,
    storage: StorageProbe<S>,
    arch_query: Box<dyn ArchitectureQuery>,
    fetcher: ArtifactFetcher<T>,
    quiescer: ServiceQuiescer<C>,
}

impl<T: Transport> Installer<T> {
    /// Create an installer for the real device using `transport` for downloads.
    pub fn new(config: &InstallerConfig, transport: T) -> Self {
        let fetcher = ArtifactFetcher::new(transport, config.sources.base_urls.clone())
            .with_offline_dir(config.layout.offline_dir.clone());
        Self {
            layout: config.layout.clone(),
            storage: StorageProbe::new(&config.storage),
            arch_query: Box::new(UnameQuery),
            fetcher,
            quiescer: ServiceQuiescer::from_config(config),
        }
    }
}

impl<T: Transport, S: SpaceQuery, C: ServiceControl> Installer<T, S, C> {
    /// Assemble an installer from individually built components.
    pub fn from_parts(
        layout: LayoutConfig,
        storage: StorageProbe<S>,
        arch_query: Box<dyn ArchitectureQuery>,
        fetcher: ArtifactFetcher<T>,
        quiescer: ServiceQuiescer<C>,
    ) -> Self {
        Self {
            layout,
            storage,
            arch_query,
            fetcher,
            quiescer,
        }
    }

    /// Run the full install.
    pub fn install(&self, observer: &dyn InstallObserver) -> InstallResult<InstallReport> {
        // Stage 1: storage
        observer.on_stage(InstallStage::ProbingStorage, "Selecting storage volume...");
        let storage_root = self.storage.select_installation_root()?;
        let run_dir = storage_root.join("Cache").join("installer");
        create_dir(&run_dir)?;

        // Stage 2: manifest
        let arch = detect_architecture(self.arch_query.as_ref())?;
        observer.on_stage(
            InstallStage::ResolvingManifest,
            &format!("Fetching release manifest for {}...", arch),
        );
        let manifest = ManifestResolver::new(&self.fetcher, &run_dir)
            .resolve_with_events(arch, &|e| observer.on_fetch(MANIFEST_FILENAME, e))?;
        let mut bytes_downloaded = file_size(&run_dir.join(MANIFEST_FILENAME));

        // Stage 3: packages
        observer.on_stage(
            InstallStage::Downloading,
            &format!("Downloading release {}...", manifest.version),
        );
        let runtime_package = run_dir.join(manifest.runtime_package_name());
        let binary_package = run_dir.join(manifest.binary_package_name());
        bytes_downloaded += self.fetch_package(
            &runtime_package,
            &manifest.runtime_package_name(),
            &manifest.runtime_package_checksum,
            observer,
        )?;
        bytes_downloaded += self.fetch_package(
            &binary_package,
            &manifest.binary_package_name(),
            &manifest.binary_package_checksum,
            observer,
        )?;

        // Stage 4: service
        observer.on_stage(InstallStage::Quiescing, "Stopping running service...");
        match self.quiescer.quiesce() {
            Ok(QuiesceOutcome::Stopped { failed, .. }) if failed > 0 => observer.on_warning(
                &format!("{} service process(es) could not be killed", failed),
            ),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Service quiescence failed, continuing");
                observer.on_warning(&format!("could not stop service: {}", e));
            }
        }

        // Stage 5: archives
        observer.on_stage(InstallStage::Extracting, "Extracting packages...");
        let runtime = extract(&runtime_package, &self.layout.runtime_extract_root, "")?;
        let binaries = self.install_binaries(&binary_package, &manifest)?;
        let files_extracted = runtime.files + binaries.files;

        // Stage 6: deployment script
        observer.on_stage(InstallStage::Deploying, "Running deployment script...");
        run_deploy_script(&self.layout.deploy_script(), &storage_root, &|stream, line| {
            observer.on_script_line(stream, line)
        })?;

        // Stage 7: cleanup
        observer.on_stage(InstallStage::Cleanup, "Removing temporary files...");
        if let Err(e) = fs::remove_dir_all(&run_dir) {
            warn!(dir = %run_dir.display(), error = %e, "Failed to remove run directory");
            observer.on_warning(&format!("could not remove {}: {}", run_dir.display(), e));
        }

        observer.on_stage(InstallStage::Complete, "Installation complete");
        info!(
            version = %manifest.version,
            root = %storage_root.display(),
            bytes_downloaded,
            files_extracted,
            "Install finished"
        );

        Ok(InstallReport {
            storage_root,
            version: manifest.version,
            architecture: arch,
            bytes_downloaded,
            files_extracted,
        })
    }

    fn fetch_package(
        &self,
        dest: &Path,
        filename: &str,
        checksum: &str,
        observer: &dyn InstallObserver,
    ) -> InstallResult<u64> {
        self.fetcher
            .fetch_with_events(dest, filename, checksum, &|e| observer.on_fetch(filename, e))
    }

    /// Unpack the binary package into scratch, move the architecture's
    /// binaries into place and fix their modes.
    fn install_binaries(
        &self,
        package: &Path,
        manifest: &ReleaseManifest,
    ) -> InstallResult<ExtractSummary> {
        let scratch = self.layout.scratch_dir();
        if scratch.exists() {
            fs::remove_dir_all(&scratch).map_err(|e| InstallError::WriteFailed {
                path: scratch.clone(),
                source: e,
            })?;
        }
        create_dir(&scratch)?;

        let summary = extract(package, &scratch, "")?;
        let arch_dir = scratch.join(format!("{}_bin", manifest.architecture));
        move_binaries(&arch_dir, &self.layout.bin_dir)?;
        fs::remove_dir_all(&scratch).map_err(|e| InstallError::WriteFailed {
            path: scratch.clone(),
            source: e,
        })?;
        normalize_permissions(&self.layout.bin_dir)?;
        Ok(summary)
    }
}

fn create_dir(path: &Path) -> InstallResult<()> {
    fs::create_dir_all(path).map_err(|e| InstallError::CreateDirFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
