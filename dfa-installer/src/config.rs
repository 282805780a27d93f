//! Installer configuration.
//!
//! Every value has a default matching the stock device layout; an optional
//! INI file can override any of them:
//!
//! ```ini
//! [sources]
//! mirror = https://fw.kspeeder.com/binary/docker-for-android
//! origin = https://fw.koolcenter.com/binary/docker-for-android
//!
//! [network]
//! connect_timeout_secs = 120
//! request_timeout_secs = 600
//! ca_bundle = /system/etc/security/cacerts.pem
//! http_log = false
//!
//! [storage]
//! candidates = /mnt/media_rw/*, /storage/*, /data/local, /data
//! min_free_kb = 1048576
//!
//! [layout]
//! install_root = /data/local/docker
//! offline_dir = /sdcard/docker-install
//!
//! [service]
//! process_name = supervisord
//! grace_period_secs = 2
//! stop_timeout_secs = 10
//!
//! [logging]
//! level = info
//! file = /data/local/tmp/dfa-installer.log
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::{InstallError, InstallResult};

/// CDN mirror, tried first.
pub const DEFAULT_MIRROR_URL: &str = "https://fw.kspeeder.com/binary/docker-for-android";

/// Origin server, tried when the mirror fails.
pub const DEFAULT_ORIGIN_URL: &str = "https://fw.koolcenter.com/binary/docker-for-android";

/// Minimum free space a volume must offer (1 GiB, in KB).
pub const DEFAULT_MIN_FREE_KB: u64 = 1024 * 1024;

/// Name of the release manifest on the download sources.
pub const MANIFEST_FILENAME: &str = "version.txt";

/// Environment variable that force-enables HTTP wire logging.
pub const HTTP_LOG_ENV: &str = "INSTALLER_HTTP_LOG";

/// Older name of [`HTTP_LOG_ENV`], still honoured.
pub const LEGACY_HTTP_LOG_ENV: &str = "ISE_HTTP_LOG";

/// Complete installer configuration.
#[derive(Debug, Clone, Default)]
pub struct InstallerConfig {
    pub sources: SourceConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub layout: LayoutConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

/// Ordered download sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URLs, tried in order.
    pub base_urls: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_urls: vec![
                DEFAULT_MIRROR_URL.to_string(),
                DEFAULT_ORIGIN_URL.to_string(),
            ],
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Dial timeout, also applied to every individual body read.
    pub connect_timeout: Duration,
    /// Deadline for a whole request including the body transfer.
    pub request_timeout: Duration,
    /// PEM bundle with additional root certificates.
    pub ca_bundle: Option<PathBuf>,
    /// Log request and response headers.
    pub http_log: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(600),
            ca_bundle: None,
            http_log: false,
        }
    }
}

/// Storage probing settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Candidate mount points in priority order. A trailing `/*` expands to
    /// every subdirectory.
    pub candidates: Vec<String>,
    /// Volumes with less free space than this are rejected.
    pub min_free_kb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "/mnt/media_rw/*".to_string(),
                "/storage/*".to_string(),
                "/data/local".to_string(),
                "/data".to_string(),
            ],
            min_free_kb: DEFAULT_MIN_FREE_KB,
        }
    }
}

/// Fixed filesystem layout produced by the install.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Final installation root.
    pub install_root: PathBuf,
    /// Directory receiving the architecture-specific binaries.
    pub bin_dir: PathBuf,
    /// Where the runtime package is unpacked; its members are rooted at
    /// the last component of `install_root`.
    pub runtime_extract_root: PathBuf,
    /// Directory checked for pre-downloaded artifacts.
    pub offline_dir: Option<PathBuf>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::for_install_root(PathBuf::from("/data/local/docker"))
            .with_offline_dir(PathBuf::from("/sdcard/docker-install"))
    }
}

impl LayoutConfig {
    /// Derive the standard layout beneath an installation root.
    pub fn for_install_root(install_root: PathBuf) -> Self {
        let bin_dir = install_root.join("bin");
        let runtime_extract_root = install_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| install_root.clone());
        Self {
            install_root,
            bin_dir,
            runtime_extract_root,
            offline_dir: None,
        }
    }

    /// Set the offline bundle directory.
    pub fn with_offline_dir(mut self, dir: PathBuf) -> Self {
        self.offline_dir = Some(dir);
        self
    }

    /// Scratch directory for the binary package.
    pub fn scratch_dir(&self) -> PathBuf {
        self.install_root.join("tmp_bin_extract")
    }

    /// Path of the external deployment script.
    pub fn deploy_script(&self) -> PathBuf {
        self.install_root.join("deploy-in-android.sh")
    }
}

/// Running-service quiescence settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Control binary; when absent this is a first-time install.
    /// Defaults to `{bin_dir}/supervisord`.
    pub control_binary: Option<PathBuf>,
    /// Arguments of the graceful "stop all" command.
    pub stop_args: Vec<String>,
    /// Command-line substring identifying service processes.
    pub process_name: String,
    /// Longest the graceful stop command may run before it is killed.
    pub stop_timeout: Duration,
    /// Wait after the graceful stop before the hard sweep.
    pub grace_period: Duration,
    /// Wait after signalling matched processes.
    pub settle_period: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            control_binary: None,
            stop_args: vec!["ctl".to_string(), "stop".to_string(), "all".to_string()],
            process_name: "supervisord".to_string(),
            stop_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(2),
            settle_period: Duration::from_secs(1),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Optional log file in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl InstallerConfig {
    /// Load configuration from an INI file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> InstallResult<Self> {
        let mut config = match path {
            Some(path) => {
                let ini = Ini::load_from_file(path).map_err(|e| {
                    InstallError::InvalidConfig(format!("{}: {}", path.display(), e))
                })?;
                Self::from_ini(&ini)?
            }
            None => Self::default(),
        };
        if http_log_forced(|name| std::env::var(name).ok()) {
            config.network.http_log = true;
        }
        Ok(config)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> InstallResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| InstallError::InvalidConfig(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> InstallResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("sources")) {
            let urls: Vec<String> = ["mirror", "origin"]
                .iter()
                .filter_map(|key| section.get(key))
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .collect();
            if !urls.is_empty() {
                config.sources.base_urls = urls;
            }
        }

        if let Some(section) = ini.section(Some("network")) {
            if let Some(secs) = parse_value::<u64>(section, "network", "connect_timeout_secs")? {
                config.network.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_value::<u64>(section, "network", "request_timeout_secs")? {
                config.network.request_timeout = Duration::from_secs(secs);
            }
            if let Some(path) = section.get("ca_bundle") {
                config.network.ca_bundle = Some(PathBuf::from(path.trim()));
            }
            if let Some(enabled) = parse_value::<bool>(section, "network", "http_log")? {
                config.network.http_log = enabled;
            }
        }

        if let Some(section) = ini.section(Some("storage")) {
            if let Some(list) = section.get("candidates") {
                config.storage.candidates = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            if let Some(kb) = parse_value::<u64>(section, "storage", "min_free_kb")? {
                config.storage.min_free_kb = kb;
            }
        }

        if let Some(section) = ini.section(Some("layout")) {
            let offline_dir = config.layout.offline_dir.clone();
            if let Some(root) = section.get("install_root") {
                config.layout = LayoutConfig::for_install_root(PathBuf::from(root.trim()));
                config.layout.offline_dir = offline_dir;
            }
            if let Some(dir) = section.get("bin_dir") {
                config.layout.bin_dir = PathBuf::from(dir.trim());
            }
            if let Some(dir) = section.get("runtime_extract_root") {
                config.layout.runtime_extract_root = PathBuf::from(dir.trim());
            }
            if let Some(dir) = section.get("offline_dir") {
                let dir = dir.trim();
                config.layout.offline_dir = if dir.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(dir))
                };
            }
        }

        if let Some(section) = ini.section(Some("service")) {
            if let Some(path) = section.get("control_binary") {
                config.service.control_binary = Some(PathBuf::from(path.trim()));
            }
            if let Some(name) = section.get("process_name") {
                let name = name.trim();
                if name.is_empty() {
                    return Err(InstallError::InvalidConfig(
                        "service.process_name must not be empty".to_string(),
                    ));
                }
                config.service.process_name = name.to_string();
            }
            if let Some(secs) = parse_value::<u64>(section, "service", "stop_timeout_secs")? {
                config.service.stop_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_value::<u64>(section, "service", "grace_period_secs")? {
                config.service.grace_period = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_value::<u64>(section, "service", "settle_period_secs")? {
                config.service.settle_period = Duration::from_secs(secs);
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(level) = section.get("level") {
                config.logging.level = level.trim().to_string();
            }
            if let Some(file) = section.get("file") {
                config.logging.file = Some(PathBuf::from(file.trim()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> InstallResult<()> {
        if self.sources.base_urls.is_empty() {
            return Err(InstallError::InvalidConfig(
                "at least one download source is required".to_string(),
            ));
        }
        if self.network.connect_timeout >= self.network.request_timeout {
            return Err(InstallError::InvalidConfig(format!(
                "connect timeout ({}s) must be shorter than the request timeout ({}s)",
                self.network.connect_timeout.as_secs(),
                self.network.request_timeout.as_secs()
            )));
        }
        if self.service.stop_timeout.is_zero() {
            return Err(InstallError::InvalidConfig(
                "service.stop_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Control binary path, defaulting to `supervisord` in the binaries dir.
    pub fn control_binary(&self) -> PathBuf {
        self.service
            .control_binary
            .clone()
            .unwrap_or_else(|| self.layout.bin_dir.join("supervisord"))
    }
}

/// Whether either wire-logging variable is set to `1`.
fn http_log_forced(lookup: impl Fn(&str) -> Option<String>) -> bool {
    [HTTP_LOG_ENV, LEGACY_HTTP_LOG_ENV]
        .into_iter()
        .any(|name| lookup(name).as_deref() == Some("1"))
}

fn parse_value<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> InstallResult<Option<T>> {
    match section.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            InstallError::InvalidConfig(format!(
                "{}.{}: cannot parse '{}'",
                section_name,
                key,
                raw.trim()
            ))
        }),
    }
}
