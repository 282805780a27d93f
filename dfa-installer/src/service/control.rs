//! OS process control used to quiesce the running service.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::warn;

use crate::error::{InstallError, InstallResult};
use crate::process::run_streaming;

/// A running service process found by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProcess {
    pub pid: i32,
}

/// Result of the graceful stop command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub success: bool,
    /// Combined stdout and stderr, trimmed.
    pub output: String,
}

/// Platform capabilities needed to stop the service.
pub trait ServiceControl {
    /// Run the control binary's graceful stop command.
    fn stop_all(&self, control_binary: &Path, args: &[String]) -> InstallResult<StopOutcome>;

    /// Processes whose command line contains `name`, excluding the caller.
    fn list_processes_by_name(&self, name: &str) -> InstallResult<Vec<ServiceProcess>>;

    /// Forcefully terminate a process.
    fn terminate(&self, process: ServiceProcess) -> InstallResult<()>;
}

/// `/proc` scanning and `SIGKILL`.
#[derive(Debug, Clone, Copy)]
pub struct SystemServiceControl {
    stop_timeout: Duration,
}

impl SystemServiceControl {
    /// A stop command still running after `stop_timeout` is killed.
    pub fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }
}

impl Default for SystemServiceControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ServiceControl for SystemServiceControl {
    fn stop_all(&self, control_binary: &Path, args: &[String]) -> InstallResult<StopOutcome> {
        let mut command = Command::new(control_binary);
        command.args(args);

        let mut combined = String::new();
        let status = run_streaming(&mut command, Some(self.stop_timeout), &mut |_, line| {
            combined.push_str(line);
            combined.push('\n');
        })
        .map_err(|e| InstallError::ProcessControl {
            reason: format!("cannot run {}: {}", control_binary.display(), e),
        })?;

        let Some(status) = status else {
            warn!(
                binary = %control_binary.display(),
                timeout_secs = self.stop_timeout.as_secs_f64(),
                "Stop command did not finish in time, killed it"
            );
            combined.push_str(&format!(
                "stop command timed out after {}s",
                self.stop_timeout.as_secs_f64()
            ));
            return Ok(StopOutcome {
                success: false,
                output: combined.trim().to_string(),
            });
        };
        Ok(StopOutcome {
            success: status.success(),
            output: combined.trim().to_string(),
        })
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn list_processes_by_name(&self, name: &str) -> InstallResult<Vec<ServiceProcess>> {
        use std::fs;

        let own_pid = std::process::id() as i32;
        let proc_dir = fs::read_dir("/proc").map_err(|e| InstallError::ProcessControl {
            reason: format!("cannot list /proc: {}", e),
        })?;

        let mut found = Vec::new();
        for entry in proc_dir.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };
            if pid == own_pid {
                continue;
            }
            // Processes can exit between listing and reading; skip them.
            let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            if cmdline_matches(&raw, name) {
                found.push(ServiceProcess { pid });
            }
        }
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn list_processes_by_name(&self, _name: &str) -> InstallResult<Vec<ServiceProcess>> {
        Err(InstallError::ProcessControl {
            reason: "process listing is only implemented for Linux and Android".to_string(),
        })
    }

    #[cfg(unix)]
    fn terminate(&self, process: ServiceProcess) -> InstallResult<()> {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(process.pid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Already gone.
            return Ok(());
        }
        Err(InstallError::ProcessControl {
            reason: format!("kill {}: {}", process.pid, err),
        })
    }

    #[cfg(not(unix))]
    fn terminate(&self, process: ServiceProcess) -> InstallResult<()> {
        Err(InstallError::ProcessControl {
            reason: format!("cannot signal {} on this platform", process.pid),
        })
    }
}

/// Whether a NUL-separated `/proc/<pid>/cmdline` mentions `name`.
///
/// Kernel threads have an empty command line and never match.
pub fn cmdline_matches(raw: &[u8], name: &str) -> bool {
    if raw.is_empty() || name.is_empty() {
        return false;
    }
    let cmdline: String = String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if c == '\0' { ' ' } else { c })
        .collect();
    cmdline.contains(name)
}
