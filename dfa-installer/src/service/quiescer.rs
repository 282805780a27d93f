//! Two-phase stop of a previously installed service.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::control::{ServiceControl, SystemServiceControl};
use crate::config::InstallerConfig;
use crate::error::InstallResult;

/// What a quiescence run found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuiesceOutcome {
    /// No control binary on disk, so nothing can be running.
    FirstInstall,
    /// The service was asked to stop and any survivors were signalled.
    Stopped { terminated: usize, failed: usize },
}

/// Stops a running service gracefully, then sweeps up what remains.
pub struct ServiceQuiescer<C: ServiceControl = SystemServiceControl> {
    control: C,
    control_binary: PathBuf,
    stop_args: Vec<String>,
    process_name: String,
    grace_period: Duration,
    settle_period: Duration,
}

impl ServiceQuiescer<SystemServiceControl> {
    /// Build a quiescer using the real process table.
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self::with_control(config, SystemServiceControl::new(config.service.stop_timeout))
    }
}

impl<C: ServiceControl> ServiceQuiescer<C> {
    /// Build a quiescer with a custom process-control backend.
    pub fn with_control(config: &InstallerConfig, control: C) -> Self {
        Self {
            control,
            control_binary: config.control_binary(),
            stop_args: config.service.stop_args.clone(),
            process_name: config.service.process_name.clone(),
            grace_period: config.service.grace_period,
            settle_period: config.service.settle_period,
        }
    }

    /// Stop the service.
    ///
    /// A failing graceful stop is only logged; the sweep still runs. A sweep
    /// that finds nothing is success, so repeated runs are harmless.
    pub fn quiesce(&self) -> InstallResult<QuiesceOutcome> {
        if !self.control_binary.exists() {
            info!(
                binary = %self.control_binary.display(),
                "No existing service found, skipping stop"
            );
            return Ok(QuiesceOutcome::FirstInstall);
        }

        info!(binary = %self.control_binary.display(), "Stopping running service");
        match self.control.stop_all(&self.control_binary, &self.stop_args) {
            Ok(outcome) if outcome.success => {
                debug!(output = %outcome.output, "Graceful stop succeeded")
            }
            Ok(outcome) => warn!(output = %outcome.output, "Graceful stop reported failure"),
            Err(e) => warn!(error = %e, "Graceful stop could not run"),
        }
        pause(self.grace_period);

        let processes = self.control.list_processes_by_name(&self.process_name)?;
        if processes.is_empty() {
            debug!(name = %self.process_name, "No leftover service processes");
            return Ok(QuiesceOutcome::Stopped {
                terminated: 0,
                failed: 0,
            });
        }

        let mut terminated = 0;
        let mut failed = 0;
        for process in processes {
            match self.control.terminate(process) {
                Ok(()) => {
                    debug!(pid = process.pid, "Killed service process");
                    terminated += 1;
                }
                Err(e) => {
                    warn!(pid = process.pid, error = %e, "Failed to kill service process");
                    failed += 1;
                }
            }
        }
        pause(self.settle_period);

        info!(terminated, failed, "Service stopped");
        Ok(QuiesceOutcome::Stopped { terminated, failed })
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
