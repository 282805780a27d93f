//! Quiescing a running service before files are replaced.
//!
//! Stopping is two-phase: the service's own control binary is asked to stop
//! everything, then after a grace period any process still matching the
//! service name is killed.

mod control;
mod quiescer;

pub use control::{
    cmdline_matches, ServiceControl, ServiceProcess, StopOutcome, SystemServiceControl,
};
pub use quiescer::{QuiesceOutcome, ServiceQuiescer};
