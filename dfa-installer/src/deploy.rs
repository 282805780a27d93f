//! Running the external deployment script.
//!
//! The script ships inside the runtime package and is run as
//! `sh <script> <storage root>`. Both output streams are forwarded line by
//! line while it runs. Daemons the script starts in the background inherit
//! its pipes, so output is only awaited for a short grace period after the
//! script itself exits.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{InstallError, InstallResult};
use crate::process::run_streaming;

/// Which stream a script line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives each line the script prints.
pub type LineSink<'a> = &'a dyn Fn(OutputStream, &str);

/// Run `sh <script> <storage_root>` and wait for it.
pub fn run_deploy_script(
    script: &Path,
    storage_root: &Path,
    on_line: LineSink<'_>,
) -> InstallResult<()> {
    if !script.is_file() {
        return Err(InstallError::DeployScriptMissing(script.to_path_buf()));
    }

    info!(script = %script.display(), root = %storage_root.display(), "Running deployment script");
    let mut command = Command::new("sh");
    command.arg(script).arg(storage_root);
    let status = run_streaming(&mut command, None, &mut |kind, line| on_line(kind, line))
        .map_err(|e| InstallError::ProcessControl {
            reason: format!("running deployment script: {}", e),
        })?;

    match status {
        Some(status) if status.success() => {
            info!("Deployment script finished");
            Ok(())
        }
        Some(status) => Err(InstallError::ScriptExecutionFailed {
            exit_code: status.code(),
        }),
        None => Err(InstallError::ScriptExecutionFailed { exit_code: None }),
    }
}
