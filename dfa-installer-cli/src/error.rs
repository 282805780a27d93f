//! CLI error types and handling.

use std::fmt;
use std::process;

use dfa_installer::InstallError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Bad command-line or configuration input.
    Config(String),
    /// The install itself failed.
    Install(InstallError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Install(e) => write!(f, "Installation failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Install(e) => Some(e),
            CliError::Config(_) => None,
        }
    }
}

impl From<InstallError> for CliError {
    fn from(e: InstallError) -> Self {
        match e {
            InstallError::InvalidConfig(msg) => CliError::Config(msg),
            other => CliError::Install(other),
        }
    }
}

impl CliError {
    /// Print the error and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        if let CliError::Install(InstallError::AllSourcesExhausted { failures, .. }) = self {
            for failure in failures {
                eprintln!("  - {}", failure);
            }
        }
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_maps_to_config_error() {
        let err: CliError = InstallError::InvalidConfig("bad timeout".to_string()).into();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.to_string(), "Configuration error: bad timeout");
    }

    #[test]
    fn test_install_error_keeps_source() {
        use std::error::Error;

        let err: CliError = InstallError::ScriptExecutionFailed { exit_code: Some(2) }.into();
        assert!(err.to_string().starts_with("Installation failed:"));
        assert!(err.source().is_some());
    }
}
