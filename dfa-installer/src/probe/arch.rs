//! CPU architecture detection.

use std::fmt;
use std::process::Command;

use tracing::debug;

use crate::error::{InstallError, InstallResult};

/// Architectures binary bundles are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Arm64,
    X86_64,
}

impl Architecture {
    /// Token used in artifact names and manifest keys (`arm64`, `x86_64`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }

    /// Map a raw machine name onto a supported architecture.
    pub fn normalize(raw: &str) -> InstallResult<Self> {
        match raw.trim() {
            "aarch64" | "arm64" => Ok(Self::Arm64),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            other => Err(InstallError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the raw machine name.
pub trait ArchitectureQuery {
    fn machine(&self) -> InstallResult<String>;
}

/// Runs `uname -m`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnameQuery;

impl ArchitectureQuery for UnameQuery {
    fn machine(&self) -> InstallResult<String> {
        let output = Command::new("uname").arg("-m").output().map_err(|e| {
            InstallError::ArchitectureQueryFailed {
                reason: e.to_string(),
            }
        })?;
        if !output.status.success() {
            return Err(InstallError::ArchitectureQueryFailed {
                reason: format!("uname exited with {}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Detect the running architecture.
///
/// Anything outside the supported set is a hard stop: installing mismatched
/// binaries is worse than not installing at all.
pub fn detect_architecture(query: &dyn ArchitectureQuery) -> InstallResult<Architecture> {
    let raw = query.machine()?;
    debug!(machine = %raw, "Queried machine architecture");
    Architecture::normalize(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl ArchitectureQuery for Fixed {
        fn machine(&self) -> InstallResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_normalize_vendor_spellings() {
        assert_eq!(Architecture::normalize("aarch64").unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::normalize("arm64").unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::normalize("x86_64\n").unwrap(), Architecture::X86_64);
        assert_eq!(Architecture::normalize("amd64").unwrap(), Architecture::X86_64);
    }

    #[test]
    fn test_unknown_architecture_is_rejected() {
        match Architecture::normalize("armv7l") {
            Err(InstallError::UnsupportedArchitecture(arch)) => assert_eq!(arch, "armv7l"),
            other => panic!("expected UnsupportedArchitecture, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_uses_query() {
        assert_eq!(detect_architecture(&Fixed("aarch64")).unwrap(), Architecture::Arm64);
        assert!(detect_architecture(&Fixed("mips")).is_err());
    }

    #[test]
    fn test_display_token() {
        assert_eq!(Architecture::Arm64.to_string(), "arm64");
        assert_eq!(Architecture::X86_64.as_str(), "x86_64");
    }
}
