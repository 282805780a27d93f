//! DFA Installer - unattended Docker-for-Android installation
//!
//! This library provides everything needed to install the Docker runtime on
//! an Android device: storage and architecture probing, release manifest
//! resolution, verified multi-source downloads, archive extraction, service
//! quiescence and the hand-off to the deployment script.

pub mod archive;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod probe;
mod process;
pub mod service;

pub use config::InstallerConfig;
pub use error::{InstallError, InstallResult};
pub use installer::{InstallObserver, InstallReport, InstallStage, Installer, NoopObserver};
