//! DFA Installer CLI - Command-line interface
//!
//! Runs the unattended Docker-for-Android install. Settings come from an
//! optional INI file; flags given on the command line win.

mod error;
mod output;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use dfa_installer::config::{InstallerConfig, LayoutConfig};
use dfa_installer::fetch::{HttpTransport, TrustStore};
use dfa_installer::logging::init_logging;
use dfa_installer::Installer;

use error::CliError;
use output::ConsoleObserver;

#[derive(Debug, Parser)]
#[command(name = "dfa-installer", version, about = "Install Docker on Android")]
struct Args {
    /// INI configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory with pre-downloaded artifacts
    #[arg(long, value_name = "DIR")]
    offline_dir: Option<PathBuf>,

    /// Installation root (binaries go to <root>/bin)
    #[arg(long, value_name = "DIR")]
    install_root: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Log every HTTP request and response
    #[arg(long)]
    http_log: bool,
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        e.exit();
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let mut config = InstallerConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let _guard = init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "dfa-installer starting");

    let trust = TrustStore::from_config(&config.network)?;
    let transport = HttpTransport::new(&config.network, &trust)?;
    let installer = Installer::new(&config, transport);

    let observer = ConsoleObserver::new();
    match installer.install(&observer) {
        Ok(report) => {
            observer.summary(&report);
            Ok(())
        }
        Err(e) => {
            observer.fail();
            Err(e.into())
        }
    }
}

/// Command-line flags take precedence over the file.
fn apply_overrides(config: &mut InstallerConfig, args: &Args) {
    if let Some(root) = &args.install_root {
        let offline_dir = config.layout.offline_dir.take();
        config.layout = LayoutConfig {
            offline_dir,
            ..LayoutConfig::for_install_root(root.clone())
        };
    }
    if let Some(dir) = &args.offline_dir {
        config.layout.offline_dir = Some(dir.clone());
    }
    if let Some(file) = &args.log_file {
        config.logging.file = Some(file.clone());
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if args.http_log {
        config.network.http_log = true;
    }
}
