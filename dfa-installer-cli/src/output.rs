//! Terminal rendering of install progress.

use std::sync::Mutex;

use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use dfa_installer::deploy::OutputStream;
use dfa_installer::fetch::FetchEvent;
use dfa_installer::{InstallObserver, InstallReport, InstallStage};

const BAR_TEMPLATE: &str =
    "    {bar:30.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Prints stage markers, download bars and script output.
pub struct ConsoleObserver {
    current: Mutex<Option<InstallStage>>,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            bar: Mutex::new(None),
        }
    }

    /// Mark the stage in progress as failed.
    pub fn fail(&self) {
        self.clear_bar();
        if let Some(stage) = self.take_current() {
            println!("{} {}", style("✗").red().bold(), stage.name());
        }
    }

    /// Print the final summary.
    pub fn summary(&self, report: &InstallReport) {
        println!();
        println!(
            "Docker for Android {} ({}) installed",
            style(&report.version).bold(),
            report.architecture
        );
        println!("  Storage:    {}", report.storage_root.display());
        println!("  Downloaded: {}", HumanBytes(report.bytes_downloaded));
        println!("  Extracted:  {} files", report.files_extracted);
    }

    fn take_current(&self) -> Option<InstallStage> {
        self.current.lock().ok().and_then(|mut c| c.take())
    }

    fn clear_bar(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(bar) = bar.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn update_bar(&self, written: u64, total: u64) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        let bar = slot.get_or_insert_with(|| {
            let style = ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(total).with_style(style)
        });
        bar.set_length(total);
        bar.set_position(written);
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallObserver for ConsoleObserver {
    fn on_stage(&self, stage: InstallStage, message: &str) {
        self.clear_bar();
        if let Some(previous) = self.take_current() {
            println!("{} {}", style("✓").green().bold(), previous.name());
        }
        if stage == InstallStage::Complete {
            println!("{} {}", style("✓").green().bold(), message);
            return;
        }
        println!("{} {}", style("→").cyan(), message);
        if let Ok(mut current) = self.current.lock() {
            *current = Some(stage);
        }
    }

    fn on_fetch(&self, filename: &str, event: &FetchEvent) {
        match event {
            FetchEvent::UsingLocalCopy { path } => {
                println!("    {} using local copy {}", style("•").dim(), path)
            }
            FetchEvent::Attempt { source_url } => {
                println!("    {} {}", style("↓").dim(), style(source_url).dim())
            }
            FetchEvent::Progress { written, total } => self.update_bar(*written, *total),
            FetchEvent::Transferred { written, .. } => {
                self.clear_bar();
                println!("    {} ({})", filename, HumanBytes(*written));
            }
            FetchEvent::Verified => {
                println!("    {} checksum verified", style("✓").green())
            }
            FetchEvent::SourceFailed { reason, .. } => {
                self.clear_bar();
                println!("    {} {}", style("!").yellow().bold(), style(reason).yellow());
            }
        }
    }

    fn on_warning(&self, message: &str) {
        println!("    {} {}", style("warning:").yellow().bold(), message);
    }

    fn on_script_line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => println!("    {} {}", style("|").dim(), line),
            OutputStream::Stderr => eprintln!("    {} {}", style("|").red().dim(), line),
        }
    }
}
