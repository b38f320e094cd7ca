// ============================================
// winmaint - main.rs
// ============================================
// This is the entry point of the application.
//
// Two independent jobs, one per subcommand:
//
//   winmaint drivers [--bios-only]    HP drivers/BIOS via HP Image Assistant
//   winmaint os-update                Windows Update via PSWindowsUpdate
//
// Exit codes:
//   0 = success
//   1 = a step failed (see the console / C:\HPIA\HPIA_Update.log)
//   2 = not running as administrator (nothing was changed)
//
// Set RUST_LOG=debug to see every command line that gets executed.
// ============================================

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// Our modules
mod config;         // Paths, URLs, winmaint.toml
mod download;       // Vendor page scraping + installer download
mod driver_update;  // Workflow A: HP drivers/BIOS
mod elevation;      // Admin rights as a capability token
mod hpia;           // HP Image Assistant command lines and outcomes
mod process;        // Typed external command builder
mod runlog;         // Append-only status log in the workspace
mod system_info;    // Host model, Downloads folder, PowerShell helper
mod windows_update; // Workflow B: Windows Update
mod workspace;      // Workspace prepare/cleanup, report relocation

use config::Config;
use driver_update::DriverUpdateOptions;
use elevation::Elevated;
use hpia::InstallOutcome;
use windows_update::{WindowsUpdateOptions, WindowsUpdateOutcome};

// ============================================
// COMMAND LINE
// ============================================

#[derive(Parser)]
#[command(name = "winmaint", version)]
#[command(about = "HP driver/BIOS updates and Windows Update, unattended", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update HP drivers and BIOS with HP Image Assistant
    Drivers {
        /// Only check for BIOS updates
        #[arg(long)]
        bios_only: bool,

        /// Settings file (default: winmaint.toml next to the EXE)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Install all Windows updates
    OsUpdate {
        /// Don't ask to reboot afterwards
        #[arg(long)]
        no_reboot_prompt: bool,
    },
}

// ============================================
// MAIN FUNCTION
// ============================================

fn main() -> ExitCode {
    // Default to info, RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    tracing::info!("winmaint v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Drivers { bios_only, config } => {
            // Admin check first: without the token nothing else runs
            let elevated = match Elevated::acquire() {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!("{}", e);
                    return ExitCode::from(2);
                }
            };
            run_drivers(&elevated, config, bios_only)
        }
        Commands::OsUpdate { no_reboot_prompt } => run_os_update(no_reboot_prompt),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_drivers(elevated: &Elevated, config_path: Option<PathBuf>, bios_only: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;
    tracing::info!("Workspace: {}", config.workspace_root.display());

    let report = driver_update::run(elevated, &config, DriverUpdateOptions { bios_only })?;

    match &report.install {
        InstallOutcome::NoUpdates => tracing::info!("No HP updates found"),
        InstallOutcome::ScriptMissing { packages } => tracing::warn!(
            "{} softpaq(s) downloaded but not installed (no install script)",
            packages
        ),
        InstallOutcome::Installed { labels, .. } => {
            tracing::info!("Installed {} HP update(s)", labels.len())
        }
    }
    tracing::info!(
        "Cleanup: {} workspace item(s), {} link(s) removed{}",
        report.cleanup.workspace_items,
        report.cleanup.links,
        if report.cleanup.system_temp_removed {
            ", system temp folder deleted"
        } else {
            ""
        }
    );
    tracing::info!(
        "Reports: {} moved, {} skipped",
        report.reports.moved.len(),
        report.reports.skipped.len()
    );
    if report.reboot_required() {
        tracing::warn!("Restart the computer to finish installing HP updates");
    }
    Ok(())
}

fn run_os_update(no_reboot_prompt: bool) -> anyhow::Result<()> {
    let outcome = windows_update::run(WindowsUpdateOptions { no_reboot_prompt })?;

    match outcome {
        WindowsUpdateOutcome::UpToDate => tracing::info!("Windows is up to date"),
        WindowsUpdateOutcome::Installed { report, rebooting } => {
            let failed = report.records.iter().filter(|r| r.failed()).count();
            tracing::info!(
                "Windows Update finished: {} processed, {} failed",
                report.records.len(),
                failed
            );
            if report.reboot_required && !rebooting {
                tracing::warn!("Restart the computer to finish installing updates");
            }
        }
    }
    Ok(())
}
