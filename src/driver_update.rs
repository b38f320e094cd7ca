// ============================================
// winmaint - driver_update.rs
// ============================================
// The HP driver/BIOS workflow, start to finish.
//
// Steps run strictly in order and the first failure stops everything:
// the failure is written to the run log, then returned to the caller.
// Nothing is rolled back, the workspace stays in whatever state it
// reached.
//
//   1. (caller) prove admin rights -> &Elevated
//   2. prepare workspace
//   3. download the HPIA installer
//   4. extract it
//   5. analyze + download softpaqs
//   6. install softpaqs (or log "no updates")
//   7. cleanup
//   8. move reports from Downloads into the report folder
// ============================================

use anyhow::{Context, Result};
use std::fs;

use crate::config::Config;
use crate::download;
use crate::elevation::Elevated;
use crate::hpia::{self, AnalysisOutcome, InstallOutcome};
use crate::runlog::RunLog;
use crate::system_info;
use crate::workspace::{self, CleanupSummary, RelocationSummary};

/// Command line choices for the driver workflow
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverUpdateOptions {
    /// Only look for BIOS updates (skip drivers)
    pub bios_only: bool,
}

/// Everything the workflow did, for the final console summary
#[derive(Debug, Clone)]
pub struct DriverUpdateReport {
    pub analysis: AnalysisOutcome,
    pub install: InstallOutcome,
    pub cleanup: CleanupSummary,
    pub reports: RelocationSummary,
}

impl DriverUpdateReport {
    pub fn reboot_required(&self) -> bool {
        self.analysis == AnalysisOutcome::RebootRequired
            || matches!(
                self.install,
                InstallOutcome::Installed {
                    reboot_required: true,
                    ..
                }
            )
    }
}

/// Run the whole driver/BIOS workflow.
///
/// Taking `&Elevated` means this can't be called before the admin check passed.
pub fn run(
    _elevated: &Elevated,
    config: &Config,
    options: DriverUpdateOptions,
) -> Result<DriverUpdateReport> {
    // The log has to exist before anything else so every failure lands in it
    fs::create_dir_all(&config.workspace_root).with_context(|| {
        format!("Failed to create {}", config.workspace_root.display())
    })?;
    let log_path = config.log_path();
    let mut log = RunLog::open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    tracing::info!("Logging to {}", log.path().display());
    log.append(if options.bios_only {
        "HPIA BIOS update started"
    } else {
        "HPIA driver and BIOS update started"
    })?;

    // ============================================
    // STEP 2: Prepare workspace
    // ============================================
    // prepare() keeps the log file, so the handle above stays valid
    logged(&mut log, "Workspace preparation", || workspace::prepare(config))?;

    // ============================================
    // STEP 3: Download installer
    // ============================================
    let installer = logged(&mut log, "HPIA download", || {
        download::fetch_installer(config).map_err(anyhow::Error::from)
    })?;
    log.append("HPIA installer downloaded")?;

    // ============================================
    // STEP 4: Extract installer
    // ============================================
    logged(&mut log, "HPIA extraction", || {
        hpia::extract_installer(config, &installer)
    })?;
    log.append("HPIA extracted")?;

    // ============================================
    // STEP 5: Analyze + download softpaqs
    // ============================================
    let analysis = logged(&mut log, "HPIA analysis", || {
        hpia::analyze(config, options.bios_only)
    })?;
    log.append(analysis.describe())?;

    // ============================================
    // STEP 6: Install softpaqs
    // ============================================
    // "No updates" and "script missing" come back as outcomes, not errors
    let install = logged_mut(&mut log, "Softpaq installation", |log| {
        hpia::install_packages(config, log)
    })?;

    // ============================================
    // STEP 7: Cleanup
    // ============================================
    let cleanup = logged(&mut log, "Cleanup", || workspace::cleanup(config))?;
    log.append(&format!(
        "Workspace cleaned up ({} item(s), {} link(s){})",
        cleanup.workspace_items,
        cleanup.links,
        if cleanup.system_temp_removed {
            ", system temp folder"
        } else {
            ""
        }
    ))?;

    // ============================================
    // STEP 8: Relocate reports
    // ============================================
    let reports = logged(&mut log, "Report relocation", || {
        let model = system_info::host_model()?;
        let downloads = system_info::downloads_dir()?;
        workspace::relocate_reports(
            &downloads,
            &config.report_dir(),
            &model,
            &config.report_extensions,
        )
    })?;
    log.append(&format!(
        "{} report(s) moved to {}",
        reports.moved.len(),
        config.report_dir().display()
    ))?;

    Ok(DriverUpdateReport {
        analysis,
        install,
        cleanup,
        reports,
    })
}

/// Run one step; on failure append "<step> failed: <error>" to the log
/// and hand the error back.
fn logged<T>(log: &mut RunLog, step: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    logged_mut(log, step, |_| f())
}

/// Same as `logged`, for steps that write to the log themselves.
fn logged_mut<T>(
    log: &mut RunLog,
    step: &str,
    f: impl FnOnce(&mut RunLog) -> Result<T>,
) -> Result<T> {
    match f(log) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::error!("{} failed: {:#}", step, e);
            log.append_best_effort(&format!("{} failed: {:#}", step, e));
            Err(e.context(format!("{} failed", step)))
        }
    }
}

// ============================================
// TESTS
// ============================================
