// ============================================
// winmaint - hpia.rs
// ============================================
// Driving HP Image Assistant (HPIA).
//
// Three external programs are involved, always in this order:
//
//   1. hp-hpia-x.y.z.exe  /s /e /f C:\HPIA
//        The downloaded installer. With these flags it just unpacks
//        HPImageAssistant.exe (and its DLLs) into the workspace.
//
//   2. HPImageAssistant.exe /Operation:Analyze /Category:BIOS,Drivers
//        /Selection:All /Action:Extract /Silent
//        /SoftpaqDownloadFolder:C:\HPIA\Softpaqs
//        Compares the machine against HP's catalog, downloads every
//        applicable softpaq, extracts it, and writes InstallAll.cmd.
//
//   3. cmd /c C:\HPIA\Softpaqs\InstallAll.cmd
//        Generated batch script that installs everything that was extracted.
// ============================================

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, INSTALL_SCRIPT_NAME};
use crate::process::{ExitPolicy, ToolCommand};
use crate::runlog::RunLog;

// ============================================
// HPIA EXIT CODES
// ============================================
// HPIA reports "nothing to do" and "reboot needed" through its exit code,
// so those must not be treated as failures.

const EXIT_NO_RECOMMENDATIONS: i32 = 256;
const EXIT_NOTHING_SELECTED: i32 = 257;
const EXIT_REBOOT_REQUIRED: i32 = 3010;

const ANALYZE_POLICY: ExitPolicy =
    ExitPolicy::Accept(&[EXIT_NO_RECOMMENDATIONS, EXIT_NOTHING_SELECTED, EXIT_REBOOT_REQUIRED]);

/// InstallAll.cmd passes through the installers' 3010 when one needs a reboot
const INSTALL_POLICY: ExitPolicy = ExitPolicy::Accept(&[EXIT_REBOOT_REQUIRED]);

// ============================================
// ANALYZE ARGUMENTS
// ============================================

/// What HPIA should look at
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HpiaCategory {
    Bios,
    Drivers,
}

impl HpiaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HpiaCategory::Bios => "BIOS",
            HpiaCategory::Drivers => "Drivers",
        }
    }

    /// BIOS-only scan, or the full BIOS + drivers scan.
    pub fn for_mode(bios_only: bool) -> Vec<HpiaCategory> {
        if bios_only {
            vec![HpiaCategory::Bios]
        } else {
            vec![HpiaCategory::Bios, HpiaCategory::Drivers]
        }
    }
}

/// Typed arguments for an analyze + extract run.
#[derive(Debug, Clone)]
pub struct HpiaArgs {
    pub categories: Vec<HpiaCategory>,
    pub softpaq_dir: PathBuf,
}

impl HpiaArgs {
    pub fn new(bios_only: bool, softpaq_dir: PathBuf) -> Self {
        HpiaArgs {
            categories: HpiaCategory::for_mode(bios_only),
            softpaq_dir,
        }
    }

    /// Append the HPIA switches to `command`.
    pub fn apply(&self, command: ToolCommand) -> ToolCommand {
        let categories: Vec<&str> = self.categories.iter().map(HpiaCategory::as_str).collect();
        command
            .option("/Operation", ':', "Analyze")
            .option("/Category", ':', &categories.join(","))
            .option("/Selection", ':', "All")
            .option("/Action", ':', "Extract")
            .flag("/Silent")
            .option(
                "/SoftpaqDownloadFolder",
                ':',
                &self.softpaq_dir.to_string_lossy(),
            )
    }
}

/// How the analysis ended (every variant is a success)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisOutcome {
    Completed,
    NoRecommendations,
    NothingSelected,
    RebootRequired,
}

impl AnalysisOutcome {
    fn from_code(code: i32) -> AnalysisOutcome {
        match code {
            EXIT_NO_RECOMMENDATIONS => AnalysisOutcome::NoRecommendations,
            EXIT_NOTHING_SELECTED => AnalysisOutcome::NothingSelected,
            EXIT_REBOOT_REQUIRED => AnalysisOutcome::RebootRequired,
            _ => AnalysisOutcome::Completed,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AnalysisOutcome::Completed => "HPIA analysis completed",
            AnalysisOutcome::NoRecommendations => "HPIA analysis returned no recommendations",
            AnalysisOutcome::NothingSelected => "HPIA analysis selected no recommendations",
            AnalysisOutcome::RebootRequired => "HPIA analysis completed, reboot required",
        }
    }
}

// ============================================
// STEPS
// ============================================

/// Unpack HPImageAssistant.exe from the downloaded installer into the workspace root.
pub fn extract_installer(config: &Config, installer: &Path) -> Result<()> {
    let root = &config.workspace_root;
    tracing::info!("Extracting {} into {}", installer.display(), root.display());

    ToolCommand::program(installer)
        .flag("/s")
        .flag("/e")
        .flag("/f")
        .path(root)
        .working_dir(root)
        .run_checked(ExitPolicy::ZeroOnly)
        .context("HPIA installer extraction failed")?;

    let utility = config.utility_path();
    if !utility.is_file() {
        anyhow::bail!(
            "Installer finished but {} was not extracted",
            utility.display()
        );
    }
    Ok(())
}

/// Run the analysis and download applicable softpaqs.
pub fn analyze(config: &Config, bios_only: bool) -> Result<AnalysisOutcome> {
    let args = HpiaArgs::new(bios_only, config.softpaq_dir());
    let command = args
        .apply(ToolCommand::program(config.utility_path()))
        .working_dir(&config.workspace_root);

    tracing::info!(
        "Running HPIA analysis ({})",
        if bios_only { "BIOS only" } else { "BIOS and drivers" }
    );
    let outcome = command
        .run_checked(ANALYZE_POLICY)
        .context("HPIA analysis failed")?;

    Ok(AnalysisOutcome::from_code(outcome.code))
}

// ============================================
// DOWNLOADED PACKAGES
// ============================================

/// Everything HPIA left in the softpaq folder, except the install script.
/// An absent folder counts as empty.
pub fn downloaded_packages(softpaq_dir: &Path) -> Result<Vec<PathBuf>> {
    if !softpaq_dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let entries = fs::read_dir(softpaq_dir)
        .with_context(|| format!("Failed to list {}", softpaq_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", softpaq_dir.display()))?;
        if entry
            .file_name()
            .to_string_lossy()
            .eq_ignore_ascii_case(INSTALL_SCRIPT_NAME)
        {
            continue;
        }
        found.push(entry.path());
    }
    found.sort();
    Ok(found)
}

/// Does this look like a softpaq (sp12345.exe or its extracted sp12345 folder)?
fn is_softpaq(path: &Path) -> bool {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match stem.strip_prefix("sp") {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Distinct softpaq ids among `packages` (sp123.exe and folder sp123 count once).
pub fn softpaq_count(packages: &[PathBuf]) -> usize {
    let mut ids: Vec<String> = packages
        .iter()
        .filter(|p| is_softpaq(p))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_ascii_lowercase()))
        .collect();
    ids.sort();
    ids.dedup();
    ids.len()
}

/// Human-readable package names from the comment lines of InstallAll.cmd.
///
/// Only used for log lines. The script format isn't documented, so this
/// takes whatever follows `REM` or `::` and ignores everything else.
pub fn package_labels(script_text: &str) -> Vec<String> {
    script_text
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let upper = line.to_ascii_uppercase();
            if upper == "REM" || upper.starts_with("REM ") || upper.starts_with("@REM ") {
                let start = upper.find("REM").map(|i| i + 3).unwrap_or(0);
                Some(line[start..].trim())
            } else {
                line.strip_prefix("::").map(str::trim)
            }
        })
        .filter(|label| !label.is_empty() && !label.chars().all(|c| c == '-' || c == '='))
        .map(ToString::to_string)
        .collect()
}

// ============================================
// INSTALLATION
// ============================================

/// How the install step ended
#[derive(Debug, Clone, PartialEq)]
pub enum InstallOutcome {
    /// Softpaq folder was empty: nothing to install
    NoUpdates,
    /// Packages were downloaded but InstallAll.cmd wasn't generated
    ScriptMissing { packages: usize },
    /// InstallAll.cmd ran to completion
    Installed {
        labels: Vec<String>,
        reboot_required: bool,
    },
}

/// `cmd /c <softpaq dir>\InstallAll.cmd`, run from inside the softpaq folder
/// (the script refers to the softpaqs by relative path).
fn install_command(config: &Config) -> ToolCommand {
    ToolCommand::system("cmd")
        .flag("/c")
        .path(&config.install_script_path())
        .working_dir(config.softpaq_dir())
}

/// Run InstallAll.cmd if HPIA downloaded anything.
pub fn install_packages(config: &Config, log: &mut RunLog) -> Result<InstallOutcome> {
    let softpaq_dir = config.softpaq_dir();
    let packages = downloaded_packages(&softpaq_dir)?;

    if packages.is_empty() {
        log.append("No updates found")?;
        return Ok(InstallOutcome::NoUpdates);
    }

    let count = softpaq_count(&packages);
    tracing::info!("HPIA downloaded {} softpaq(s)", count);

    let script = config.install_script_path();
    if !script.is_file() {
        tracing::warn!(
            "{} not found although {} contains files, skipping installation",
            INSTALL_SCRIPT_NAME,
            softpaq_dir.display()
        );
        log.append(&format!(
            "{} missing, softpaq installation skipped",
            INSTALL_SCRIPT_NAME
        ))?;
        return Ok(InstallOutcome::ScriptMissing { packages: count });
    }

    // Read as lossy text: the script may not be valid UTF-8 (OEM code page)
    let bytes = fs::read(&script).with_context(|| format!("Failed to read {}", script.display()))?;
    let labels = package_labels(&String::from_utf8_lossy(&bytes));
    for label in &labels {
        log.append(&format!("Installing {}", label))?;
    }

    let outcome = install_command(config)
        .run_checked(INSTALL_POLICY)
        .context("Softpaq installation failed")?;

    let reboot_required = outcome.code == EXIT_REBOOT_REQUIRED;
    log.append(if reboot_required {
        "Softpaq installation completed, reboot required"
    } else {
        "Softpaq installation completed"
    })?;

    Ok(InstallOutcome::Installed {
        labels,
        reboot_required,
    })
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> Config {
        Config {
            workspace_root: root.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_analyze_arguments() {
        let full = HpiaArgs::new(false, PathBuf::from(r"C:\HPIA\Softpaqs"))
            .apply(ToolCommand::system("HPImageAssistant.exe"));
        assert_eq!(
            full.args(),
            [
                "/Operation:Analyze",
                "/Category:BIOS,Drivers",
                "/Selection:All",
                "/Action:Extract",
                "/Silent",
                r"/SoftpaqDownloadFolder:C:\HPIA\Softpaqs",
            ]
        );
        assert!(full.validate().is_ok());

        let bios = HpiaArgs::new(true, PathBuf::from(r"C:\HPIA\Softpaqs"))
            .apply(ToolCommand::system("HPImageAssistant.exe"));
        assert_eq!(bios.args()[1], "/Category:BIOS");
    }

    #[test]
    fn test_analysis_exit_codes() {
        assert!(ANALYZE_POLICY.accepts(0));
        assert!(ANALYZE_POLICY.accepts(256));
        assert!(ANALYZE_POLICY.accepts(257));
        assert!(ANALYZE_POLICY.accepts(3010));
        assert!(!ANALYZE_POLICY.accepts(4096));
        assert_eq!(AnalysisOutcome::from_code(256), AnalysisOutcome::NoRecommendations);
        assert_eq!(AnalysisOutcome::from_code(0), AnalysisOutcome::Completed);
    }

    #[test]
    fn test_package_labels() {
        let script = "@echo off\r\n\
            REM HP Notebook System BIOS Update (T37) 01.17.00 sp150123\r\n\
            start /wait sp150123\\HPFirmwareInstaller.exe -s\r\n\
            @REM Intel Wireless Driver 23.40.0 sp149876\r\n\
            :: Realtek Audio Driver sp148000\r\n\
            REM\r\n\
            REM ------------------\r\n\
            REMARK.exe /x\r\n";
        assert_eq!(
            package_labels(script),
            vec![
                "HP Notebook System BIOS Update (T37) 01.17.00 sp150123".to_string(),
                "Intel Wireless Driver 23.40.0 sp149876".to_string(),
                "Realtek Audio Driver sp148000".to_string(),
            ]
        );
    }

    #[test]
    fn test_install_script_runs_through_cmd() {
        let config = test_config(Path::new(r"C:\HPIA"));
        let cmd = install_command(&config);
        assert_eq!(cmd.display_name(), "cmd");
        assert_eq!(
            cmd.args(),
            ["/c".to_string(), config.install_script_path().to_string_lossy().to_string()]
        );
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_softpaq_count() {
        let packages = vec![
            PathBuf::from("sp150123.exe"),
            PathBuf::from("sp150123"),
            PathBuf::from("SP149876.exe"),
            PathBuf::from("spare.txt"),
            PathBuf::from("readme.html"),
        ];
        assert_eq!(softpaq_count(&packages), 2);
    }

    #[test]
    fn test_no_packages_logs_and_skips_install() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(config.softpaq_dir()).unwrap();
        let mut log = RunLog::open(&config.log_path()).unwrap();

        let outcome = install_packages(&config, &mut log).unwrap();

        assert_eq!(outcome, InstallOutcome::NoUpdates);
        let content = fs::read_to_string(config.log_path()).unwrap();
        assert!(content.starts_with("No updates found on: "));
    }

    #[test]
    fn test_missing_script_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(config.softpaq_dir()).unwrap();
        fs::write(config.softpaq_dir().join("sp150123.exe"), b"x").unwrap();
        let mut log = RunLog::open(&config.log_path()).unwrap();

        let outcome = install_packages(&config, &mut log).unwrap();

        assert_eq!(outcome, InstallOutcome::ScriptMissing { packages: 1 });
        let content = fs::read_to_string(config.log_path()).unwrap();
        assert!(content.contains("InstallAll.cmd missing"));
    }

    #[test]
    fn test_install_script_alone_means_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(config.softpaq_dir()).unwrap();
        fs::write(config.install_script_path(), b"@echo off\r\n").unwrap();

        assert!(downloaded_packages(&config.softpaq_dir()).unwrap().is_empty());
    }

    #[test]
    fn test_extract_fails_fast_when_installer_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let err = extract_installer(&config, &dir.path().join("hp-hpia.exe")).unwrap_err();
        assert!(err.to_string().contains("extraction failed"));
    }
}
