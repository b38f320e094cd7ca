// ============================================
// winmaint - windows_update.rs
// ============================================
// Windows Update through the PSWindowsUpdate PowerShell module:
//
//   check    -> Get-WindowsUpdate
//   install  -> Install-WindowsUpdate -AcceptAll -IgnoreReboot
//   reboot?  -> read RebootRequired from the install results, ask the user
//
// The reboot flag is taken from the results of the one install call.
// Install-WindowsUpdate is never run a second time just to ask about
// reboots.
//
// PowerShell output is requested as JSON (ConvertTo-Json) so we don't
// have to scrape formatted tables.
// ============================================

use serde_json::Value;
use std::io::{self, BufRead, Write};
use thiserror::Error;

use crate::process::{ExitPolicy, ProcessError, ToolCommand};
use crate::system_info::powershell;

/// Exit code our module check script uses for "PSWindowsUpdate not installed"
const EXIT_MODULE_MISSING: i32 = 3;

const MODULE_CHECK_SCRIPT: &str = "if (-not (Get-Module -ListAvailable -Name PSWindowsUpdate)) { exit 3 }; \
     Import-Module PSWindowsUpdate -ErrorAction Stop";

const CHECK_SCRIPT: &str = "Import-Module PSWindowsUpdate -ErrorAction Stop; \
     ConvertTo-Json -Compress -Depth 3 -InputObject @(Get-WindowsUpdate -MicrosoftUpdate | \
     Select-Object KB, Title, Size)";

const INSTALL_SCRIPT: &str = "Import-Module PSWindowsUpdate -ErrorAction Stop; \
     ConvertTo-Json -Compress -Depth 3 -InputObject @(Install-WindowsUpdate -MicrosoftUpdate -AcceptAll -IgnoreReboot | \
     Select-Object KB, Title, Result, RebootRequired)";

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Error)]
pub enum WindowsUpdateError {
    #[error("the PSWindowsUpdate module is not installed (Install-Module PSWindowsUpdate)")]
    ModuleMissing,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("could not parse PowerShell output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reboot prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

// ============================================
// DATA STRUCTURES
// ============================================

/// An update that Get-WindowsUpdate reported as available
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub kb: Option<String>,
    pub title: String,
    pub size: Option<String>,
}

/// One line of Install-WindowsUpdate's results
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRecord {
    pub kb: Option<String>,
    pub title: String,
    /// "Installed", "Failed", "Downloaded", ...
    pub result: String,
    pub reboot_required: bool,
}

impl InstallRecord {
    pub fn failed(&self) -> bool {
        self.result.eq_ignore_ascii_case("failed")
    }
}

/// Results of the single install call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstallReport {
    pub records: Vec<InstallRecord>,
    pub reboot_required: bool,
}

impl InstallReport {
    fn from_records(records: Vec<InstallRecord>) -> Self {
        let reboot_required = records.iter().any(|r| r.reboot_required);
        InstallReport {
            records,
            reboot_required,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsUpdateOptions {
    /// Never ask about rebooting (for unattended runs)
    pub no_reboot_prompt: bool,
}

/// How the whole OS update run ended
#[derive(Debug, Clone, PartialEq)]
pub enum WindowsUpdateOutcome {
    UpToDate,
    Installed {
        report: InstallReport,
        rebooting: bool,
    },
}

// ============================================
// POWERSHELL CALLS
// ============================================

/// Make sure PSWindowsUpdate can be imported.
pub fn ensure_module() -> Result<(), WindowsUpdateError> {
    let outcome = powershell(MODULE_CHECK_SCRIPT).run()?;
    match outcome.code {
        0 => Ok(()),
        EXIT_MODULE_MISSING => Err(WindowsUpdateError::ModuleMissing),
        code => Err(ProcessError::ExitCode {
            program: "powershell".to_string(),
            code,
        }
        .into()),
    }
}

/// List available updates.
pub fn check() -> Result<Vec<UpdateEntry>, WindowsUpdateError> {
    tracing::info!("Checking for Windows updates...");
    let outcome = powershell(CHECK_SCRIPT).run_checked(ExitPolicy::ZeroOnly)?;
    let updates = parse_records(&outcome.stdout)?
        .iter()
        .map(update_entry)
        .collect::<Vec<_>>();
    Ok(updates)
}

/// Install everything available. The reboot flag comes from these results.
pub fn install_all() -> Result<InstallReport, WindowsUpdateError> {
    tracing::info!("Installing Windows updates...");
    let outcome = powershell(INSTALL_SCRIPT).run_checked(ExitPolicy::ZeroOnly)?;
    let records = parse_records(&outcome.stdout)?
        .iter()
        .map(install_record)
        .collect::<Vec<_>>();
    Ok(InstallReport::from_records(records))
}

/// Restart the machine in 5 seconds.
pub fn reboot() -> Result<(), WindowsUpdateError> {
    tracing::info!("Rebooting in 5 seconds...");
    ToolCommand::system("shutdown")
        .flag("/r")
        .flag("/t")
        .value("5")
        .flag("/c")
        .value("winmaint: Windows updates installed, rebooting...")
        .run_checked(ExitPolicy::ZeroOnly)?;
    Ok(())
}

// ============================================
// JSON PARSING
// ============================================

/// ConvertTo-Json output -> list of objects.
/// Accepts empty output, `null`, a single object, or an array.
fn parse_records(stdout: &str) -> Result<Vec<Value>, serde_json::Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(match serde_json::from_str::<Value>(trimmed)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn update_entry(value: &Value) -> UpdateEntry {
    UpdateEntry {
        kb: string_field(value, "KB"),
        title: string_field(value, "Title").unwrap_or_default(),
        size: string_field(value, "Size"),
    }
}

fn install_record(value: &Value) -> InstallRecord {
    let reboot_required = match value.get("RebootRequired") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    InstallRecord {
        kb: string_field(value, "KB"),
        title: string_field(value, "Title").unwrap_or_default(),
        result: string_field(value, "Result").unwrap_or_default(),
        reboot_required,
    }
}

// ============================================
// REBOOT PROMPT
// ============================================

/// Ask whether to reboot now. Anything but y/yes means no.
pub fn prompt_reboot(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(
        output,
        "A reboot is required to finish installing updates. Reboot now? [y/N]: "
    )?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

// ============================================
// WORKFLOW
// ============================================

/// The outside world the workflow talks to: PowerShell, the console and
/// shutdown.exe on a real machine.
pub trait UpdateBackend {
    fn ensure_module(&mut self) -> Result<(), WindowsUpdateError>;
    fn check(&mut self) -> Result<Vec<UpdateEntry>, WindowsUpdateError>;
    fn install_all(&mut self) -> Result<InstallReport, WindowsUpdateError>;
    fn prompt_reboot(&mut self) -> Result<bool, WindowsUpdateError>;
    fn reboot(&mut self) -> Result<(), WindowsUpdateError>;
}

/// PSWindowsUpdate plus a y/N question on stdin/stdout.
pub struct PsWindowsUpdate;

impl UpdateBackend for PsWindowsUpdate {
    fn ensure_module(&mut self) -> Result<(), WindowsUpdateError> {
        ensure_module()
    }

    fn check(&mut self) -> Result<Vec<UpdateEntry>, WindowsUpdateError> {
        check()
    }

    fn install_all(&mut self) -> Result<InstallReport, WindowsUpdateError> {
        install_all()
    }

    fn prompt_reboot(&mut self) -> Result<bool, WindowsUpdateError> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        prompt_reboot(&mut input, &mut output).map_err(WindowsUpdateError::Prompt)
    }

    fn reboot(&mut self) -> Result<(), WindowsUpdateError> {
        reboot()
    }
}

/// check -> install all -> reboot prompt, against the real machine.
pub fn run(options: WindowsUpdateOptions) -> Result<WindowsUpdateOutcome, WindowsUpdateError> {
    run_with(&mut PsWindowsUpdate, options)
}

pub fn run_with(
    backend: &mut impl UpdateBackend,
    options: WindowsUpdateOptions,
) -> Result<WindowsUpdateOutcome, WindowsUpdateError> {
    backend.ensure_module()?;

    let available = backend.check()?;
    if available.is_empty() {
        tracing::info!("No Windows updates available");
        return Ok(WindowsUpdateOutcome::UpToDate);
    }
    for update in &available {
        tracing::info!(
            "Available: {} {}{}",
            update.kb.as_deref().unwrap_or("-"),
            update.title,
            update.size.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default()
        );
    }

    let report = backend.install_all()?;
    for record in &report.records {
        if record.failed() {
            tracing::warn!("Failed: {} {}", record.kb.as_deref().unwrap_or("-"), record.title);
        } else {
            tracing::info!(
                "{}: {} {}",
                record.result,
                record.kb.as_deref().unwrap_or("-"),
                record.title
            );
        }
    }

    let rebooting = if !report.reboot_required {
        false
    } else if options.no_reboot_prompt {
        tracing::warn!("A reboot is required to finish installing updates");
        false
    } else {
        backend.prompt_reboot()?
    };

    if rebooting {
        backend.reboot()?;
    }

    Ok(WindowsUpdateOutcome::Installed { report, rebooting })
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scripts_pass_argument_validation() {
        for script in [MODULE_CHECK_SCRIPT, CHECK_SCRIPT, INSTALL_SCRIPT] {
            assert!(powershell(script).validate().is_ok(), "{}", script);
        }
    }

    #[test]
    fn test_parse_records_shapes() {
        assert!(parse_records("").unwrap().is_empty());
        assert!(parse_records("null").unwrap().is_empty());
        assert!(parse_records("[]").unwrap().is_empty());
        assert_eq!(parse_records(r#"{"KB":"KB5031356"}"#).unwrap().len(), 1);
        assert!(parse_records("not json").is_err());
    }

    #[test]
    fn test_update_entries() {
        let json = r#"[{"KB":"KB5031356","Title":"2026-10 Cumulative Update","Size":"812MB"},
                       {"KB":null,"Title":"Intel - Display - 31.0.101.4502","Size":12345}]"#;
        let entries: Vec<UpdateEntry> = parse_records(json).unwrap().iter().map(update_entry).collect();
        assert_eq!(
            entries[0],
            UpdateEntry {
                kb: Some("KB5031356".to_string()),
                title: "2026-10 Cumulative Update".to_string(),
                size: Some("812MB".to_string()),
            }
        );
        assert_eq!(entries[1].kb, None);
        assert_eq!(entries[1].size.as_deref(), Some("12345"));
    }

    #[test]
    fn test_reboot_flag_comes_from_install_results() {
        let json = r#"[{"KB":"KB1","Title":"A","Result":"Installed","RebootRequired":false},
                       {"KB":"KB2","Title":"B","Result":"Installed","RebootRequired":true},
                       {"KB":"KB3","Title":"C","Result":"Failed","RebootRequired":"False"}]"#;
        let records: Vec<InstallRecord> = parse_records(json).unwrap().iter().map(install_record).collect();
        assert!(records[2].failed());

        let report = InstallReport::from_records(records);
        assert!(report.reboot_required);

        let quiet = InstallReport::from_records(vec![InstallRecord {
            kb: None,
            title: "A".to_string(),
            result: "Installed".to_string(),
            reboot_required: false,
        }]);
        assert!(!quiet.reboot_required);
    }

    #[test]
    fn test_prompt_reboot_answers() {
        for (answer, expected) in [("y\n", true), ("YES\r\n", true), ("n\n", false), ("\n", false), ("", false)] {
            let mut input = Cursor::new(answer.as_bytes());
            let mut output = Vec::new();
            assert_eq!(prompt_reboot(&mut input, &mut output).unwrap(), expected, "{:?}", answer);
            assert!(String::from_utf8(output).unwrap().contains("Reboot now? [y/N]"));
        }
    }

    /// Canned answers, and a count of what the workflow asked for
    #[derive(Default)]
    struct FakeBackend {
        available: Vec<UpdateEntry>,
        records: Vec<InstallRecord>,
        answer: bool,
        installs: usize,
        prompts: usize,
        reboots: usize,
    }

    impl UpdateBackend for FakeBackend {
        fn ensure_module(&mut self) -> Result<(), WindowsUpdateError> {
            Ok(())
        }

        fn check(&mut self) -> Result<Vec<UpdateEntry>, WindowsUpdateError> {
            Ok(self.available.clone())
        }

        fn install_all(&mut self) -> Result<InstallReport, WindowsUpdateError> {
            self.installs += 1;
            Ok(InstallReport::from_records(self.records.clone()))
        }

        fn prompt_reboot(&mut self) -> Result<bool, WindowsUpdateError> {
            self.prompts += 1;
            Ok(self.answer)
        }

        fn reboot(&mut self) -> Result<(), WindowsUpdateError> {
            self.reboots += 1;
            Ok(())
        }
    }

    fn entry(kb: &str) -> UpdateEntry {
        UpdateEntry {
            kb: Some(kb.to_string()),
            title: format!("Update {}", kb),
            size: None,
        }
    }

    fn record(kb: &str, reboot_required: bool) -> InstallRecord {
        InstallRecord {
            kb: Some(kb.to_string()),
            title: format!("Update {}", kb),
            result: "Installed".to_string(),
            reboot_required,
        }
    }

    #[test]
    fn test_up_to_date_skips_install() {
        let mut backend = FakeBackend::default();
        let outcome = run_with(&mut backend, WindowsUpdateOptions::default()).unwrap();
        assert_eq!(outcome, WindowsUpdateOutcome::UpToDate);
        assert_eq!(backend.installs, 0);
        assert_eq!(backend.prompts, 0);
        assert_eq!(backend.reboots, 0);
    }

    #[test]
    fn test_install_runs_once_and_its_records_decide_reboot() {
        // One record needs a reboot, the user says yes
        let mut backend = FakeBackend {
            available: vec![entry("KB1"), entry("KB2")],
            records: vec![record("KB1", false), record("KB2", true)],
            answer: true,
            ..FakeBackend::default()
        };
        let outcome = run_with(&mut backend, WindowsUpdateOptions::default()).unwrap();
        assert_eq!(backend.installs, 1);
        assert_eq!(backend.prompts, 1);
        assert_eq!(backend.reboots, 1);
        match outcome {
            WindowsUpdateOutcome::Installed { report, rebooting } => {
                assert!(report.reboot_required);
                assert_eq!(report.records.len(), 2);
                assert!(rebooting);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // No record needs a reboot: no question, no reboot
        let mut backend = FakeBackend {
            available: vec![entry("KB1")],
            records: vec![record("KB1", false)],
            answer: true,
            ..FakeBackend::default()
        };
        let outcome = run_with(&mut backend, WindowsUpdateOptions::default()).unwrap();
        assert_eq!(backend.installs, 1);
        assert_eq!(backend.prompts, 0);
        assert_eq!(backend.reboots, 0);
        assert!(matches!(
            outcome,
            WindowsUpdateOutcome::Installed { rebooting: false, .. }
        ));
    }

    #[test]
    fn test_declined_reboot_is_not_performed() {
        let mut backend = FakeBackend {
            available: vec![entry("KB1")],
            records: vec![record("KB1", true)],
            answer: false,
            ..FakeBackend::default()
        };
        let outcome = run_with(&mut backend, WindowsUpdateOptions::default()).unwrap();
        assert_eq!(backend.prompts, 1);
        assert_eq!(backend.reboots, 0);
        assert!(matches!(
            outcome,
            WindowsUpdateOutcome::Installed { rebooting: false, .. }
        ));
    }

    #[test]
    fn test_no_reboot_prompt_never_asks() {
        let mut backend = FakeBackend {
            available: vec![entry("KB1")],
            records: vec![record("KB1", true)],
            answer: true,
            ..FakeBackend::default()
        };
        let outcome = run_with(&mut backend, WindowsUpdateOptions { no_reboot_prompt: true }).unwrap();
        assert_eq!(backend.installs, 1);
        assert_eq!(backend.prompts, 0);
        assert_eq!(backend.reboots, 0);
        match outcome {
            WindowsUpdateOutcome::Installed { report, rebooting } => {
                assert!(report.reboot_required);
                assert!(!rebooting);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
