// ============================================
// winmaint - system_info.rs
// ============================================
// Facts about the host we need for the driver workflow:
//   - the hardware model string (HPIA names its reports after it)
//   - the current user's Downloads folder
// ============================================

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::process::{ExitPolicy, ToolCommand};

/// PowerShell one-liner that prints the model, e.g. "HP EliteBook 840 G8 Notebook PC".
const MODEL_QUERY: &str = "(Get-CimInstance -ClassName Win32_ComputerSystem | Select-Object -First 1).Model";

/// Build a `powershell -NoProfile -NonInteractive -Command <script>` command.
/// Scripts must stick to single quotes (see process.rs validation).
pub fn powershell(script: &str) -> ToolCommand {
    ToolCommand::system("powershell")
        .flag("-NoProfile")
        .flag("-NonInteractive")
        .flag("-ExecutionPolicy")
        .value("Bypass")
        .flag("-Command")
        .value(script)
        .capture_stdout()
        .hide_window()
}

/// The host's hardware model as reported by WMI.
pub fn host_model() -> Result<String> {
    let outcome = powershell(MODEL_QUERY)
        .run_checked(ExitPolicy::ZeroOnly)
        .context("Failed to query Win32_ComputerSystem")?;

    let model = parse_model(&outcome.stdout).context("Win32_ComputerSystem reported no model")?;
    tracing::info!("Host model: {}", model);
    Ok(model)
}

fn parse_model(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToString::to_string)
}

/// The current user's Downloads folder.
pub fn downloads_dir() -> Result<PathBuf> {
    dirs::download_dir().context("Could not locate the current user's Downloads folder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model() {
        assert_eq!(
            parse_model("\r\nHP EliteBook 840 G8 Notebook PC  \r\n").as_deref(),
            Some("HP EliteBook 840 G8 Notebook PC")
        );
        assert_eq!(parse_model("  \r\n"), None);
        assert_eq!(parse_model(""), None);
    }

    #[test]
    fn test_powershell_command_is_valid() {
        let cmd = powershell(MODEL_QUERY);
        assert!(cmd.validate().is_ok());
        assert_eq!(cmd.args().last().map(String::as_str), Some(MODEL_QUERY));
    }
}
