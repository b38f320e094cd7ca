// ============================================
// winmaint - config.rs
// ============================================
// Fixed paths and URLs used by the driver/BIOS workflow.
//
// Every value has a built-in default. To override any of them, drop a
// `winmaint.toml` NEXT TO winmaint.exe (or pass --config <path>):
//
//   workspace_root = 'D:\HPIA'
//   vendor_page_url = "https://ftp.ext.hp.com/pub/caps-softpaq/cmit/HPIA.html"
//   report_extensions = ["html", "json"]
//
// Keys that are missing fall back to the defaults below.
// ============================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================
// CONSTANTS
// ============================================

/// Settings file looked up next to the EXE.
pub const CONFIG_FILE_NAME: &str = "winmaint.toml";

/// HP's landing page that links to the latest HPIA installer.
const DEFAULT_VENDOR_PAGE_URL: &str = "https://ftp.ext.hp.com/pub/caps-softpaq/cmit/HPIA.html";

/// The executable the HPIA installer extracts.
pub const UTILITY_EXE_NAME: &str = "HPImageAssistant.exe";

/// Batch script HPIA writes into the softpaq folder in Extract mode.
pub const INSTALL_SCRIPT_NAME: &str = "InstallAll.cmd";

/// Name the downloaded installer is saved under inside the workspace.
const INSTALLER_FILE_NAME: &str = "hp-hpia.exe";

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ============================================
// CONFIG
// ============================================

/// Everything the driver workflow needs to know about where things live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the HPIA workspace. Cleared at start, mostly cleared at end.
    pub workspace_root: PathBuf,

    /// Folder name (under the root) HPIA downloads softpaqs into
    pub softpaq_dir_name: String,

    /// Folder name (under the root) reports are collected into.
    /// Survives cleanup.
    pub report_dir_name: String,

    /// Log file name (under the root). Opened in append mode, survives cleanup.
    pub log_file_name: String,

    /// Page scraped for the first `.exe` link
    pub vendor_page_url: String,

    /// Unrelated scratch folder HP installers leave behind (C:\SWSetup)
    pub system_temp_dir: PathBuf,

    /// Only report files with one of these extensions get relocated
    pub report_extensions: Vec<String>,

    /// Timeout for fetching the vendor page
    pub page_timeout_secs: u64,

    /// Timeout for downloading the installer
    pub download_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace_root: PathBuf::from(r"C:\HPIA"),
            softpaq_dir_name: "Softpaqs".to_string(),
            report_dir_name: "Reports".to_string(),
            log_file_name: "HPIA_Update.log".to_string(),
            vendor_page_url: DEFAULT_VENDOR_PAGE_URL.to_string(),
            system_temp_dir: PathBuf::from(r"C:\SWSetup"),
            report_extensions: vec![
                "html".to_string(),
                "json".to_string(),
                "xml".to_string(),
                "csv".to_string(),
            ],
            page_timeout_secs: 30,
            download_timeout_secs: 600,
        }
    }
}

impl Config {
    /// Load settings.
    ///
    /// Lookup order:
    /// 1. `explicit` path (from --config), which must exist
    /// 2. winmaint.toml next to the EXE, if present
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        if let Some(path) = explicit {
            return Config::from_file(path);
        }

        let beside_exe = get_app_directory().join(CONFIG_FILE_NAME);
        if beside_exe.exists() {
            return Config::from_file(&beside_exe);
        }

        tracing::debug!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
        Ok(Config::default())
    }

    /// Parse a settings file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    fn from_toml_str(content: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(content)
    }

    // ============================================
    // DERIVED PATHS
    // ============================================

    pub fn softpaq_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.softpaq_dir_name)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.report_dir_name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.workspace_root.join(&self.log_file_name)
    }

    pub fn installer_path(&self) -> PathBuf {
        self.workspace_root.join(INSTALLER_FILE_NAME)
    }

    pub fn utility_path(&self) -> PathBuf {
        self.workspace_root.join(UTILITY_EXE_NAME)
    }

    pub fn install_script_path(&self) -> PathBuf {
        self.softpaq_dir().join(INSTALL_SCRIPT_NAME)
    }

    /// Names directly under the workspace root that cleanup must not touch.
    pub fn preserved_names(&self) -> [&str; 2] {
        [self.log_file_name.as_str(), self.report_dir_name.as_str()]
    }
}

// ============================================
// PATH HELPERS
// ============================================

/// Get the directory where winmaint.exe is located.
///
/// Uses std::env::current_exe() so the settings file is found next to
/// the EXE even when started from a shortcut or another drive.
pub fn get_app_directory() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        let resolved = exe_path.canonicalize().unwrap_or(exe_path);
        if let Some(parent) = resolved.parent() {
            // Strip \\?\ prefix that canonicalize adds on Windows
            let parent_str = parent.to_string_lossy();
            if let Some(stripped) = parent_str.strip_prefix(r"\\?\") {
                return PathBuf::from(stripped);
            }
            return parent.to_path_buf();
        }
    }
    tracing::warn!("Could not determine EXE directory, using current directory");
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = Config::default();
        assert_eq!(config.softpaq_dir(), PathBuf::from(r"C:\HPIA").join("Softpaqs"));
        assert_eq!(config.report_dir(), PathBuf::from(r"C:\HPIA").join("Reports"));
        assert_eq!(config.log_path(), PathBuf::from(r"C:\HPIA").join("HPIA_Update.log"));
        assert_eq!(
            config.install_script_path(),
            PathBuf::from(r"C:\HPIA").join("Softpaqs").join("InstallAll.cmd")
        );
        assert_eq!(config.preserved_names(), ["HPIA_Update.log", "Reports"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            workspace_root = 'D:\Work'
            report_extensions = ["html"]
            "#,
        )
        .unwrap();

        assert_eq!(config.workspace_root, PathBuf::from(r"D:\Work"));
        assert_eq!(config.report_extensions, vec!["html".to_string()]);
        // Untouched keys keep their defaults
        assert_eq!(config.softpaq_dir_name, "Softpaqs");
        assert_eq!(config.vendor_page_url, DEFAULT_VENDOR_PAGE_URL);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "workspace_root = [1, 2").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
