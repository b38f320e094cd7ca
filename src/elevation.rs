// ============================================
// winmaint - elevation.rs
// ============================================
// Admin rights as a value instead of a global check.
//
// `Elevated` can only be built by `Elevated::acquire()`, and only when the
// process really runs elevated. The driver workflow takes `&Elevated`, so
// code that never got the token cannot reach any download, process or
// file deletion.
// ============================================

use thiserror::Error;

/// Returned when the process is not running as administrator.
#[derive(Debug, Error)]
#[error("winmaint must be run as administrator (right-click > Run as administrator)")]
pub struct NotElevated;

/// Proof that the current process has admin rights.
#[derive(Debug)]
pub struct Elevated {
    _private: (),
}

impl Elevated {
    /// Check the current process token.
    pub fn acquire() -> Result<Elevated, NotElevated> {
        Elevated::from_probe(is_process_elevated())
    }

    fn from_probe(is_elevated: bool) -> Result<Elevated, NotElevated> {
        if is_elevated {
            Ok(Elevated { _private: () })
        } else {
            Err(NotElevated)
        }
    }

    /// Token for unit tests that exercise elevated-only code paths.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Elevated {
        Elevated { _private: () }
    }
}

#[cfg(windows)]
fn is_process_elevated() -> bool {
    // IsUserAnAdmin returns TRUE only for an elevated token when UAC is on
    unsafe { winapi::um::shlobj::IsUserAnAdmin() != 0 }
}

#[cfg(not(windows))]
fn is_process_elevated() -> bool {
    // Effective uid 0 is the closest equivalent off Windows
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "0")
        .unwrap_or(false)
}
