// ============================================
// winmaint - runlog.rs
// ============================================
// The plain-text log that lives in the workspace root and survives
// cleanup. One line per status message:
//
//   HPIA analysis completed on: 2026-10-19T14:03:22
//
// Messages are also sent to tracing so they show on the console.
// ============================================

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Timestamp layout used in every log line
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Append-only status log
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open (or create) the log file in append mode.
    /// The parent folder must already exist.
    pub fn open(path: &Path) -> io::Result<RunLog> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RunLog {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `<message> on: <timestamp>` and flush immediately, so the
    /// line is on disk even if the next step hangs or the process is killed.
    pub fn append(&mut self, message: &str) -> io::Result<()> {
        tracing::info!("{}", message);
        let line = format_line(message, &Local::now().format(TIMESTAMP_FORMAT).to_string());
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }

    /// Like `append`, but a write failure only produces a warning.
    /// Used when recording a failure that is already being propagated.
    pub fn append_best_effort(&mut self, message: &str) {
        if let Err(e) = self.append(message) {
            tracing::warn!("Could not write to {}: {}", self.path.display(), e);
        }
    }
}

fn format_line(message: &str, timestamp: &str) -> String {
    format!("{} on: {}\r\n", message, timestamp)
}
