// ============================================
// winmaint - process.rs
// ============================================
// Typed wrapper around std::process::Command for the external tools we
// drive (HPIA installer, HPImageAssistant.exe, InstallAll.cmd,
// powershell, shutdown).
//
// Arguments are collected as a list, then validated BEFORE anything is
// spawned:
//   - a program given as a path must exist
//   - argument values must not be empty
//   - arguments must not contain quotes or line breaks (Windows tools
//     parse their own command line, so those would change its meaning)
//
// Every run waits for the child to exit. There is no timeout: a child
// that hangs blocks the workflow until the operator interrupts it.
// ============================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0} not found")]
    MissingProgram(PathBuf),

    #[error("invalid argument for {program}: {reason} ({arg:?})")]
    InvalidArgument {
        program: String,
        arg: String,
        reason: &'static str,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}")]
    ExitCode { program: String, code: i32 },

    #[error("{program} was terminated without an exit code")]
    NoExitCode { program: String },
}

// ============================================
// EXIT POLICY
// ============================================

/// Which exit codes count as success for a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitPolicy {
    /// Only 0 is success
    ZeroOnly,
    /// 0 plus the listed codes are success
    Accept(&'static [i32]),
}

impl ExitPolicy {
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            ExitPolicy::ZeroOnly => code == 0,
            ExitPolicy::Accept(codes) => code == 0 || codes.contains(&code),
        }
    }
}

/// What a finished child process left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub code: i32,
    /// Captured stdout, only when the command was built with `capture_stdout`
    pub stdout: String,
}

// ============================================
// COMMAND BUILDER
// ============================================

/// How the program is located.
#[derive(Debug, Clone)]
enum Program {
    /// A file we put somewhere ourselves (must exist)
    Path(PathBuf),
    /// A system tool resolved through PATH (powershell, shutdown, cmd)
    System(&'static str),
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Program::Path(p) => write!(f, "{}", p.display()),
            Program::System(name) => write!(f, "{}", name),
        }
    }
}

/// An external command, built up argument by argument.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: Program,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    capture_stdout: bool,
    hide_window: bool,
}

impl ToolCommand {
    /// A program file at a known location.
    pub fn program(path: impl Into<PathBuf>) -> Self {
        ToolCommand::with(Program::Path(path.into()))
    }

    /// A system tool found through PATH.
    pub fn system(name: &'static str) -> Self {
        ToolCommand::with(Program::System(name))
    }

    fn with(program: Program) -> Self {
        ToolCommand {
            program,
            args: Vec::new(),
            working_dir: None,
            capture_stdout: false,
            hide_window: false,
        }
    }

    /// A bare switch like `/s` or `-NoProfile`.
    pub fn flag(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    /// A switch with a value, joined with `sep`: `/Category:BIOS`.
    pub fn option(mut self, name: &str, sep: char, value: &str) -> Self {
        self.args.push(format!("{}{}{}", name, sep, value));
        self
    }

    /// A standalone value (a path, a script block).
    pub fn value(mut self, value: impl AsRef<str>) -> Self {
        self.args.push(value.as_ref().to_string());
        self
    }

    /// A path argument.
    pub fn path(self, path: &Path) -> Self {
        let value = path.to_string_lossy().to_string();
        self.value(value)
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Collect stdout into `ProcessOutcome::stdout` instead of inheriting it.
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Don't flash a console window for this child (Windows only).
    pub fn hide_window(mut self) -> Self {
        self.hide_window = true;
        self
    }

    #[cfg(test)]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn display_name(&self) -> String {
        match &self.program {
            Program::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| p.display().to_string()),
            Program::System(name) => name.to_string(),
        }
    }

    // ============================================
    // VALIDATION
    // ============================================

    /// Check the command before spawning it.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if let Program::Path(path) = &self.program {
            if !path.is_file() {
                return Err(ProcessError::MissingProgram(path.clone()));
            }
        }

        for arg in &self.args {
            let reason = if arg.trim().is_empty() {
                Some("empty argument")
            } else if arg.ends_with(':') || arg.ends_with('=') {
                Some("switch without a value")
            } else if arg.contains('"') {
                Some("embedded quote")
            } else if arg.contains('\n') || arg.contains('\r') {
                Some("embedded line break")
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(ProcessError::InvalidArgument {
                    program: self.display_name(),
                    arg: arg.clone(),
                    reason,
                });
            }
        }

        Ok(())
    }

    // ============================================
    // EXECUTION
    // ============================================

    /// Validate, spawn, and wait for the child to exit.
    /// The exit code is returned as-is; use `run_checked` to apply a policy.
    pub fn run(&self) -> Result<ProcessOutcome, ProcessError> {
        self.validate()?;

        let program = self.display_name();
        tracing::debug!("Running: {} {}", self.program, self.args.join(" "));

        let mut command = self.to_command();
        let (status, stdout) = if self.capture_stdout {
            let output = command.output().map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;
            (output.status, String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let status = command.status().map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;
            (status, String::new())
        };

        let code = exit_code(&program, status)?;
        tracing::debug!("{} exit code: {}", program, code);
        Ok(ProcessOutcome { code, stdout })
    }

    /// Run, then turn an exit code outside `policy` into an error.
    pub fn run_checked(&self, policy: ExitPolicy) -> Result<ProcessOutcome, ProcessError> {
        let outcome = self.run()?;
        if !policy.accepts(outcome.code) {
            return Err(ProcessError::ExitCode {
                program: self.display_name(),
                code: outcome.code,
            });
        }
        Ok(outcome)
    }

    fn to_command(&self) -> Command {
        let mut command = match &self.program {
            Program::Path(p) => Command::new(p),
            Program::System(name) => Command::new(name),
        };
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        #[cfg(windows)]
        if self.hide_window {
            // CREATE_NO_WINDOW
            command.creation_flags(0x0800_0000);
        }
        #[cfg(not(windows))]
        let _ = self.hide_window;

        command
    }
}

fn exit_code(program: &str, status: ExitStatus) -> Result<i32, ProcessError> {
    status.code().ok_or_else(|| ProcessError::NoExitCode {
        program: program.to_string(),
    })
}

// ============================================
// TESTS
// ============================================
