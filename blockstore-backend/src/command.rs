//! External command adapter.
//!
//! Every interaction with the volume-management tools goes through a
//! [`CommandRunner`]: argv in, exit code and stdout out. The system runner
//! spawns real processes with a fixed `C` locale so numeric output parses
//! the same everywhere; tests plug in [`MockTool`](crate::mock::MockTool).

use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{BackendError, Result};
use crate::types::BackendKind;

/// Locale forced onto every child process.
pub const TOOL_LOCALE: &str = "C";

/// Outcome of a command that was launched successfully.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `-1` when the child was killed by a signal
    pub status: i32,
    /// Captured stdout (empty when output was not captured)
    pub stdout: String,
}

impl CommandOutput {
    pub fn new(status: i32, stdout: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
        }
    }
    
    /// Whether the tool reported success.
    pub fn success(&self) -> bool {
        self.status == 0
    }
    
    /// First stdout line with surrounding whitespace removed.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().next().map(str::trim)
    }
}

/// Seam between the backends and process execution.
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion.
    ///
    /// `Err` means the executable could not be started; a non-zero exit code
    /// is a normal `Ok` outcome for the caller to inspect.
    fn run(&self, argv: &[String], capture_output: bool) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes of this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], capture_output: bool) -> std::io::Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
        })?;
        
        let mut command = Command::new(program);
        command
            .args(args)
            .env("LC_ALL", TOOL_LOCALE)
            .env("LANG", TOOL_LOCALE)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        command.stdout(if capture_output { Stdio::piped() } else { Stdio::null() });
        
        let output = command.output()?;
        let status = output.status.code().unwrap_or(-1);
        
        if status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(command = %program, status, stderr = %stderr.trim(), "Command exited non-zero");
        }
        
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

/// A runner bound to one backend, translating launch failures into
/// [`BackendError::Launch`] and logging every invocation.
#[derive(Clone)]
pub struct Tool {
    runner: Arc<dyn CommandRunner>,
    backend: BackendKind,
}

impl Tool {
    pub fn new(runner: Arc<dyn CommandRunner>, backend: BackendKind) -> Self {
        Self { runner, backend }
    }
    
    /// Backend this tool handle belongs to.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }
    
    /// Run a command and capture its output.
    pub fn exec(&self, argv: &[String]) -> Result<CommandOutput> {
        self.exec_with(argv, true)
    }
    
    /// Run a command, optionally capturing its output.
    pub fn exec_with(&self, argv: &[String], capture_output: bool) -> Result<CommandOutput> {
        debug!(backend = %self.backend, command = ?argv, "Executing command");
        
        self.runner
            .run(argv, capture_output)
            .map_err(|source| {
                let command = argv.first().cloned().unwrap_or_default();
                warn!(backend = %self.backend, command = %command, error = %source, "Command could not be launched");
                BackendError::Launch { command, source }
            })
    }
    
    /// Run a command that must exit with status zero.
    pub fn exec_checked(&self, argv: &[String]) -> Result<CommandOutput> {
        let output = self.exec(argv)?;
        if !output.success() {
            return Err(BackendError::OperationFailed(format!(
                "{} exited with status {}",
                argv.join(" "),
                output.status
            )));
        }
        Ok(output)
    }
}

/// Build an argv vector from string-like parts.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    
    fn sh(script: &str) -> Vec<String> {
        argv(["/bin/sh", "-c", script])
    }
    
    #[test]
    fn test_system_runner_exit_code_and_first_line() {
        let out = SystemRunner.run(&sh("echo '  first  '; echo second; exit 3"), true).unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.first_line(), Some("first"));
        assert!(!out.success());
    }
    
    #[test]
    fn test_system_runner_forces_locale() {
        let out = SystemRunner.run(&sh("echo \"$LC_ALL:$LANG\""), true).unwrap();
        assert!(out.success());
        assert_eq!(out.first_line(), Some("C:C"));
    }
    
    #[test]
    fn test_system_runner_without_capture() {
        let out = SystemRunner.run(&sh("echo hidden"), false).unwrap();
        assert!(out.success());
        assert_eq!(out.first_line(), None);
    }
    
    #[test]
    fn test_launch_failure_is_distinct_from_exit_code() {
        let missing = argv(["/nonexistent/blockstore/lvs"]);
        assert!(SystemRunner.run(&missing, true).is_err());
        
        let tool = Tool::new(Arc::new(SystemRunner), BackendKind::Lvm);
        match tool.exec(&missing) {
            Err(BackendError::Launch { command, .. }) => assert_eq!(command, "/nonexistent/blockstore/lvs"),
            other => panic!("expected launch error, got {:?}", other),
        }
        
        match tool.exec_checked(&sh("exit 5")) {
            Err(BackendError::OperationFailed(msg)) => assert!(msg.contains("status 5")),
            other => panic!("expected operation failure, got {:?}", other),
        }
    }
    
    #[test]
    fn test_empty_argv_is_launch_failure() {
        assert!(SystemRunner.run(&[], true).is_err());
    }
}
