use crate::error::{Error, Result};
use std::path::Path;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Whichever stream has content, for error messages.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Executes external commands on behalf of the pipeline.
///
/// Spawn failure is an error; a non-zero exit status is a value the
/// caller interprets.
pub trait CommandRunner {
    /// Run a command to completion, inheriting stdio. Returns the exit code.
    fn run(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<i32>;

    /// Run a command to completion, capturing its output.
    fn capture(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput>;
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> std::process::Command {
        let mut cmd = std::process::Command::new(command);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<i32> {
        let status = self
            .command(command, args, cwd)
            .status()
            .map_err(|e| Error::CommandSpawn {
                command: command.to_string(),
                source: e,
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    fn capture(&self, command: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput> {
        let output = self
            .command(command, args, cwd)
            .output()
            .map_err(|e| Error::CommandSpawn {
                command: command.to_string(),
                source: e,
            })?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_is_an_error_not_an_exit_code() {
        let runner = ProcessRunner;
        let err = runner
            .run("definitely-not-a-real-binary-5a2f", &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn capture_returns_exit_code_and_output() {
        let runner = ProcessRunner;
        let out = runner.capture("sh", &["-c", "echo hi; exit 3"], None).unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert!(!out.success());
    }
}
