// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Shared subprocess plumbing: spawn external tools, capture output, enforce timeouts.

use std::ffi::OsStr;
use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Default timeout for external commands (30 seconds).
pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur when running external commands.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command timed out after {timeout:?}: {command}")]
    CommandTimeout {
        command: String,
        timeout: Duration,
    },
    #[error("Command exited with status {code}: {command}")]
    NonZeroExit { command: String, code: i32 },
    #[error("Command produced non-UTF-8 output: {command}")]
    OutputNotUtf8 { command: String },
}

/// Wait for a child process to complete with a timeout.
///
/// Uses platform-specific APIs (SIGCHLD on Unix) to wait for the process
/// without polling. If the timeout is reached, the process is killed.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    command: &str,
) -> ProcessResult<ExitStatus> {
    if let Some(status) = child
        .wait_timeout(timeout)
        .map_err(|e| ProcessError::CommandFailed {
            command: command.to_string(),
            source: e,
        })?
    {
        if status.code().is_some() {
            Ok(status)
        } else if let Some(signal) = status.signal() {
            Err(ProcessError::CommandFailed {
                command: command.to_string(),
                source: std::io::Error::other(format!("Process terminated by signal: {signal}")),
            })
        } else {
            Err(ProcessError::CommandFailed {
                command: command.to_string(),
                source: std::io::Error::other("Unknown process termination"),
            })
        }
    } else {
        // Timeout has been reached - kill the process
        let _ = child.kill();
        let _ = child.wait();
        Err(ProcessError::CommandTimeout {
            command: command.to_string(),
            timeout,
        })
    }
}

fn spawn(
    command: &str,
    args: &[&OsStr],
    cwd: Option<&Path>,
    stdout: Stdio,
) -> ProcessResult<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args).stdout(stdout);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound {
                command: command.to_string(),
            }
        } else {
            ProcessError::CommandFailed {
                command: command.to_string(),
                source: e,
            }
        }
    })
}

fn check_status(status: ExitStatus, command: &str) -> ProcessResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::NonZeroExit {
            command: command.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

/// Run a command to completion, discarding stdout, failing on non-zero exit.
pub(crate) fn run_checked(command: &str, args: &[&OsStr], cwd: Option<&Path>) -> ProcessResult<()> {
    let mut child = spawn(command, args, cwd, Stdio::null())?;
    let status = wait_with_timeout(&mut child, DEFAULT_COMMAND_TIMEOUT, command)?;
    check_status(status, command)
}

/// Run a command to completion and return its stdout as lines.
pub(crate) fn run_capture_lines(command: &str, args: &[&OsStr]) -> ProcessResult<Vec<String>> {
    let mut child = spawn(command, args, None, Stdio::piped())?;

    // Reading to EOF blocks until the child closes stdout, normally at exit,
    // so the timeout below only guards collecting the final exit status.
    let mut stdout = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        if pipe.read_to_string(&mut stdout).is_err() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::OutputNotUtf8 {
                command: command.to_string(),
            });
        }
    }

    let status = wait_with_timeout(&mut child, DEFAULT_COMMAND_TIMEOUT, command)?;
    check_status(status, command)?;
    Ok(stdout.lines().map(std::string::ToString::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_checked_missing_command() {
        let result = run_checked("definitely-not-a-command-xyz", &[], None);
        assert!(matches!(
            result,
            Err(ProcessError::CommandNotFound { .. })
        ));
    }

    #[test]
    fn test_run_capture_lines() {
        let lines =
            run_capture_lines("echo", &[OsStr::new("one"), OsStr::new("two")]).unwrap();
        assert_eq!(lines, vec!["one two"]);
    }

    #[test]
    fn test_run_checked_nonzero_exit() {
        let result = run_checked("false", &[], None);
        assert!(matches!(result, Err(ProcessError::NonZeroExit { code: 1, .. })));
    }
}
