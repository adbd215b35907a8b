//! Shell command execution for the routing tools.
//!
//! Every `ip` invocation goes through [`exec`], which runs the command under
//! `/bin/sh -c` and captures its output. Values that originate from callers
//! (device names, addresses, table names) must be passed through
//! [`shellquote`] before they are spliced into a command line.
//!
//! # Example
//!
//! ```ignore
//! use sysvm_cfgmgr_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} -4 route show {}", IP_CMD, shellquote("0/0"));
//! let lines = shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CfgMgrError, CfgMgrResult};

/// Path to the `ip` command for route and rule configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Characters with special meaning inside double quotes: $, `, ", \ and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character that keeps a
/// special meaning inside double quotes is backslash-escaped.
///
/// # Example
///
/// ```
/// use sysvm_cfgmgr_common::shell::shellquote;
///
/// assert_eq!(shellquote("Table_eth1"), "\"Table_eth1\"");
/// assert_eq!(shellquote("eth$1"), "\"eth\\$1\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout split into its non-blank lines.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Executes a shell command and captures its output.
///
/// Returns `Err` only when the shell could not be spawned; a non-zero exit
/// status is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> CfgMgrResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CfgMgrError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command, turning a non-zero exit into
/// [`CfgMgrError::ShellCommandFailed`].
///
/// On success the captured result is returned so callers can read stdout.
pub async fn exec_or_throw(cmd: &str) -> CfgMgrResult<ExecResult> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result)
    } else {
        Err(CfgMgrError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
