//! Error types for cfgmgr operations.
//!
//! This module defines the error types used throughout the sysvm cfgmgr
//! crates. All errors implement `std::error::Error` via `thiserror`.
//!
//! Missing route input (no address yet, no resolvable table) is deliberately
//! absent from this enum: it is reported as a skip outcome, not an error.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cfgmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur during cfgmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Device name carries no numeric suffix to derive a table number from.
    #[error("Invalid device name '{device}': no numeric suffix")]
    InvalidDeviceName {
        /// The offending device name.
        device: String,
    },

    /// Default route operation invoked without a gateway.
    #[error("Gateway cannot be empty for {operation}")]
    MissingGateway {
        /// The default route operation that was attempted.
        operation: &'static str,
    },

    /// Reading or appending a registry file failed.
    #[error("File operation on '{}' failed: {source}", path.display())]
    File {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl CfgMgrError {
    /// Creates an invalid device name error.
    pub fn invalid_device_name(device: impl Into<String>) -> Self {
        Self::InvalidDeviceName {
            device: device.into(),
        }
    }

    /// Creates a missing gateway error.
    pub fn missing_gateway(operation: &'static str) -> Self {
        Self::MissingGateway { operation }
    }

    /// Creates a file error.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error reports a failed external command, as
    /// opposed to misuse by the caller.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            CfgMgrError::ShellExec { .. } | CfgMgrError::ShellCommandFailed { .. }
        )
    }
}
