// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for accelerator control and benchmark runs.

use crate::config::Target;
use crate::handshake::Handshake;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while configuring, driving or tearing down the AFU.
#[derive(Debug, Error)]
pub enum CciError {
    /// Required positional arguments are missing; carries the usage text.
    #[error("{0}")]
    Usage(String),

    /// The command line could not be scanned.
    #[error("Error scanning command line: {0}")]
    ArgumentParse(String),

    /// No `--target` was given.
    #[error("No valid --target specified.")]
    MissingTarget,

    /// The target is known but this build carries no backend for it.
    #[error("The version of this tool was built without support for --target={0}")]
    UnsupportedTarget(Target),

    /// Invalid configuration value.
    #[error("{0}")]
    Configuration(String),

    /// A physically contiguous, cache-line-aligned region could not be provided.
    #[error("workspace allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// A bounded handshake wait expired before the device answered.
    #[error("{handshake} handshake timed out after {polls} polls ({elapsed:?})")]
    HandshakeTimeout {
        handshake: Handshake,
        polls: u64,
        elapsed: Duration,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No accelerator found on the system.
    #[error("no CCI accelerator found")]
    NoDeviceFound,

    /// Platform not supported.
    #[error("platform not supported: direct access requires Linux")]
    PlatformNotSupported,

    /// Permission denied accessing device or memory information.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CciError {
    /// Process exit code reported for this error.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 1 | missing required arguments |
    /// | 2 | command-line scan error |
    /// | 3 | missing, invalid or unsupported `--target` |
    /// | 4 | runtime failure |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 1,
            Self::ArgumentParse(_) => 2,
            Self::MissingTarget | Self::UnsupportedTarget(_) | Self::Configuration(_) => 3,
            _ => 4,
        }
    }

    /// Returns true for errors raised before any device interaction.
    pub fn is_configuration(&self) -> bool {
        self.exit_code() == 3
    }
}

/// Result type alias for accelerator operations.
pub type CciResult<T> = Result<T, CciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CciError::Usage(String::new()).exit_code(), 1);
        assert_eq!(CciError::ArgumentParse("x".into()).exit_code(), 2);
        assert_eq!(CciError::MissingTarget.exit_code(), 3);
        assert_eq!(CciError::UnsupportedTarget(Target::Aal).exit_code(), 3);
        assert_eq!(
            CciError::AllocationFailed {
                size: 64,
                reason: "pool exhausted".into()
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = CciError::HandshakeTimeout {
            handshake: Handshake::Completion,
            polls: 10,
            elapsed: Duration::from_millis(3),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("completion handshake timed out after 10 polls"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_unsupported_target_message() {
        let msg = CciError::UnsupportedTarget(Target::Aal).to_string();
        assert!(msg.ends_with("--target=AAL"));
    }
}
