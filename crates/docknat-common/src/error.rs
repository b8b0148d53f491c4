//! Error types for docknat operations.
//!
//! Every collaborator of the reconciliation loop (shell, iptables, Docker)
//! reports failures through [`NatError`]. Rule-level parse problems are not
//! errors at this level; the parser skips them locally.

use std::io;
use thiserror::Error;

/// Result type alias for docknat operations.
pub type NatResult<T> = Result<T, NatError>;

/// Errors that can occur while observing or mutating NAT state.
#[derive(Debug, Error)]
pub enum NatError {
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

    /// A delete targeted a rule that is not in the chain.
    #[error("No matching rule in {table}/{chain}: {rule}")]
    RuleNotFound {
        /// The table searched.
        table: String,
        /// The chain searched.
        chain: String,
        /// The rule specification that was not found.
        rule: String,
    },

    /// A collaborator (container runtime, firewall) could not be reached.
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        /// Which collaborator failed, e.g. "docker" or "iptables".
        collaborator: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// IO error outside of command execution (config file access).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl NatError {
    /// Creates a rule not found error.
    pub fn rule_not_found(
        table: impl Into<String>,
        chain: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self::RuleNotFound {
            table: table.into(),
            chain: chain.into(),
            rule: rule.into(),
        }
    }

    /// Creates a collaborator unavailable error.
    pub fn unavailable(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error only reports that a rule was already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NatError::RuleNotFound { .. })
    }

    /// Returns true if this error indicates a transient condition
    /// that the next reconciliation cycle may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NatError::Unavailable { .. } | NatError::ShellCommandFailed { .. }
        )
    }
}
