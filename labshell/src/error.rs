//! Error types for labshell.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for labshell operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (process spawn, SSH, I/O)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Interactive command session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Shell-level errors
    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),
}

impl Error {
    /// A read deadline elapsed without a qualifying match.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::Timeout(_)))
    }

    /// The backend reported EOF or the channel was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::Closed))
    }

    /// An abort pattern matched before the expected prompt.
    pub fn is_unexpected_abort(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::UnexpectedAbort { .. }))
    }

    /// A `*0` call observed a nonzero exit code.
    pub fn is_command_failed(&self) -> bool {
        matches!(self, Error::Shell(ShellError::CommandFailed { .. }))
    }

    /// A session or routine broke its lifecycle contract.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::Session(SessionError::ProtocolViolation { .. }))
    }

    /// Exit code carried by a [`ShellError::CommandFailed`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Shell(ShellError::CommandFailed { exit_code, .. }) => Some(*exit_code),
            _ => None,
        }
    }
}

/// Transport layer errors (spawning, SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key does not match the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Reading or writing known_hosts failed
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Failed to allocate a pseudo-terminal or spawn the program on it
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (prompt matching, liveness, borrowing).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No qualifying match arrived before the deadline
    #[error("Prompt not found within {0:?}")]
    Timeout(Duration),

    /// The backend reported EOF or the channel was closed
    #[error("Channel closed")]
    Closed,

    /// An abort ("death string") pattern matched before the expected prompt
    #[error("Unexpected abort: matched '{pattern}' before the expected prompt")]
    UnexpectedAbort {
        /// The abort pattern that matched.
        pattern: String,
        /// Output received before the abort match.
        output: String,
    },

    /// The channel is currently lent to a borrow grant
    #[error("Channel is borrowed")]
    Borrowed,

    /// No prompt pattern is installed
    #[error("No prompt pattern installed")]
    NoPrompt,

    /// Character has no control-code equivalent
    #[error("'{0}' has no control character")]
    InvalidControl(char),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Interactive command session errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A session left its scope while running, was used after termination,
    /// or its command routine broke its contract.
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },
}

impl SessionError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        SessionError::ProtocolViolation {
            message: message.into(),
        }
    }
}

/// Shell-level errors.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Command returned a nonzero exit code
    #[error("Command '{command}' failed with exit code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The exit code reported by the shell could not be parsed
    #[error("Command '{command}' reported an invalid exit code: {raw:?}")]
    InvalidExitCode { command: String, raw: String },

    /// The shell flavour lacks a capability the operation needs
    #[error("Shell '{shell}' does not support {capability}")]
    Unsupported { shell: String, capability: String },

    /// No shell flavour registered under this name
    #[error("Unknown shell flavour '{name}'")]
    UnknownShell { name: String },

    /// A shell flavour with this name is already registered
    #[error("Shell flavour '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Invalid configuration in the shell builder
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result type alias using labshell's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let err: Error = ChannelError::Timeout(Duration::from_millis(200)).into();
        assert!(err.is_timeout());
        assert!(!err.is_closed());

        let err: Error = ChannelError::Closed.into();
        assert!(err.is_closed());

        let err: Error = SessionError::violation("left running").into();
        assert!(err.is_protocol_violation());
        assert_eq!(err.to_string(), "Session error: Protocol violation: left running");
    }

    #[test]
    fn test_command_failed_exit_code() {
        let err: Error = ShellError::CommandFailed {
            command: "false".to_string(),
            exit_code: 1,
            output: String::new(),
        }
        .into();
        assert!(err.is_command_failed());
        assert_eq!(err.exit_code(), Some(1));

        let err: Error = ChannelError::NoPrompt.into();
        assert_eq!(err.exit_code(), None);
    }
}
