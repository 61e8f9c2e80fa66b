//! Error taxonomy for the MI session and the state built on top of it.

use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MiError>;

/// Errors surfaced by the parser, the session and the state components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiError {
    /// A line did not follow the MI output grammar.
    #[error("malformed MI record at offset {offset}: {message} (line: {line:?})")]
    MalformedProtocol {
        line: String,
        offset: usize,
        message: SmolStr,
    },

    /// The reply for the in-flight command arrived but could not be parsed.
    #[error("reply for token {token} could not be parsed")]
    ProtocolDesync { token: u32 },

    /// A command was issued while another one is still awaiting its reply.
    #[error("another command is already in flight")]
    ProtocolBusy,

    /// The debugger answered with an `^error` record.
    #[error("debugger error: {message}")]
    Command {
        message: String,
        code: Option<SmolStr>,
    },

    /// A variable object could not be created for an expression.
    #[error("cannot evaluate '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    /// The transport closed or the debugger exited.
    #[error("MI session terminated")]
    SessionTerminated,

    /// No reply arrived before the configured deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// A well-formed reply lacked a field the caller depends on.
    #[error("protocol contract violation: {0}")]
    ContractViolation(String),

    /// The variable object left scope and can no longer be updated.
    #[error("variable '{0}' is out of scope")]
    OutOfScope(SmolStr),

    /// The handle or request is unknown or was already deleted.
    #[error("'{0}' not found")]
    NotFound(String),

    /// Some debugger-side breakpoints could not be deleted; the request is gone.
    #[error("breakpoint request {request} removed with {} failed delete(s)", failures.len())]
    PartialDelete {
        request: u32,
        failures: Vec<(SmolStr, String)>,
    },

    /// Writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded or validated.
    #[error("invalid configuration: {0}")]
    Config(SmolStr),
}

impl MiError {
    pub(crate) fn malformed(line: &str, offset: usize, message: &str) -> Self {
        Self::MalformedProtocol {
            line: line.to_string(),
            offset,
            message: SmolStr::new(message),
        }
    }

    /// Warning-class errors report a completed operation with side issues.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::PartialDelete { .. })
    }

    /// Fatal errors leave the session or the owning component unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionTerminated | Self::ContractViolation(_))
    }
}
