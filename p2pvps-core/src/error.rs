//! Error taxonomy shared by every fallible lifecycle operation.
//!
//! Whether a failure stops the device or is retried on the next tick is
//! decided by [`AgentError::disposition`], never by inspecting messages.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Exit details of an external step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Process exit code, `None` if the process could not be started or was killed by a signal.
    pub code: Option<i32>,
    /// Captured diagnostic text (stderr, falling back to stdout).
    pub output: String,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}")?,
            None => f.write_str("no exit code")?,
        }
        let output = self.output.trim();
        if !output.is_empty() {
            write!(f, ": {output}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// No route to the server, connection refused, or the request timed out.
    #[error("server unreachable: {0}")]
    NetworkUnreachable(String),

    /// The server answered but rejected the request or returned unusable data.
    #[error("server error: {message}")]
    ServerError { status: Option<u16>, message: String },

    /// The response body could not be parsed as documented.
    #[error("malformed server response: {0}")]
    ProtocolError(String),

    /// A documented response field was absent.
    #[error("server response is missing `{0}`")]
    DataMissing(&'static str),

    #[error("failed to write {path:?}: {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("step `{step}` failed with {exit}")]
    StepFailed { step: &'static str, exit: ExitInfo },
}

/// Lifecycle phase in which an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Registration,
    Provisioning,
    ExpirationCheck,
    Teardown,
}

/// What the orchestrator does with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the lifecycle and exit the process.
    Fatal,
    /// Log, stay in place, and try again on the next scheduled tick.
    Retry,
    /// Log and carry on with the next transition.
    Continue,
}

impl AgentError {
    pub fn disposition(&self, phase: Phase) -> Disposition {
        match phase {
            Phase::Registration | Phase::Provisioning => Disposition::Fatal,
            Phase::ExpirationCheck => match self {
                AgentError::NetworkUnreachable(_)
                | AgentError::ServerError { .. }
                | AgentError::ProtocolError(_)
                | AgentError::DataMissing(_) => Disposition::Retry,
                AgentError::ConfigWriteFailed { .. } | AgentError::StepFailed { .. } => {
                    Disposition::Fatal
                }
            },
            Phase::Teardown => Disposition::Continue,
        }
    }

    /// Short kind label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NetworkUnreachable(_) => "network_unreachable",
            AgentError::ServerError { .. } => "server_error",
            AgentError::ProtocolError(_) => "protocol_error",
            AgentError::DataMissing(_) => "data_missing",
            AgentError::ConfigWriteFailed { .. } => "config_write_failed",
            AgentError::StepFailed { .. } => "step_failed",
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() || e.is_builder() {
            // An unusable URL is a contract problem, not a connectivity one.
            AgentError::ProtocolError(e.to_string())
        } else if let Some(status) = e.status() {
            AgentError::ServerError {
                status: Some(status.as_u16()),
                message: e.to_string(),
            }
        } else {
            // connect, timeout, and every other transport-level failure
            AgentError::NetworkUnreachable(e.to_string())
        }
    }
}

/// Why the orchestrator stopped. Returned once, to the process entry point.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("registration failed: {0}")]
    Registration(#[source] AgentError),

    #[error("provisioning failed at step `{step}`: {source}")]
    Provisioning {
        step: &'static str,
        #[source]
        source: AgentError,
    },

    #[error("expiration check failed locally: {0}")]
    ExpirationCheck(#[source] AgentError),

    #[error("orchestrator already halted")]
    Halted,
}

impl FatalError {
    /// Name of the phase that failed, for the exit diagnostic.
    pub fn phase(&self) -> &'static str {
        match self {
            FatalError::Registration(_) => "registration",
            FatalError::Provisioning { step, .. } => step,
            FatalError::ExpirationCheck(_) => "expiration-check",
            FatalError::Halted => "halted",
        }
    }
}
