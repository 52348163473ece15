//! Engine error taxonomy.
//!
//! Each concern has its own enum. [`TckError`] is the run-level umbrella.

use std::fmt::Write as _;
use std::time::Duration;

use dsp_protocol::{CodecError, IllegalTransition, MessageType, NegotiationError, ProcessId, Role};

use crate::config::ConfigError;

fn list_types(types: &[MessageType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn buffered_suffix(buffered: Option<&MessageType>) -> String {
    buffered.map_or_else(String::new, |t| format!(" (unmatched {t} buffered)"))
}

fn negotiation_error_suffix(error: Option<&NegotiationError>) -> String {
    let Some(error) = error else {
        return String::new();
    };
    let mut out = String::new();
    if let Some(code) = &error.code {
        let _ = write!(out, " code={code}");
    }
    if !error.reason.is_empty() {
        let _ = write!(out, " reason={}", error.reason.join("; "));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Correlation
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the correlation store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// The process id is (or was) already tracked in this run.
    #[error("process {0} is already tracked in this run")]
    DuplicateProcess(ProcessId),

    /// No exchange is tracked under this process id.
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    /// The message is not legal for the exchange's current state.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// No matching callback arrived before the deadline.
    #[error(
        "no {} callback for process {process_id} within {}ms{}",
        list_types(.expected),
        .waited.as_millis(),
        buffered_suffix(.buffered.as_ref())
    )]
    CallbackTimeout {
        /// Exchange that was waiting.
        process_id: ProcessId,
        /// Types the step was waiting for.
        expected: Vec<MessageType>,
        /// How long the step waited.
        waited: Duration,
        /// Type of a buffered message that did not match, if any.
        buffered: Option<MessageType>,
    },

    /// The counterparty side of the exchange failed or the SUT misbehaved
    /// towards it.
    #[error("counterparty fault on process {process_id}: {reason}")]
    CounterpartyFault {
        /// Affected exchange.
        process_id: ProcessId,
        /// What went wrong.
        reason: String,
    },

    /// The pending callback was cancelled before completion.
    #[error("pending callback for process {0} was cancelled")]
    Cancelled(ProcessId),
}

impl CorrelationError {
    /// Whether this indicates a harness or scenario bug rather than a SUT
    /// conformance problem.
    #[must_use]
    pub const fn is_harness_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateProcess(_) | Self::UnknownProcess(_) | Self::Cancelled(_)
        )
    }
}

/// Result type for correlation store operations.
pub type CorrelationResult<T> = Result<T, CorrelationError>;

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the outbound driver client.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Connection failure, timeout or unreadable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The SUT answered with a non-success status.
    #[error(
        "SUT answered HTTP {status}{}",
        negotiation_error_suffix(.error.as_ref())
    )]
    ProtocolHttp {
        /// HTTP status code.
        status: u16,
        /// Decoded `ContractNegotiationError` body, when the SUT sent one.
        error: Option<NegotiationError>,
        /// Raw response body.
        body: String,
    },

    /// The outgoing message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No binding path exists for this message and sender.
    #[error("no binding path for {message_type} sent by {sender}")]
    NoRoute {
        /// Message type.
        message_type: MessageType,
        /// Sending role.
        sender: Role,
    },
}

impl DriverError {
    /// Whether a retry may succeed.
    ///
    /// Transport failures and HTTP 408, 429 and 5xx are transient; protocol
    /// rejections and codec errors are facts about the exchange.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::ProtocolHttp { status, .. } => {
                matches!(*status, 408 | 429) || (*status >= 500 && *status <= 599)
            }
            Self::Codec(_) | Self::NoRoute { .. } => false,
        }
    }

    /// HTTP status, if the SUT answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ProtocolHttp { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

/// Errors in scenario definitions and manifests.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// A step references an exchange alias that was never declared.
    #[error("scenario {scenario}: unknown exchange alias {alias}")]
    UnknownExchange {
        /// Scenario name.
        scenario: String,
        /// Offending alias.
        alias: String,
    },

    /// Structural problem in a scenario.
    #[error("scenario {scenario}: {reason}")]
    Invalid {
        /// Scenario name.
        scenario: String,
        /// What is wrong.
        reason: String,
    },

    /// A message template cannot be materialised.
    #[error("template for {message_type}: {reason}")]
    Template {
        /// Template message type.
        message_type: MessageType,
        /// What is wrong.
        reason: String,
    },

    /// Two scenarios share a name.
    #[error("duplicate scenario name {0}")]
    DuplicateName(String),

    /// A selected scenario does not exist.
    #[error("unknown scenario {0}")]
    NotFound(String),

    /// Manifest TOML could not be parsed.
    #[error("failed to parse scenario manifest: {0}")]
    Toml(#[from] toml::de::Error),

    /// Manifest file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ScenarioError {
    pub(crate) fn invalid(scenario: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            scenario: scenario.to_string(),
            reason: reason.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

/// Run-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Listener bind or shutdown failure.
    #[error("endpoint error: {0}")]
    Endpoint(#[from] std::io::Error),
}

/// Result type for run-level operations.
pub type TckResult<T> = Result<T, TckError>;
