//! Codec and state machine errors.

use serde::{Deserialize, Serialize};

use crate::message::{MessageType, Role};
use crate::state_machine::NegotiationState;

/// Errors produced while encoding or decoding wire documents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The document violates the vocabulary of its declared type.
    #[error("cannot encode {document}: {reason}")]
    Encoding {
        /// Compact `@type` of the offending document.
        document: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Malformed structure or unknown/missing mandatory vocabulary terms.
    #[error("cannot decode message: {0}")]
    Decoding(String),

    /// The document targets a protocol version this engine does not speak.
    #[error("unsupported protocol version: {found}")]
    UnsupportedVersion {
        /// Version segment found in the dataspace namespace.
        found: String,
    },
}

impl CodecError {
    pub(crate) fn decoding(reason: impl Into<String>) -> Self {
        Self::Decoding(reason.into())
    }

    pub(crate) fn encoding(document: &'static str, reason: impl Into<String>) -> Self {
        Self::Encoding {
            document,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A message type that is not legal for an exchange in its current state.
///
/// This is the primary conformance violation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("illegal transition: {attempted_type} in state {current_state} for {role}")]
pub struct IllegalTransition {
    /// State of the exchange when the message was seen.
    pub current_state: NegotiationState,
    /// Type of the rejected message.
    pub attempted_type: MessageType,
    /// Role of the exchange owner.
    pub role: Role,
}
