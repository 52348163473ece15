//! Deliberately non-conformant messages for negative testing.
//!
//! A prepared violation is put on the wire as raw bytes and is never recorded
//! as a transition: the exchange state stays where it was, and the SUT is
//! expected to reject it with a 4xx.

use std::fmt;

use dsp_protocol::{
    Direction, MessageType, NegotiationState, ProcessId, ProtocolMessage, Role, binding, to_document,
    transition, vocab,
};
use serde::{Deserialize, Serialize};

/// Kind of protocol violation to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A message type that is illegal in the exchange's current state.
    WrongState,
    /// Mandatory vocabulary (`@type` and the sender's pid) stripped.
    MalformedPayload,
    /// The receiver's pid replaced with one it has never seen.
    WrongProcessId,
}

impl ViolationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WrongState => "wrong_state",
            Self::MalformedPayload => "malformed_payload",
            Self::WrongProcessId => "wrong_process_id",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violation ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedViolation {
    pub kind: ViolationKind,
    pub message_type: MessageType,
    /// Binding path relative to the receiver's base URL.
    pub path: String,
    pub body: Vec<u8>,
}

/// First message type `sender` could originate that is illegal in `state`.
///
/// Terminate is skipped since it is legal from every non-terminal state.
#[must_use]
pub fn default_wrong_state_type(sender: Role, state: NegotiationState) -> Option<MessageType> {
    MessageType::ALL.into_iter().find(|message_type| {
        *message_type != MessageType::Terminate
            && message_type.originator() == Some(sender)
            && transition(sender, state, *message_type, Direction::Outbound).is_err()
    })
}

/// Turn a well-formed message into a violation of `kind`.
///
/// `current` is the sender's view of the exchange state.
///
/// # Errors
/// Returns a description when the message cannot express the violation
/// (a legal type for `WrongState`, or no binding path).
pub fn prepare(
    kind: ViolationKind,
    sender: Role,
    current: NegotiationState,
    mut message: ProtocolMessage,
) -> Result<PreparedViolation, String> {
    let message_type = message.message_type;
    let receiver = sender.counterparty();

    let document = match kind {
        ViolationKind::WrongState => {
            if transition(sender, current, message_type, Direction::Outbound).is_ok() {
                return Err(format!(
                    "{message_type} is legal for {sender} in state {current}"
                ));
            }
            to_document(&message).map_err(|e| e.to_string())?
        }
        ViolationKind::MalformedPayload => {
            let mut document = to_document(&message).map_err(|e| e.to_string())?;
            if let Some(map) = document.as_object_mut() {
                map.remove(vocab::TYPE);
                map.remove(sender.pid_term());
            }
            document
        }
        ViolationKind::WrongProcessId => {
            message.set_process_id(receiver, Some(ProcessId::generate()));
            to_document(&message).map_err(|e| e.to_string())?
        }
    };

    let path = binding::message_path(&message, sender)
        .ok_or_else(|| format!("no binding path for {message_type} sent by {sender}"))?;
    let body = serde_json::to_vec(&document).map_err(|e| e.to_string())?;
    Ok(PreparedViolation {
        kind,
        message_type,
        path,
        body,
    })
}

#[cfg(test)]
mod tests {
    use dsp_protocol::decode;

    use super::*;

    fn accept() -> ProtocolMessage {
        ProtocolMessage::new(MessageType::Accept)
            .with_consumer_pid("c1")
            .with_provider_pid("p1")
    }

    #[test]
    fn default_wrong_state_type_skips_legal_and_terminate() {
        assert_eq!(
            default_wrong_state_type(Role::Consumer, NegotiationState::Initial),
            Some(MessageType::Accept)
        );
        assert_eq!(
            default_wrong_state_type(Role::Consumer, NegotiationState::Offered),
            Some(MessageType::Request)
        );
        assert_eq!(
            default_wrong_state_type(Role::Provider, NegotiationState::Requested),
            Some(MessageType::Agreement)
        );
    }

    #[test]
    fn wrong_state_rejects_legal_message() {
        let err = prepare(
            ViolationKind::WrongState,
            Role::Consumer,
            NegotiationState::Offered,
            accept(),
        )
        .unwrap_err();
        assert!(err.contains("legal"));
    }

    #[test]
    fn wrong_state_encodes_well_formed_message() {
        let prepared = prepare(
            ViolationKind::WrongState,
            Role::Consumer,
            NegotiationState::Requested,
            accept(),
        )
        .unwrap();
        assert_eq!(prepared.path, "/negotiations/p1/events");
        assert_eq!(decode(&prepared.body).unwrap(), accept());
    }

    #[test]
    fn malformed_payload_does_not_decode() {
        let prepared = prepare(
            ViolationKind::MalformedPayload,
            Role::Consumer,
            NegotiationState::Offered,
            accept(),
        )
        .unwrap();
        assert!(decode(&prepared.body).is_err());
        let document: serde_json::Value = serde_json::from_slice(&prepared.body).unwrap();
        assert!(document.get(vocab::TYPE).is_none());
        assert!(document.get(vocab::CONSUMER_PID).is_none());
        assert_eq!(prepared.path, "/negotiations/p1/events");
    }

    #[test]
    fn wrong_process_id_changes_path_and_body() {
        let prepared = prepare(
            ViolationKind::WrongProcessId,
            Role::Consumer,
            NegotiationState::Offered,
            accept(),
        )
        .unwrap();
        let decoded = decode(&prepared.body).unwrap();
        let fresh = decoded.provider_pid.unwrap();
        assert_ne!(fresh.as_str(), "p1");
        assert_eq!(prepared.path, format!("/negotiations/{fresh}/events"));
        assert_eq!(decoded.consumer_pid, Some("c1".into()));
    }
}
