//! HTTPS binding: which path receives which message.
//!
//! Paths are relative to the receiving connector's protocol base URL and are
//! keyed by the receiver's own process id.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::message::{MessageType, ProcessId, ProtocolMessage, Role};

/// Characters a process id may not carry verbatim inside one path segment.
const PID_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(pid: &ProcessId) -> String {
    utf8_percent_encode(pid.as_str(), PID_SEGMENT).to_string()
}

/// Path of the handler that receives `message` when `sender` puts it on the wire.
///
/// Returns `None` when `sender` never sends this message type, or when a
/// non-initial message lacks the receiver's process id.
#[must_use]
pub fn message_path(message: &ProtocolMessage, sender: Role) -> Option<String> {
    let receiver = sender.counterparty();
    let pid = message.process_id(receiver).map(segment);

    match (receiver, message.message_type) {
        (Role::Provider, MessageType::Request) => Some(pid.map_or_else(
            || "/negotiations/request".to_string(),
            |pid| format!("/negotiations/{pid}/request"),
        )),
        (Role::Consumer, MessageType::Offer) => Some(pid.map_or_else(
            || "/negotiations/offers".to_string(),
            |pid| format!("/negotiations/{pid}/offers"),
        )),
        (Role::Provider, MessageType::Accept) | (Role::Consumer, MessageType::Finalize) => {
            pid.map(|pid| format!("/negotiations/{pid}/events"))
        }
        (Role::Provider, MessageType::Verification) => {
            pid.map(|pid| format!("/negotiations/{pid}/agreement/verification"))
        }
        (Role::Consumer, MessageType::Agreement) => {
            pid.map(|pid| format!("/negotiations/{pid}/agreement"))
        }
        (_, MessageType::Terminate) => pid.map(|pid| format!("/negotiations/{pid}/termination")),
        _ => None,
    }
}

/// Path of the negotiation state query for `pid`.
#[must_use]
pub fn negotiation_path(pid: &ProcessId) -> String {
    format!("/negotiations/{}", segment(pid))
}

/// Join a base URL and a binding path without doubling slashes.
#[must_use]
pub fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_type: MessageType) -> ProtocolMessage {
        ProtocolMessage::new(message_type)
            .with_consumer_pid("c1")
            .with_provider_pid("p1")
    }

    #[test]
    fn consumer_sent_messages_target_provider_pid() {
        let initial = ProtocolMessage::new(MessageType::Request).with_consumer_pid("c1");
        assert_eq!(
            message_path(&initial, Role::Consumer).as_deref(),
            Some("/negotiations/request")
        );
        assert_eq!(
            message_path(&message(MessageType::Request), Role::Consumer).as_deref(),
            Some("/negotiations/p1/request")
        );
        assert_eq!(
            message_path(&message(MessageType::Accept), Role::Consumer).as_deref(),
            Some("/negotiations/p1/events")
        );
        assert_eq!(
            message_path(&message(MessageType::Verification), Role::Consumer).as_deref(),
            Some("/negotiations/p1/agreement/verification")
        );
        assert_eq!(
            message_path(&message(MessageType::Terminate), Role::Consumer).as_deref(),
            Some("/negotiations/p1/termination")
        );
    }

    #[test]
    fn provider_sent_messages_target_consumer_pid() {
        let initial = ProtocolMessage::new(MessageType::Offer).with_provider_pid("p1");
        assert_eq!(
            message_path(&initial, Role::Provider).as_deref(),
            Some("/negotiations/offers")
        );
        assert_eq!(
            message_path(&message(MessageType::Agreement), Role::Provider).as_deref(),
            Some("/negotiations/c1/agreement")
        );
        assert_eq!(
            message_path(&message(MessageType::Finalize), Role::Provider).as_deref(),
            Some("/negotiations/c1/events")
        );
        assert_eq!(
            message_path(&message(MessageType::Terminate), Role::Provider).as_deref(),
            Some("/negotiations/c1/termination")
        );
    }

    #[test]
    fn wrong_sender_or_missing_pid_has_no_path() {
        assert_eq!(message_path(&message(MessageType::Offer), Role::Consumer), None);
        let accept = ProtocolMessage::new(MessageType::Accept).with_consumer_pid("c1");
        assert_eq!(message_path(&accept, Role::Consumer), None);
    }

    #[test]
    fn pids_are_encoded_as_one_path_segment() {
        let accept = ProtocolMessage::new(MessageType::Accept)
            .with_consumer_pid("c1")
            .with_provider_pid("p/1?x#y");
        assert_eq!(
            message_path(&accept, Role::Consumer).as_deref(),
            Some("/negotiations/p%2F1%3Fx%23y/events")
        );
        assert_eq!(
            negotiation_path(&ProcessId::new("urn:uuid:a b")),
            "/negotiations/urn:uuid:a%20b"
        );
    }

    #[test]
    fn join_normalizes_slashes() {
        assert_eq!(join("http://h/api/", "/negotiations"), "http://h/api/negotiations");
        assert_eq!(join("http://h", "negotiations"), "http://h/negotiations");
    }
}
