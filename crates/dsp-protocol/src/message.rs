//! Protocol message model.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::vocab;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers and roles
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier correlating one negotiation on one side (`consumerPid` or `providerPid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `urn:uuid:` identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("urn:uuid:{}", uuid::Uuid::new_v4()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Negotiation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Consumer,
    Provider,
}

impl Role {
    /// The other side of the negotiation.
    #[must_use]
    pub const fn counterparty(self) -> Self {
        match self {
            Self::Consumer => Self::Provider,
            Self::Provider => Self::Consumer,
        }
    }

    /// Compact property holding this role's process id.
    #[must_use]
    pub const fn pid_term(self) -> &'static str {
        match self {
            Self::Consumer => vocab::CONSUMER_PID,
            Self::Provider => vocab::PROVIDER_PID,
        }
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Consumer => "CONSUMER",
            Self::Provider => "PROVIDER",
        })
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "consumer" => Ok(Self::Consumer),
            "provider" => Ok(Self::Provider),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Which party put a message on the wire, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The conformance engine.
    Tck,
    /// The system under test.
    Sut,
}

impl SenderRole {
    /// Direction of the message relative to the engine.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Tck => Direction::Outbound,
            Self::Sut => Direction::Inbound,
        }
    }
}

/// Direction of a message relative to the exchange owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types
// ─────────────────────────────────────────────────────────────────────────────

/// Contract negotiation message kinds that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Offer,
    Accept,
    Agreement,
    Verification,
    Finalize,
    Terminate,
}

impl MessageType {
    /// Every message type, in protocol order.
    pub const ALL: [Self; 7] = [
        Self::Request,
        Self::Offer,
        Self::Accept,
        Self::Agreement,
        Self::Verification,
        Self::Finalize,
        Self::Terminate,
    ];

    /// Role that originates this message, `None` if either side may send it.
    #[must_use]
    pub const fn originator(self) -> Option<Role> {
        match self {
            Self::Request | Self::Accept | Self::Verification => Some(Role::Consumer),
            Self::Offer | Self::Agreement | Self::Finalize => Some(Role::Provider),
            Self::Terminate => None,
        }
    }

    /// Compact `@type` of the wire document.
    #[must_use]
    pub const fn wire_type(self) -> &'static str {
        match self {
            Self::Request => vocab::CONTRACT_REQUEST_MESSAGE,
            Self::Offer => vocab::CONTRACT_OFFER_MESSAGE,
            Self::Accept | Self::Finalize => vocab::CONTRACT_NEGOTIATION_EVENT_MESSAGE,
            Self::Agreement => vocab::CONTRACT_AGREEMENT_MESSAGE,
            Self::Verification => vocab::CONTRACT_AGREEMENT_VERIFICATION_MESSAGE,
            Self::Terminate => vocab::CONTRACT_NEGOTIATION_TERMINATION_MESSAGE,
        }
    }

    /// `eventType` value for event messages.
    #[must_use]
    pub const fn event_type(self) -> Option<&'static str> {
        match self {
            Self::Accept => Some(vocab::EVENT_ACCEPTED),
            Self::Finalize => Some(vocab::EVENT_FINALIZED),
            _ => None,
        }
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Offer => "offer",
            Self::Accept => "accept",
            Self::Agreement => "agreement",
            Self::Verification => "verification",
            Self::Finalize => "finalize",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol message
// ─────────────────────────────────────────────────────────────────────────────

/// A typed protocol message envelope.
///
/// `payload` holds every body term other than `@context`, `@type`, the two
/// process ids and `eventType`, keyed in compact form. Unknown terms are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Message kind.
    pub message_type: MessageType,
    /// Consumer-side process id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_pid: Option<ProcessId>,
    /// Provider-side process id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_pid: Option<ProcessId>,
    /// Remaining body terms.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl ProtocolMessage {
    /// Create an empty message of the given type.
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            consumer_pid: None,
            provider_pid: None,
            payload: Map::new(),
        }
    }

    /// Set the consumer process id.
    #[must_use]
    pub fn with_consumer_pid(mut self, pid: impl Into<ProcessId>) -> Self {
        self.consumer_pid = Some(pid.into());
        self
    }

    /// Set the provider process id.
    #[must_use]
    pub fn with_provider_pid(mut self, pid: impl Into<ProcessId>) -> Self {
        self.provider_pid = Some(pid.into());
        self
    }

    /// Set an arbitrary payload term.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Attach a minimal `odrl:Offer` with the given id.
    #[must_use]
    pub fn with_offer_id(self, offer_id: impl Into<String>) -> Self {
        let offer = serde_json::json!({
            vocab::TYPE: vocab::ODRL_OFFER,
            vocab::ID: offer_id.into(),
        });
        self.with_field(vocab::OFFER, offer)
    }

    /// Set the callback address.
    #[must_use]
    pub fn with_callback_address(self, address: impl Into<String>) -> Self {
        self.with_field(vocab::CALLBACK_ADDRESS, Value::String(address.into()))
    }

    /// Process id owned by `role`.
    #[must_use]
    pub const fn process_id(&self, role: Role) -> Option<&ProcessId> {
        match role {
            Role::Consumer => self.consumer_pid.as_ref(),
            Role::Provider => self.provider_pid.as_ref(),
        }
    }

    /// Replace the process id owned by `role`.
    pub fn set_process_id(&mut self, role: Role, pid: Option<ProcessId>) {
        match role {
            Role::Consumer => self.consumer_pid = pid,
            Role::Provider => self.provider_pid = pid,
        }
    }

    /// Id of the embedded offer, if any.
    #[must_use]
    pub fn offer_id(&self) -> Option<&str> {
        self.payload
            .get(vocab::OFFER)
            .and_then(|offer| offer.get(vocab::ID))
            .and_then(vocab::scalar_str)
    }

    /// Callback address, if any.
    #[must_use]
    pub fn callback_address(&self) -> Option<&str> {
        self.payload
            .get(vocab::CALLBACK_ADDRESS)
            .and_then(vocab::scalar_str)
    }

    /// Whether this message opens a negotiation (the receiver has no pid yet).
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        match self.message_type {
            MessageType::Request => self.provider_pid.is_none(),
            MessageType::Offer => self.consumer_pid.is_none(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn originators_follow_protocol_roles() {
        assert_eq!(MessageType::Request.originator(), Some(Role::Consumer));
        assert_eq!(MessageType::Agreement.originator(), Some(Role::Provider));
        assert_eq!(MessageType::Terminate.originator(), None);
    }

    #[test]
    fn initial_detection() {
        let request = ProtocolMessage::new(MessageType::Request).with_consumer_pid("c1");
        assert!(request.is_initial());
        assert!(!request.clone().with_provider_pid("p1").is_initial());

        let offer = ProtocolMessage::new(MessageType::Offer).with_provider_pid("p1");
        assert!(offer.is_initial());
        assert!(!ProtocolMessage::new(MessageType::Accept).is_initial());
    }

    #[test]
    fn offer_and_callback_accessors() {
        let msg = ProtocolMessage::new(MessageType::Request)
            .with_offer_id("offer-1")
            .with_callback_address("http://localhost/consumer");
        assert_eq!(msg.offer_id(), Some("offer-1"));
        assert_eq!(msg.callback_address(), Some("http://localhost/consumer"));
    }

    #[test]
    fn generated_ids_are_urns() {
        let a = ProcessId::generate();
        let b = ProcessId::generate();
        assert!(a.as_str().starts_with("urn:uuid:"));
        assert_ne!(a, b);
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Provider".parse::<Role>(), Ok(Role::Provider));
        assert!("broker".parse::<Role>().is_err());
        assert_eq!(Role::Consumer.to_string(), "CONSUMER");
    }
}
