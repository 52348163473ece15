//! JSON-LD message codec.
//!
//! Decoding accepts compact or expanded terms and normalises to compact form.
//! Encoding and decoding share [`validate`], so every message that encodes
//! also decodes back to itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CodecError, CodecResult};
use crate::message::{MessageType, ProcessId, ProtocolMessage, Role};
use crate::state_machine::NegotiationState;
use crate::vocab::{self, ContextVersion};

/// Payload keys owned by the envelope.
pub const RESERVED_KEYS: [&str; 5] = [
    vocab::CONTEXT,
    vocab::TYPE,
    vocab::CONSUMER_PID,
    vocab::PROVIDER_PID,
    vocab::EVENT_TYPE,
];

// ─────────────────────────────────────────────────────────────────────────────
// Protocol messages
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize a message to wire bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encoding`] if the payload violates the vocabulary
/// for the declared message type.
pub fn encode(message: &ProtocolMessage) -> CodecResult<Vec<u8>> {
    let document = to_document(message)?;
    serde_json::to_vec(&document).map_err(|err| {
        CodecError::encoding(message.message_type.wire_type(), err.to_string())
    })
}

/// Build the compact JSON-LD document for a message.
///
/// # Errors
///
/// Returns [`CodecError::Encoding`] if the message fails validation.
pub fn to_document(message: &ProtocolMessage) -> CodecResult<Value> {
    validate(message)
        .map_err(|reason| CodecError::encoding(message.message_type.wire_type(), reason))?;

    let mut doc = Map::new();
    doc.insert(vocab::CONTEXT.into(), vocab::default_context());
    doc.insert(
        vocab::TYPE.into(),
        Value::String(message.message_type.wire_type().into()),
    );
    if let Some(event) = message.message_type.event_type() {
        doc.insert(vocab::EVENT_TYPE.into(), Value::String(event.into()));
    }
    if let Some(pid) = &message.consumer_pid {
        doc.insert(vocab::CONSUMER_PID.into(), Value::String(pid.to_string()));
    }
    if let Some(pid) = &message.provider_pid {
        doc.insert(vocab::PROVIDER_PID.into(), Value::String(pid.to_string()));
    }
    for (key, value) in &message.payload {
        doc.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(doc))
}

/// Parse wire bytes into a protocol message.
///
/// # Errors
///
/// Returns [`CodecError::Decoding`] on malformed structure or missing
/// mandatory terms, [`CodecError::UnsupportedVersion`] when the document
/// targets another protocol version.
pub fn decode(bytes: &[u8]) -> CodecResult<ProtocolMessage> {
    let value: Value = serde_json::from_slice(bytes)?;
    from_document(value)
}

/// Parse an already-deserialized JSON document into a protocol message.
///
/// # Errors
///
/// Same as [`decode`].
pub fn from_document(value: Value) -> CodecResult<ProtocolMessage> {
    let (wire_type, doc) = normalize(value)?;
    message_from_map(&wire_type, doc)
}

fn message_from_map(wire_type: &str, mut doc: Map<String, Value>) -> CodecResult<ProtocolMessage> {
    let message_type = match wire_type {
        vocab::CONTRACT_REQUEST_MESSAGE => MessageType::Request,
        vocab::CONTRACT_OFFER_MESSAGE => MessageType::Offer,
        vocab::CONTRACT_AGREEMENT_MESSAGE => MessageType::Agreement,
        vocab::CONTRACT_AGREEMENT_VERIFICATION_MESSAGE => MessageType::Verification,
        vocab::CONTRACT_NEGOTIATION_TERMINATION_MESSAGE => MessageType::Terminate,
        vocab::CONTRACT_NEGOTIATION_EVENT_MESSAGE => {
            let event = doc
                .remove(vocab::EVENT_TYPE)
                .as_ref()
                .and_then(vocab::scalar_str)
                .map(vocab::compact)
                .ok_or_else(|| CodecError::decoding("event message without eventType"))?;
            match event.as_str() {
                vocab::EVENT_ACCEPTED => MessageType::Accept,
                vocab::EVENT_FINALIZED => MessageType::Finalize,
                other => {
                    return Err(CodecError::decoding(format!("unknown eventType {other}")));
                }
            }
        }
        other => {
            return Err(CodecError::decoding(format!(
                "unknown message type {other}"
            )));
        }
    };

    let consumer_pid = take_pid(&mut doc, vocab::CONSUMER_PID)?;
    let provider_pid = take_pid(&mut doc, vocab::PROVIDER_PID)?;

    if let Some(address) = doc.remove(vocab::CALLBACK_ADDRESS) {
        let address = vocab::scalar_str(&address)
            .ok_or_else(|| CodecError::decoding("callbackAddress must be a string"))?
            .to_string();
        doc.insert(vocab::CALLBACK_ADDRESS.into(), Value::String(address));
    }
    // Only the term the type requires is normalised; anything else keeps its shape.
    let required = match message_type {
        MessageType::Request | MessageType::Offer => Some(vocab::OFFER),
        MessageType::Agreement => Some(vocab::AGREEMENT),
        _ => None,
    };
    if let Some(key) = required {
        if let Some(value) = doc.remove(key) {
            doc.insert(key.into(), vocab::unwrap_singleton(value));
        }
    }

    let message = ProtocolMessage {
        message_type,
        consumer_pid,
        provider_pid,
        payload: doc,
    };
    validate(&message).map_err(CodecError::Decoding)?;
    Ok(message)
}

/// Check a message against the vocabulary for its type.
///
/// # Errors
///
/// Returns a human-readable reason for the first violation found.
pub fn validate(message: &ProtocolMessage) -> Result<(), String> {
    for key in message.payload.keys() {
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(format!("{key} must not appear in the payload"));
        }
        if vocab::compact(key) != *key {
            return Err(format!("payload key {key} must be in compact form"));
        }
    }

    for role in [Role::Consumer, Role::Provider] {
        if message.process_id(role).is_some_and(|pid| pid.as_str().is_empty()) {
            return Err(format!("{} must be a non-empty string", role.pid_term()));
        }
    }

    let require_pid = |role: Role| match message.process_id(role) {
        Some(pid) if !pid.as_str().is_empty() => Ok(()),
        _ => Err(format!("missing {}", role.pid_term())),
    };
    let require_object_with_id = |key: &str| match message.payload.get(key) {
        Some(Value::Object(map)) if map.get(vocab::ID).and_then(vocab::scalar_str).is_some() => {
            Ok(())
        }
        Some(_) => Err(format!("{key} must be an object with an @id")),
        None => Err(format!("missing {key}")),
    };

    if let Some(address) = message.payload.get(vocab::CALLBACK_ADDRESS) {
        if !address.is_string() {
            return Err("callbackAddress must be a string".into());
        }
    }

    match message.message_type {
        MessageType::Request => {
            require_pid(Role::Consumer)?;
            require_object_with_id(vocab::OFFER)?;
            if message.provider_pid.is_none() && message.callback_address().is_none() {
                return Err("initial request without callbackAddress".into());
            }
        }
        MessageType::Offer => {
            require_pid(Role::Provider)?;
            require_object_with_id(vocab::OFFER)?;
            if message.consumer_pid.is_none() && message.callback_address().is_none() {
                return Err("initial offer without callbackAddress".into());
            }
        }
        MessageType::Agreement => {
            require_pid(Role::Consumer)?;
            require_pid(Role::Provider)?;
            if !message
                .payload
                .get(vocab::AGREEMENT)
                .is_some_and(Value::is_object)
            {
                return Err(format!("missing {}", vocab::AGREEMENT));
            }
        }
        MessageType::Accept
        | MessageType::Verification
        | MessageType::Finalize
        | MessageType::Terminate => {
            require_pid(Role::Consumer)?;
            require_pid(Role::Provider)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Negotiation snapshot and error documents
// ─────────────────────────────────────────────────────────────────────────────

/// `dspace:ContractNegotiation`: acknowledgement and state query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationSnapshot {
    pub consumer_pid: Option<ProcessId>,
    pub provider_pid: Option<ProcessId>,
    pub state: NegotiationState,
}

impl NegotiationSnapshot {
    /// Build the compact JSON-LD document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encoding`] for the non-wire `INITIAL` state.
    pub fn to_document(&self) -> CodecResult<Value> {
        let state = self.state.wire_name().ok_or_else(|| {
            CodecError::encoding(vocab::CONTRACT_NEGOTIATION, "state INITIAL has no wire form")
        })?;
        let mut doc = envelope(vocab::CONTRACT_NEGOTIATION);
        insert_pids(&mut doc, self.consumer_pid.as_ref(), self.provider_pid.as_ref());
        doc.insert(vocab::STATE.into(), Value::String(state.into()));
        Ok(Value::Object(doc))
    }
}

/// `dspace:ContractNegotiationError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationError {
    pub consumer_pid: Option<ProcessId>,
    pub provider_pid: Option<ProcessId>,
    pub code: Option<String>,
    pub reason: Vec<String>,
}

impl NegotiationError {
    /// Create an error document with a code and a single reason.
    #[must_use]
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            consumer_pid: None,
            provider_pid: None,
            code: Some(code.into()),
            reason: vec![reason.into()],
        }
    }

    /// Attach the negotiation's process ids.
    #[must_use]
    pub fn with_pids(mut self, consumer: Option<ProcessId>, provider: Option<ProcessId>) -> Self {
        self.consumer_pid = consumer;
        self.provider_pid = provider;
        self
    }

    /// Build the compact JSON-LD document.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = envelope(vocab::CONTRACT_NEGOTIATION_ERROR);
        insert_pids(&mut doc, self.consumer_pid.as_ref(), self.provider_pid.as_ref());
        if let Some(code) = &self.code {
            doc.insert(vocab::CODE.into(), Value::String(code.clone()));
        }
        if !self.reason.is_empty() {
            doc.insert(
                vocab::REASON.into(),
                Value::Array(self.reason.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(doc)
    }
}

/// Any document the codec understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Message(ProtocolMessage),
    Negotiation(NegotiationSnapshot),
    Error(NegotiationError),
}

/// Decode bytes into whichever document kind they carry.
///
/// # Errors
///
/// Same as [`decode`]; also fails when a snapshot carries an unknown state.
pub fn decode_envelope(bytes: &[u8]) -> CodecResult<Envelope> {
    let value: Value = serde_json::from_slice(bytes)?;
    envelope_from_document(value)
}

/// Classify an already-deserialized document.
///
/// # Errors
///
/// Same as [`decode_envelope`].
pub fn envelope_from_document(value: Value) -> CodecResult<Envelope> {
    let (wire_type, mut doc) = normalize(value)?;
    match wire_type.as_str() {
        vocab::CONTRACT_NEGOTIATION => {
            let consumer_pid = take_pid(&mut doc, vocab::CONSUMER_PID)?;
            let provider_pid = take_pid(&mut doc, vocab::PROVIDER_PID)?;
            let raw_state = doc
                .get(vocab::STATE)
                .and_then(vocab::scalar_str)
                .ok_or_else(|| CodecError::decoding("ContractNegotiation without state"))?;
            let state = NegotiationState::from_wire(raw_state).ok_or_else(|| {
                CodecError::decoding(format!("unknown negotiation state {raw_state}"))
            })?;
            Ok(Envelope::Negotiation(NegotiationSnapshot {
                consumer_pid,
                provider_pid,
                state,
            }))
        }
        vocab::CONTRACT_NEGOTIATION_ERROR => {
            let consumer_pid = take_pid(&mut doc, vocab::CONSUMER_PID)?;
            let provider_pid = take_pid(&mut doc, vocab::PROVIDER_PID)?;
            let code = doc
                .get(vocab::CODE)
                .and_then(vocab::scalar_str)
                .map(str::to_string);
            let reason = match doc.get(vocab::REASON) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        vocab::scalar_str(item).map_or_else(|| item.to_string(), str::to_string)
                    })
                    .collect(),
                Some(item) => vec![
                    vocab::scalar_str(item).map_or_else(|| item.to_string(), str::to_string),
                ],
                None => Vec::new(),
            };
            Ok(Envelope::Error(NegotiationError {
                consumer_pid,
                provider_pid,
                code,
                reason,
            }))
        }
        other => message_from_map(other, doc).map(Envelope::Message),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Check the context, compact every top-level key and split off `@type`.
fn normalize(value: Value) -> CodecResult<(String, Map<String, Value>)> {
    let Value::Object(map) = vocab::unwrap_singleton(value) else {
        return Err(CodecError::decoding("document must be a JSON object"));
    };

    let context = map
        .get(vocab::CONTEXT)
        .ok_or_else(|| CodecError::decoding("missing @context"))?;
    match vocab::context_version(context) {
        ContextVersion::Supported => {}
        ContextVersion::Unsupported(found) => return Err(CodecError::UnsupportedVersion { found }),
        ContextVersion::Missing => {
            return Err(CodecError::decoding(
                "@context does not reference the dataspace namespace",
            ));
        }
    }

    let mut doc = Map::new();
    for (key, value) in map {
        if key == vocab::CONTEXT {
            continue;
        }
        doc.insert(vocab::compact(&key), value);
    }

    let wire_type = doc
        .remove(vocab::TYPE)
        .as_ref()
        .and_then(vocab::scalar_str)
        .map(vocab::compact)
        .ok_or_else(|| CodecError::decoding("missing @type"))?;
    Ok((wire_type, doc))
}

fn take_pid(doc: &mut Map<String, Value>, key: &str) -> CodecResult<Option<ProcessId>> {
    match doc.remove(key) {
        None => Ok(None),
        Some(value) => vocab::scalar_str(&value)
            .filter(|pid| !pid.is_empty())
            .map(|pid| Some(ProcessId::new(pid)))
            .ok_or_else(|| CodecError::decoding(format!("{key} must be a non-empty string"))),
    }
}

fn envelope(wire_type: &str) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(vocab::CONTEXT.into(), vocab::default_context());
    doc.insert(vocab::TYPE.into(), Value::String(wire_type.into()));
    doc
}

fn insert_pids(
    doc: &mut Map<String, Value>,
    consumer: Option<&ProcessId>,
    provider: Option<&ProcessId>,
) {
    if let Some(pid) = consumer {
        doc.insert(vocab::CONSUMER_PID.into(), Value::String(pid.to_string()));
    }
    if let Some(pid) = provider {
        doc.insert(vocab::PROVIDER_PID.into(), Value::String(pid.to_string()));
    }
}
