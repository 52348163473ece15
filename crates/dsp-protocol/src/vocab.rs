//! DSP v0.8 JSON-LD vocabulary.
//!
//! Terms are kept in compact form (`dspace:consumerPid`). The helpers here
//! convert expanded IRIs to compact terms and extract the protocol version
//! from an `@context` value.

use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Namespaces
// ─────────────────────────────────────────────────────────────────────────────

/// Base of every dataspace protocol namespace, regardless of version.
pub const DSPACE_NAMESPACE_BASE: &str = "https://w3id.org/dspace/";

/// The only protocol version this crate speaks.
pub const SUPPORTED_VERSION: &str = "v0.8";

/// Versioned dataspace protocol namespace.
pub const DSPACE_NAMESPACE: &str = "https://w3id.org/dspace/v0.8/";

/// Compact prefix bound to [`DSPACE_NAMESPACE`].
pub const DSPACE_PREFIX: &str = "dspace:";

/// ODRL namespace used for offers and agreements.
pub const ODRL_NAMESPACE: &str = "http://www.w3.org/ns/odrl/2/";

/// Compact prefix bound to [`ODRL_NAMESPACE`].
pub const ODRL_PREFIX: &str = "odrl:";

/// Participant identifier the engine uses when one is required.
pub const TCK_PARTICIPANT_ID: &str = "TCK_PARTICIPANT";

// ─────────────────────────────────────────────────────────────────────────────
// JSON-LD keywords
// ─────────────────────────────────────────────────────────────────────────────

pub const CONTEXT: &str = "@context";
pub const ID: &str = "@id";
pub const TYPE: &str = "@type";
pub const VALUE: &str = "@value";

// ─────────────────────────────────────────────────────────────────────────────
// Properties (compact)
// ─────────────────────────────────────────────────────────────────────────────

pub const CONSUMER_PID: &str = "dspace:consumerPid";
pub const PROVIDER_PID: &str = "dspace:providerPid";
pub const CALLBACK_ADDRESS: &str = "dspace:callbackAddress";
pub const OFFER: &str = "dspace:offer";
pub const AGREEMENT: &str = "dspace:agreement";
pub const EVENT_TYPE: &str = "dspace:eventType";
pub const STATE: &str = "dspace:state";
pub const CODE: &str = "dspace:code";
pub const REASON: &str = "dspace:reason";
pub const TIMESTAMP: &str = "dspace:timestamp";

// ─────────────────────────────────────────────────────────────────────────────
// Types (compact)
// ─────────────────────────────────────────────────────────────────────────────

pub const CONTRACT_REQUEST_MESSAGE: &str = "dspace:ContractRequestMessage";
pub const CONTRACT_OFFER_MESSAGE: &str = "dspace:ContractOfferMessage";
pub const CONTRACT_NEGOTIATION_EVENT_MESSAGE: &str = "dspace:ContractNegotiationEventMessage";
pub const CONTRACT_AGREEMENT_MESSAGE: &str = "dspace:ContractAgreementMessage";
pub const CONTRACT_AGREEMENT_VERIFICATION_MESSAGE: &str =
    "dspace:ContractAgreementVerificationMessage";
pub const CONTRACT_NEGOTIATION_TERMINATION_MESSAGE: &str =
    "dspace:ContractNegotiationTerminationMessage";
pub const CONTRACT_NEGOTIATION: &str = "dspace:ContractNegotiation";
pub const CONTRACT_NEGOTIATION_ERROR: &str = "dspace:ContractNegotiationError";

pub const EVENT_ACCEPTED: &str = "dspace:ACCEPTED";
pub const EVENT_FINALIZED: &str = "dspace:FINALIZED";

pub const ODRL_OFFER: &str = "odrl:Offer";
pub const ODRL_AGREEMENT: &str = "odrl:Agreement";
pub const ODRL_TARGET: &str = "odrl:target";
pub const ODRL_ASSIGNER: &str = "odrl:assigner";
pub const ODRL_ASSIGNEE: &str = "odrl:assignee";

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// The `@context` emitted on every encoded document.
#[must_use]
pub fn default_context() -> Value {
    serde_json::json!({
        "dspace": DSPACE_NAMESPACE,
        "odrl": ODRL_NAMESPACE,
    })
}

/// Convert an expanded dspace or ODRL IRI to its compact form.
///
/// Compact terms and JSON-LD keywords are returned unchanged.
#[must_use]
pub fn compact(term: &str) -> String {
    if let Some(local) = term.strip_prefix(DSPACE_NAMESPACE) {
        return format!("{DSPACE_PREFIX}{local}");
    }
    if let Some(local) = term.strip_prefix(ODRL_NAMESPACE) {
        return format!("{ODRL_PREFIX}{local}");
    }
    term.to_string()
}

/// Outcome of inspecting an `@context` for the dataspace namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextVersion {
    /// The supported namespace was found.
    Supported,
    /// A dataspace namespace with another version segment was found.
    Unsupported(String),
    /// No dataspace namespace present.
    Missing,
}

/// Inspect an `@context` value (string, array or object form).
#[must_use]
pub fn context_version(context: &Value) -> ContextVersion {
    let mut iris = Vec::new();
    collect_strings(context, &mut iris);

    let mut unsupported = None;
    for iri in iris {
        let Some(rest) = iri.strip_prefix(DSPACE_NAMESPACE_BASE) else {
            continue;
        };
        let version = rest.split('/').next().unwrap_or_default();
        if version == SUPPORTED_VERSION {
            return ContextVersion::Supported;
        }
        unsupported.get_or_insert_with(|| version.to_string());
    }
    unsupported.map_or(ContextVersion::Missing, ContextVersion::Unsupported)
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Read a scalar JSON-LD value as a string.
///
/// Accepts a plain string, `{"@value": ..}`, `{"@id": ..}`, or a
/// single-element array holding one of those.
#[must_use]
pub fn scalar_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map
            .get(VALUE)
            .or_else(|| map.get(ID))
            .and_then(Value::as_str),
        Value::Array(items) if items.len() == 1 => scalar_str(&items[0]),
        _ => None,
    }
}

/// Unwrap a single-element array, which expanded JSON-LD uses for every value.
#[must_use]
pub fn unwrap_singleton(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}
