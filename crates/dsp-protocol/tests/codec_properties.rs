//! Property tests for the message codec.
//!
//! - Round-trip: `decode(encode(m)) == m` for every valid message
//! - Expanded-form input decodes to the same message as compact input
//! - Stripping a mandatory term always fails decoding
//! - An empty process id never encodes, mandatory or not

#![forbid(unsafe_code)]

use dsp_protocol::{
    MessageType, ProcessId, ProtocolMessage, Role, decode, encode, to_document, vocab,
};
use proptest::prelude::*;
use serde_json::{Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

fn pid() -> impl Strategy<Value = ProcessId> {
    "urn:uuid:[a-f0-9]{8}-[a-f0-9]{4}".prop_map(ProcessId::new)
}

fn message_type() -> impl Strategy<Value = MessageType> {
    prop::sample::select(MessageType::ALL.to_vec())
}

fn extra_fields() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(
        (
            "(vendor|ext):[a-z]{1,8}",
            prop_oneof![
                any::<i64>().prop_map(|n| json!(n)),
                "[ -~]{0,16}".prop_map(|s| json!(s)),
                any::<bool>().prop_map(|b| json!({"flag": b})),
            ],
        ),
        0..4,
    )
}

/// An `@id` object, or the same object wrapped in a one-element array.
fn id_term() -> impl Strategy<Value = Value> {
    ("[a-z]{1,6}", any::<bool>()).prop_map(|(id, wrapped)| {
        let term = json!({"@id": id});
        if wrapped { json!([term]) } else { term }
    })
}

prop_compose! {
    fn valid_message()(
        message_type in message_type(),
        consumer in pid(),
        provider in pid(),
        initial in any::<bool>(),
        offer_id in "offer-[0-9]{1,4}",
        extras in extra_fields(),
        stray_offer in prop::option::of(id_term()),
        stray_agreement in prop::option::of(id_term()),
    ) -> ProtocolMessage {
        let mut message = ProtocolMessage::new(message_type)
            .with_consumer_pid(consumer)
            .with_provider_pid(provider);
        match message_type {
            MessageType::Request | MessageType::Offer => {
                message = message
                    .with_offer_id(offer_id)
                    .with_callback_address("http://localhost:8083/callback");
                if initial {
                    let receiver = message_type
                        .originator()
                        .map(dsp_protocol::Role::counterparty);
                    if let Some(receiver) = receiver {
                        message.set_process_id(receiver, None);
                    }
                }
            }
            MessageType::Agreement => {
                message = message.with_field(
                    vocab::AGREEMENT,
                    json!({"@type": vocab::ODRL_AGREEMENT, "@id": offer_id}),
                );
            }
            _ => {}
        }
        // Terms the type does not require ride along in whatever shape they have.
        if let Some(offer) = stray_offer {
            if !matches!(message_type, MessageType::Request | MessageType::Offer) {
                message = message.with_field(vocab::OFFER, offer);
            }
        }
        if let Some(agreement) = stray_agreement {
            if message_type != MessageType::Agreement {
                message = message.with_field(vocab::AGREEMENT, agreement);
            }
        }
        for (key, value) in extras {
            message = message.with_field(key, value);
        }
        message
    }
}

/// Rewrite every compact `dspace:` key to its expanded IRI and wrap scalars.
fn expand(document: &Value) -> Value {
    let Value::Object(map) = document else {
        return document.clone();
    };
    let mut out = serde_json::Map::new();
    for (key, value) in map {
        let expanded_key = key
            .strip_prefix(vocab::DSPACE_PREFIX)
            .map_or_else(|| key.clone(), |local| format!("{}{local}", vocab::DSPACE_NAMESPACE));
        let expanded_value = match (key.as_str(), value) {
            (vocab::CONSUMER_PID | vocab::PROVIDER_PID, Value::String(s)) => json!([{"@value": s}]),
            (vocab::TYPE, Value::String(s)) => json!([s.replace(
                vocab::DSPACE_PREFIX,
                vocab::DSPACE_NAMESPACE
            )]),
            _ => value.clone(),
        };
        out.insert(expanded_key, expanded_value);
    }
    Value::Object(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_round_trip(message in valid_message()) {
        let bytes = encode(&message).expect("valid message encodes");
        let decoded = decode(&bytes).expect("encoded message decodes");
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn prop_expanded_form_decodes_identically(message in valid_message()) {
        let compact = to_document(&message).expect("valid message encodes");
        let expanded = serde_json::to_vec(&expand(&compact)).expect("serializable");
        let decoded = decode(&expanded).expect("expanded form decodes");
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn prop_missing_pid_fails(message in valid_message()) {
        let mut document = to_document(&message).expect("valid message encodes");
        let key = match message.message_type {
            MessageType::Offer => vocab::PROVIDER_PID,
            _ => vocab::CONSUMER_PID,
        };
        document.as_object_mut().expect("object").remove(key);
        let bytes = serde_json::to_vec(&document).expect("serializable");
        prop_assert!(decode(&bytes).is_err());
    }

    #[test]
    fn prop_empty_pid_never_encodes(message in valid_message(), provider_side in any::<bool>()) {
        let role = if provider_side { Role::Provider } else { Role::Consumer };
        let mut message = message;
        message.set_process_id(role, Some(ProcessId::new("")));
        prop_assert!(encode(&message).is_err());
    }
}
