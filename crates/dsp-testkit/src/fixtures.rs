//! Test fixtures: configurations, messages and small scenarios.

use std::time::Duration;

use dsp_protocol::{MessageType, ProcessId, ProtocolMessage, Role, vocab};
use dsp_tck::catalog::INITIATE_PATH;
use dsp_tck::{
    CounterpartyScript, ExchangeDecl, LocalConnector, LocalConnectorOptions, MessageTemplate,
    RetryPolicy, Scenario, ScenarioStep, ServerHandle, TckConfig,
};
use serde_json::json;

/// Offer id used by every fixture.
pub const OFFER_ID: &str = "urn:uuid:fixture-offer";

/// Alias of the single exchange in fixture scenarios.
pub const NEG: &str = "neg";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration with short timeouts and no retry, bound to an ephemeral
/// loopback port.
#[must_use]
pub fn test_config(base_url: impl Into<String>, role: Role) -> TckConfig {
    let mut config = TckConfig::new(base_url)
        .with_role(role)
        .with_callback_timeout(Duration::from_secs(2))
        .with_scenario_timeout(Duration::from_secs(10))
        .with_request_timeout(Duration::from_secs(2))
        .with_retry(RetryPolicy::no_retry());
    config.offer_id = OFFER_ID.to_string();
    config
}

/// Start a conformant local connector on an ephemeral port.
///
/// # Panics
///
/// Panics if the listener cannot bind.
pub async fn local_connector() -> (LocalConnector, ServerHandle) {
    LocalConnector::start(LocalConnectorOptions {
        offer_id: OFFER_ID.to_string(),
        ..LocalConnectorOptions::default()
    })
    .await
    .expect("local connector must start")
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// A provider's OFFER on an existing negotiation.
#[must_use]
pub fn offer(consumer_pid: &str, provider_pid: &str) -> ProtocolMessage {
    ProtocolMessage::new(MessageType::Offer)
        .with_consumer_pid(consumer_pid)
        .with_provider_pid(provider_pid)
        .with_offer_id(OFFER_ID)
}

/// A provider's AGREEMENT on an existing negotiation.
#[must_use]
pub fn agreement(consumer_pid: &str, provider_pid: &str) -> ProtocolMessage {
    ProtocolMessage::new(MessageType::Agreement)
        .with_consumer_pid(consumer_pid)
        .with_provider_pid(provider_pid)
        .with_field(
            vocab::AGREEMENT,
            json!({
                "@id": "urn:uuid:fixture-agreement",
                "@type": "odrl:Agreement",
                "odrl:target": OFFER_ID,
            }),
        )
}

/// The consumer pid the engine put on a message it sent.
///
/// # Panics
///
/// Panics if the message carries none.
#[must_use]
pub fn consumer_pid_of(message: &ProtocolMessage) -> ProcessId {
    message
        .process_id(Role::Consumer)
        .cloned()
        .expect("message carries no consumerPid")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

/// Engine as consumer, no automatic replies.
#[must_use]
pub fn consumer_scenario(name: &str) -> Scenario {
    Scenario::new(name)
        .with_role(Role::Consumer)
        .exchange(ExchangeDecl::new(NEG).with_script(CounterpartyScript::manual()))
}

/// SEND REQUEST then AWAIT OFFER.
#[must_use]
pub fn request_then_offer(name: &str) -> Scenario {
    consumer_scenario(name)
        .step(ScenarioStep::send(NEG, MessageTemplate::new(MessageType::Request)))
        .step(ScenarioStep::await_callback(NEG, [MessageType::Offer], None))
}

/// Engine as provider waiting for a SUT-initiated REQUEST, triggered through
/// the SUT's initiate hook.
#[must_use]
pub fn provider_scenario(name: &str, script: CounterpartyScript) -> Scenario {
    Scenario::new(name)
        .with_role(Role::Provider)
        .exchange(ExchangeDecl::new(NEG).initiated_by_sut().with_script(script))
        .step(ScenarioStep::trigger(
            Some(NEG),
            INITIATE_PATH,
            json!({ "providerUrl": "{{provider_url}}", "offerId": "{{offer_id}}" }),
        ))
        .step(ScenarioStep::await_callback(NEG, [MessageType::Request], None))
}
