//! Built-in contract negotiation scenarios.
//!
//! Consumer scenarios put the engine in the consumer role against a provider
//! SUT. Provider scenarios need a consumer SUT that starts a negotiation when
//! it receives a POST on [`INITIATE_PATH`] with the body
//! `{"providerUrl": .., "offerId": ..}`.

use dsp_protocol::{MessageType, NegotiationState, Role};
use serde_json::json;

use crate::responder::{CounterpartyScript, ScriptAction};
use crate::scenario::{ExchangeDecl, MessageTemplate, Scenario, ScenarioStep, ShapePredicate};
use crate::violation::ViolationKind;

/// Path, relative to a consumer SUT's base URL, that makes it request a
/// contract from the engine.
pub const INITIATE_PATH: &str = "/tck/initiate";

const NEG: &str = "neg";

/// All built-in scenarios, consumer checks first.
#[must_use]
pub fn builtin() -> Vec<Scenario> {
    vec![
        consumer_full_negotiation(),
        consumer_terminates_after_offer(),
        consumer_malformed_request_rejected(),
        consumer_wrong_state_rejected(),
        consumer_unknown_process_rejected(),
        provider_full_negotiation(),
        provider_terminates_request(),
    ]
}

fn consumer(name: &str, description: &str) -> Scenario {
    Scenario::new(name)
        .describe(description)
        .with_role(Role::Consumer)
        .exchange(ExchangeDecl::new(NEG).with_script(CounterpartyScript::manual()))
}

fn send(message_type: MessageType) -> ScenarioStep {
    ScenarioStep::send(NEG, MessageTemplate::new(message_type))
}

fn expect(message_type: MessageType) -> ScenarioStep {
    ScenarioStep::await_callback(NEG, [message_type], None)
}

fn request_and_offer(scenario: Scenario) -> Scenario {
    scenario
        .step(send(MessageType::Request))
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Requested))
        .step(expect(MessageType::Offer))
        .step(
            ScenarioStep::assert_shape(
                NEG,
                ShapePredicate::All {
                    predicates: vec![
                        ShapePredicate::MessageType {
                            message_type: MessageType::Offer,
                        },
                        ShapePredicate::HasField {
                            pointer: "/dspace:offer/@id".into(),
                        },
                    ],
                },
            )
            .non_fatal(),
        )
}

/// Terminate whatever is left open; errors here never change the verdict.
fn terminate_teardown(scenario: Scenario) -> Scenario {
    scenario.teardown_step(send(MessageType::Terminate).labelled("terminate leftover negotiation"))
}

fn consumer_full_negotiation() -> Scenario {
    request_and_offer(consumer(
        "cn-consumer-full-negotiation",
        "REQUEST through FINALIZE with the engine as consumer",
    ))
    .step(send(MessageType::Accept))
    .step(expect(MessageType::Agreement))
    .step(
        ScenarioStep::assert_shape(
            NEG,
            ShapePredicate::HasField {
                pointer: "/dspace:agreement".into(),
            },
        )
        .non_fatal(),
    )
    .step(send(MessageType::Verification))
    .step(expect(MessageType::Finalize))
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Finalized))
    .step(ScenarioStep::query_state(NEG, Some(NegotiationState::Finalized)).non_fatal())
}

fn consumer_terminates_after_offer() -> Scenario {
    request_and_offer(consumer(
        "cn-consumer-terminate-after-offer",
        "the provider accepts a termination after its offer",
    ))
    .step(send(MessageType::Terminate))
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Terminated))
    .step(ScenarioStep::query_state(NEG, Some(NegotiationState::Terminated)).non_fatal())
}

fn consumer_malformed_request_rejected() -> Scenario {
    consumer(
        "cn-consumer-malformed-request-rejected",
        "a REQUEST without @type and consumerPid is refused with 4xx",
    )
    .step(ScenarioStep::send_violation(
        NEG,
        MessageTemplate::new(MessageType::Request),
        ViolationKind::MalformedPayload,
    ))
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Initial))
}

fn consumer_wrong_state_rejected() -> Scenario {
    terminate_teardown(
        request_and_offer(consumer(
            "cn-consumer-wrong-state-rejected",
            "a VERIFICATION while OFFERED is refused with 4xx",
        ))
        .step(ScenarioStep::send_violation(
            NEG,
            MessageTemplate::new(MessageType::Verification),
            ViolationKind::WrongState,
        ))
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Offered))
        .step(ScenarioStep::query_state(NEG, Some(NegotiationState::Offered)).non_fatal()),
    )
}

fn consumer_unknown_process_rejected() -> Scenario {
    terminate_teardown(
        request_and_offer(consumer(
            "cn-consumer-unknown-process-rejected",
            "an ACCEPT addressed to a provider pid the SUT never issued is refused",
        ))
        .step(ScenarioStep::send_violation(
            NEG,
            MessageTemplate::new(MessageType::Accept),
            ViolationKind::WrongProcessId,
        ))
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Offered)),
    )
}

fn provider(name: &str, description: &str, script: CounterpartyScript) -> Scenario {
    Scenario::new(name)
        .describe(description)
        .with_role(Role::Provider)
        .exchange(ExchangeDecl::new(NEG).initiated_by_sut().with_script(script))
        .step(ScenarioStep::trigger(
            Some(NEG),
            INITIATE_PATH,
            json!({
                "providerUrl": "{{provider_url}}",
                "offerId": "{{offer_id}}",
            }),
        ))
        .step(expect(MessageType::Request))
}

fn provider_full_negotiation() -> Scenario {
    provider(
        "cn-provider-full-negotiation",
        "the consumer SUT drives REQUEST through FINALIZE against the engine",
        CounterpartyScript::auto(),
    )
    .step(expect(MessageType::Accept))
    .step(expect(MessageType::Verification))
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Finalized))
    .step(ScenarioStep::query_state(NEG, Some(NegotiationState::Finalized)).non_fatal())
}

fn provider_terminates_request() -> Scenario {
    provider(
        "cn-provider-terminate-request",
        "the consumer SUT accepts a termination of its request",
        CounterpartyScript::auto().on(MessageType::Request, ScriptAction::Ignore),
    )
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Requested))
    .step(send(MessageType::Terminate))
    .step(ScenarioStep::assert_state(NEG, NegotiationState::Terminated))
    .step(ScenarioStep::query_state(NEG, Some(NegotiationState::Terminated)).non_fatal())
}
