//! The built-in catalog against the in-process conformant connector.

use std::sync::Arc;

use dsp_protocol::{Direction, MessageType, NegotiationState, Role};
use dsp_tck::{
    ContractNegotiation, CounterpartyScript, NegotiationListener, RunContext, ScenarioRegistry,
    ScenarioStep,
};
use dsp_testkit::fixtures::{self, NEG};
use dsp_testkit::{assert_history, assert_passed, assert_run_passed, init_test_tracing};
use parking_lot::Mutex;

#[derive(Default)]
struct Transitions(Mutex<Vec<(MessageType, Direction)>>);

impl NegotiationListener for Transitions {
    fn on_transition(&self, _: &ContractNegotiation, message_type: MessageType, direction: Direction) {
        self.0.lock().push((message_type, direction));
    }
}

#[tokio::test]
async fn consumer_catalog_passes() {
    init_test_tracing();
    let (connector, server) = fixtures::local_connector().await;
    let mut run = RunContext::start(fixtures::test_config(connector.provider_url(), Role::Consumer))
        .await
        .unwrap();

    let scenarios = ScenarioRegistry::builtin().for_role(Role::Consumer, Role::Consumer);
    assert!(!scenarios.is_empty());
    run.run_all(&scenarios).await;
    let report = run.finalize().await;
    server.shutdown().await;

    assert_run_passed(&report);
    assert_eq!(report.totals.scenarios, scenarios.len());
    assert!(report.unmatched_exchanges.is_empty());
}

#[tokio::test]
async fn provider_catalog_passes() {
    init_test_tracing();
    let (connector, server) = fixtures::local_connector().await;
    let mut run = RunContext::start(fixtures::test_config(connector.consumer_url(), Role::Provider))
        .await
        .unwrap();

    let scenarios = ScenarioRegistry::builtin().for_role(Role::Provider, Role::Provider);
    assert!(!scenarios.is_empty());
    run.run_all(&scenarios).await;
    let report = run.finalize().await;
    server.shutdown().await;

    assert_run_passed(&report);
}

#[tokio::test]
async fn connector_sees_the_same_exchange() {
    init_test_tracing();
    let (connector, server) = fixtures::local_connector().await;
    let transitions = Arc::new(Transitions::default());
    connector.add_listener(transitions.clone());
    let mut run = RunContext::start(fixtures::test_config(connector.provider_url(), Role::Consumer))
        .await
        .unwrap();

    let report = run
        .run_scenario(&fixtures::request_then_offer("request-offer"))
        .await;
    assert_passed(report);
    assert_history(
        report,
        NEG,
        &[
            (MessageType::Request, NegotiationState::Requested),
            (MessageType::Offer, NegotiationState::Offered),
        ],
    );

    let engine_pid = report.exchange(NEG).unwrap().process_id.clone();
    let negotiations = connector.negotiations();
    assert_eq!(negotiations.len(), 1);
    assert_eq!(negotiations[0].role, Role::Provider);
    assert_eq!(negotiations[0].counterparty_pid.as_ref(), Some(&engine_pid));
    assert_eq!(negotiations[0].state, NegotiationState::Offered);
    assert_eq!(
        transitions.0.lock().as_slice(),
        [
            (MessageType::Request, Direction::Inbound),
            (MessageType::Offer, Direction::Outbound),
        ]
    );
    server.shutdown().await;
}

#[tokio::test]
async fn sut_initiated_request_is_claimed_by_the_waiting_scenario() {
    init_test_tracing();
    let (connector, server) = fixtures::local_connector().await;
    let mut run = RunContext::start(fixtures::test_config(connector.consumer_url(), Role::Provider))
        .await
        .unwrap();

    let scenario = fixtures::provider_scenario("claim", CounterpartyScript::manual())
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Requested));
    let report = run.run_scenario(&scenario).await;
    assert_passed(report);

    let neg = report.exchange(NEG).unwrap();
    let consumer_side = connector
        .negotiation(Role::Consumer, neg.counterparty_pid.as_ref().unwrap())
        .unwrap();
    assert_eq!(consumer_side.state, NegotiationState::Requested);
    server.shutdown().await;
}
