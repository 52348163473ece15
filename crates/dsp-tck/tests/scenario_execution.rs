//! Scenario execution against a scripted SUT.

use std::time::Duration;

use dsp_protocol::{MessageType, NegotiationState, Role};
use dsp_tck::{
    ExchangeDecl, MessageTemplate, RetryPolicy, RunContext, Scenario, ScenarioStep, ScenarioVerdict,
};
use dsp_testkit::fixtures::{self, NEG};
use dsp_testkit::{
    MockSut, SimulatedSut, SutPlan, assert_history, assert_passed, assert_skipped_from, assert_step_failed, assert_verdict,
    deliver, init_test_tracing, trail,
};

const SUT_PID: &str = "sut-provider-1";

async fn provider_sut() -> MockSut {
    let sut = MockSut::start(Role::Provider).await;
    sut.accept_initial_request(SUT_PID).await;
    sut
}

#[tokio::test]
async fn request_then_offer_passes_with_full_history() {
    init_test_tracing();
    let sut = provider_sut().await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();
    let public_url = run.public_url().to_string();

    let scenario = fixtures::request_then_offer("request-offer");
    let counterparty = async {
        let request = sut.wait_for(MessageType::Request, Duration::from_secs(2)).await;
        let consumer_pid = fixtures::consumer_pid_of(&request);
        assert_eq!(
            request.callback_address(),
            Some(format!("{public_url}/consumer").as_str())
        );
        let offer = fixtures::offer(consumer_pid.as_str(), SUT_PID);
        deliver(&format!("{public_url}/consumer"), &offer, Role::Provider).await
    };
    let (report, status) = tokio::join!(run.run_scenario(&scenario), counterparty);

    assert_eq!(status, 200);
    assert_passed(report);
    assert_history(
        report,
        NEG,
        &[
            (MessageType::Request, NegotiationState::Requested),
            (MessageType::Offer, NegotiationState::Offered),
        ],
    );
    assert_eq!(
        trail(report, NEG).counterparty_pid.as_ref().map(|p| p.as_str()),
        Some(SUT_PID)
    );
}

#[tokio::test]
async fn early_agreement_fails_the_await_step() {
    init_test_tracing();
    let sut = provider_sut().await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();
    let public_url = run.public_url().to_string();

    let scenario = fixtures::request_then_offer("early-agreement")
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Offered));
    let counterparty = async {
        let request = sut.wait_for(MessageType::Request, Duration::from_secs(2)).await;
        let consumer_pid = fixtures::consumer_pid_of(&request);
        let agreement = fixtures::agreement(consumer_pid.as_str(), SUT_PID);
        deliver(&format!("{public_url}/consumer"), &agreement, Role::Provider).await
    };
    let (report, status) = tokio::join!(run.run_scenario(&scenario), counterparty);

    assert_eq!(status, 400);
    assert_verdict(report, ScenarioVerdict::Fail);
    assert_step_failed(report, 1, "illegal transition: AGREEMENT in state REQUESTED for CONSUMER");
    assert_skipped_from(report, 2);

    let neg = trail(report, NEG);
    assert_eq!(neg.state, NegotiationState::Requested);
    assert_eq!(neg.violations.len(), 1);
    assert_eq!(neg.violations[0].message_type, Some(MessageType::Agreement));
}

#[tokio::test]
async fn silent_sut_times_out_after_the_step_deadline() {
    init_test_tracing();
    let sut = provider_sut().await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();

    let scenario = fixtures::consumer_scenario("silent")
        .step(ScenarioStep::send(NEG, MessageTemplate::new(MessageType::Request)))
        .step(ScenarioStep::await_callback(
            NEG,
            [MessageType::Offer],
            Some(Duration::from_millis(200)),
        ));
    let report = run.run_scenario(&scenario).await;

    assert_verdict(report, ScenarioVerdict::Fail);
    assert_step_failed(report, 1, "within 200ms");
    assert!(report.steps[1].duration_ms >= 200, "{:?}", report.steps[1]);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    init_test_tracing();
    let sut = MockSut::start(Role::Provider).await;
    sut.fail_times("/negotiations/request", 503, 2).await;
    sut.accept_initial_request(SUT_PID).await;

    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_jitter: Duration::ZERO,
    };
    let config = fixtures::test_config(sut.base_url(), Role::Consumer).with_retry(retry);
    let mut run = RunContext::start(config).await.unwrap();

    let scenario = fixtures::consumer_scenario("retry")
        .step(ScenarioStep::send(NEG, MessageTemplate::new(MessageType::Request)));
    let report = run.run_scenario(&scenario).await;

    assert_passed(report);
    assert_eq!(sut.hits("/negotiations/request").await, 3);
}

#[tokio::test]
async fn rejected_request_fails_without_retry() {
    init_test_tracing();
    let sut = MockSut::start(Role::Provider).await;
    sut.reject("/negotiations/request", 400, "offer unknown").await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();

    let report = run
        .run_scenario(&fixtures::request_then_offer("rejected"))
        .await;

    assert_verdict(report, ScenarioVerdict::Fail);
    assert_step_failed(report, 0, "HTTP 400");
    assert_eq!(sut.hits("/negotiations/request").await, 1);
}

#[tokio::test]
async fn duplicate_process_id_errors_the_scenario() {
    init_test_tracing();
    let sut = provider_sut().await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();

    let scenario = Scenario::new("duplicate-pid")
        .with_role(Role::Consumer)
        .exchange(ExchangeDecl::new("a").with_process_id("fixed-pid"))
        .exchange(ExchangeDecl::new("b").with_process_id("fixed-pid"))
        .step(ScenarioStep::assert_state("a", NegotiationState::Initial));
    let report = run.run_scenario(&scenario).await;

    assert_verdict(report, ScenarioVerdict::Error);
    assert!(report.error.is_some());
    assert!(run.store().is_empty(), "begun exchanges must be released");
}

#[tokio::test]
async fn wrong_state_violation_passes_when_sut_rejects_it() {
    init_test_tracing();
    let sut = provider_sut().await;
    sut.reject(
        &format!("/negotiations/{SUT_PID}/agreement/verification"),
        400,
        "not in AGREED",
    )
    .await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();
    let public_url = run.public_url().to_string();

    let scenario = fixtures::request_then_offer("wrong-state")
        .step(ScenarioStep::send_violation(
            NEG,
            MessageTemplate::new(MessageType::Verification),
            dsp_tck::ViolationKind::WrongState,
        ))
        .step(ScenarioStep::assert_state(NEG, NegotiationState::Offered));
    let counterparty = async {
        let request = sut.wait_for(MessageType::Request, Duration::from_secs(2)).await;
        let offer = fixtures::offer(fixtures::consumer_pid_of(&request).as_str(), SUT_PID);
        deliver(&format!("{public_url}/consumer"), &offer, Role::Provider).await
    };
    let (report, _) = tokio::join!(run.run_scenario(&scenario), counterparty);

    assert_passed(report);
    assert_eq!(trail(report, NEG).violations.len(), 1);
}

#[tokio::test]
async fn simulated_provider_calls_back_with_an_offer() {
    init_test_tracing();
    let sut = SimulatedSut::start(SutPlan::conformant()).await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();

    let report = run
        .run_scenario(&fixtures::request_then_offer("simulated-offer"))
        .await;

    assert_passed(report);
    assert_eq!(
        trail(report, NEG).counterparty_pid.as_ref().map(|p| p.as_str()),
        Some("sim-1")
    );
    assert_eq!(sut.received(), [MessageType::Request]);
    assert_eq!(sut.state("sim-1"), Some(NegotiationState::Offered));
    sut.shutdown().await;
}

#[tokio::test]
async fn simulated_provider_skipping_the_offer_is_caught() {
    init_test_tracing();
    let sut = SimulatedSut::start(
        SutPlan::silent().on(MessageType::Request, [MessageType::Agreement]),
    )
    .await;
    let mut run = RunContext::start(fixtures::test_config(sut.base_url(), Role::Consumer))
        .await
        .unwrap();

    let report = run
        .run_scenario(&fixtures::request_then_offer("simulated-agreement"))
        .await;

    assert_verdict(report, ScenarioVerdict::Fail);
    assert_step_failed(report, 1, "illegal transition: AGREEMENT in state REQUESTED for CONSUMER");
    assert_eq!(trail(report, NEG).violations.len(), 1);
    sut.shutdown().await;
}
