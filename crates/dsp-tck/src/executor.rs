//! Scenario executor: runs steps in order against the SUT and collects verdicts.
//!
//! Lifecycle: `INIT → RUNNING → PASSED | FAILED | ERRORED`. A scenario that
//! fails validation or cannot begin its exchanges goes straight to ERRORED.
//! An ERROR step aborts the scenario; a FAIL step aborts only when it is
//! fatal. Aborted steps are reported as SKIPPED.

use std::time::Duration;

use chrono::Utc;
use dsp_protocol::{MessageType, NegotiationSnapshot, ProcessId, Role, SenderRole, binding};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TckConfig;
use crate::correlation::{CorrelationStore, ExchangeParams};
use crate::driver::DriverClient;
use crate::error::{CorrelationError, DriverError, ScenarioError};
use crate::report::{
    ExchangeTrail, ScenarioReport, ScenarioState, ScenarioVerdict, StepOutcome, Verdict, aggregate,
};
use crate::responder::{Responder, callback_address};
use crate::retry::RetryPolicy;
use crate::scenario::{MessageTemplate, Scenario, ScenarioStep, ShapePredicate, StepKind};
use crate::violation::{self, ViolationKind};

const QUERY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run-wide values scenarios fall back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub role: Role,
    pub callback_timeout: Duration,
    pub scenario_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ExecutorSettings {
    #[must_use]
    pub const fn from_config(config: &TckConfig) -> Self {
        Self {
            role: config.role,
            callback_timeout: config.default_callback_timeout,
            scenario_timeout: config.scenario_timeout,
            retry: config.retry,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step failures
// ─────────────────────────────────────────────────────────────────────────────

/// Why a step did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepFailure {
    /// The SUT misbehaved.
    Fail(String),
    /// The harness or the scenario definition is broken.
    Error(String),
}

impl StepFailure {
    fn into_verdict(self) -> Verdict {
        match self {
            Self::Fail(reason) => Verdict::fail(reason),
            Self::Error(cause) => Verdict::error(cause),
        }
    }
}

impl From<CorrelationError> for StepFailure {
    fn from(err: CorrelationError) -> Self {
        if err.is_harness_error() {
            Self::Error(err.to_string())
        } else {
            Self::Fail(err.to_string())
        }
    }
}

impl From<DriverError> for StepFailure {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NoRoute { .. } => Self::Error(err.to_string()),
            other => Self::Fail(other.to_string()),
        }
    }
}

impl From<ScenarioError> for StepFailure {
    fn from(err: ScenarioError) -> Self {
        Self::Error(err.to_string())
    }
}

type StepResult = Result<Option<String>, StepFailure>;

/// Alias to pid bindings of one scenario run.
struct Bindings {
    scenario: String,
    exchanges: Vec<(String, ProcessId)>,
}

impl Bindings {
    fn pid(&self, alias: &str) -> Result<&ProcessId, StepFailure> {
        self.exchanges
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, pid)| pid)
            .ok_or_else(|| StepFailure::Error(format!("exchange {alias} is not bound")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Executes scenarios against one SUT. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ScenarioExecutor {
    responder: Responder,
    settings: ExecutorSettings,
}

impl ScenarioExecutor {
    #[must_use]
    pub const fn new(responder: Responder, settings: ExecutorSettings) -> Self {
        Self {
            responder,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    fn store(&self) -> &CorrelationStore {
        self.responder.store()
    }

    fn driver(&self) -> &DriverClient {
        self.responder.driver()
    }

    /// Run one scenario to completion. Never panics on SUT behaviour; every
    /// outcome ends up in the report.
    pub async fn execute(&self, scenario: &Scenario) -> ScenarioReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut state = ScenarioState::Init;
        info!(scenario = %scenario.name, "scenario started");

        if let Err(err) = scenario.validate(self.settings.scenario_timeout) {
            warn!(scenario = %scenario.name, error = %err, "scenario rejected");
            return Self::errored(scenario, started_at, clock, Vec::new(), err.to_string());
        }

        let bindings = match self.begin_exchanges(scenario) {
            Ok(bindings) => bindings,
            Err((trails, cause)) => {
                warn!(scenario = %scenario.name, error = %cause, "exchanges could not be begun");
                return Self::errored(scenario, started_at, clock, trails, cause);
            }
        };

        advance(&mut state, ScenarioState::Running);
        // Steps and teardown share one deadline.
        let deadline = clock + scenario.timeout(self.settings.scenario_timeout);
        let mut steps = self.run_steps(&bindings, &scenario.steps, deadline).await;
        self.collect_faults(&bindings, &mut steps);
        let teardown = if scenario.teardown.is_empty() {
            Vec::new()
        } else {
            self.run_steps(&bindings, &scenario.teardown, deadline).await
        };
        let exchanges = self.finish_exchanges(&bindings);

        let verdict = aggregate(&steps);
        advance(&mut state, ScenarioState::finished(verdict));
        let duration_ms = elapsed_ms(clock);
        info!(
            scenario = %scenario.name,
            verdict = %verdict,
            duration_ms,
            "scenario finished"
        );
        ScenarioReport {
            scenario: scenario.name.clone(),
            verdict,
            state,
            started_at,
            duration_ms,
            steps,
            teardown,
            exchanges,
            error: None,
        }
    }

    fn errored(
        scenario: &Scenario,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        exchanges: Vec<ExchangeTrail>,
        cause: String,
    ) -> ScenarioReport {
        ScenarioReport {
            scenario: scenario.name.clone(),
            verdict: ScenarioVerdict::Error,
            state: ScenarioState::Errored,
            started_at,
            duration_ms: elapsed_ms(clock),
            steps: Vec::new(),
            teardown: Vec::new(),
            exchanges,
            error: Some(cause),
        }
    }

    /// Begin every declared exchange and register its script. On failure the
    /// exchanges begun so far are ended again.
    fn begin_exchanges(&self, scenario: &Scenario) -> Result<Bindings, (Vec<ExchangeTrail>, String)> {
        let mut bindings = Bindings {
            scenario: scenario.name.clone(),
            exchanges: Vec::with_capacity(scenario.exchanges.len()),
        };
        for decl in &scenario.exchanges {
            let pid = decl.process_id.clone().unwrap_or_else(ProcessId::generate);
            let mut params = ExchangeParams::new(pid.clone(), scenario.role_of(decl, self.settings.role))
                .initiated_by(decl.initiated_by)
                .owned_by(scenario.name.clone());
            if let Some(offer_id) = &decl.offer_id {
                params = params.with_offer_id(offer_id.clone());
            }
            if let Err(err) = self.store().begin(params) {
                let trails = self.finish_exchanges(&bindings);
                return Err((trails, err.to_string()));
            }
            if let Some(script) = &decl.script {
                self.responder.register(pid.clone(), script.clone());
            }
            debug!(scenario = %scenario.name, alias = %decl.alias, process_id = %pid, "exchange bound");
            bindings.exchanges.push((decl.alias.clone(), pid));
        }
        Ok(bindings)
    }

    fn finish_exchanges(&self, bindings: &Bindings) -> Vec<ExchangeTrail> {
        bindings
            .exchanges
            .iter()
            .filter_map(|(alias, pid)| {
                self.store().cancel_pending(pid);
                self.responder.unregister(pid);
                self.store()
                    .end_exchange(pid)
                    .map(|exchange| ExchangeTrail::from_exchange(alias.clone(), &exchange))
            })
            .collect()
    }

    /// Faults nobody awaited (illegal unsolicited messages, responder
    /// failures) become failures of the scenario.
    fn collect_faults(&self, bindings: &Bindings, steps: &mut Vec<StepOutcome>) {
        for (alias, pid) in &bindings.exchanges {
            if let Some(fault) = self.store().take_fault(pid) {
                warn!(scenario = %bindings.scenario, process_id = %pid, error = %fault, "unsolicited fault");
                steps.push(StepOutcome {
                    index: steps.len(),
                    label: format!("unsolicited fault on {alias}"),
                    kind: "fault".into(),
                    verdict: Verdict::fail(fault.to_string()),
                    duration_ms: 0,
                    detail: None,
                });
            }
        }
    }

    async fn run_steps(
        &self,
        bindings: &Bindings,
        steps: &[ScenarioStep],
        deadline: Instant,
    ) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut aborted = false;

        for (index, step) in steps.iter().enumerate() {
            let label = step.describe();
            if aborted {
                outcomes.push(StepOutcome {
                    index,
                    label,
                    kind: step.kind_name().into(),
                    verdict: Verdict::Skipped,
                    duration_ms: 0,
                    detail: None,
                });
                continue;
            }

            let started = Instant::now();
            let (verdict, detail) = match self.run_step(bindings, step, deadline).await {
                Ok(detail) => (Verdict::Pass, detail),
                Err(failure) => (failure.into_verdict(), None),
            };
            debug!(
                scenario = %bindings.scenario,
                step = index,
                kind = step.kind_name(),
                verdict = %verdict,
                "step finished"
            );
            if verdict.is_error() || (verdict.is_fail() && step.fatal) {
                aborted = true;
            }
            outcomes.push(StepOutcome {
                index,
                label,
                kind: step.kind_name().into(),
                verdict,
                duration_ms: elapsed_ms(started),
                detail,
            });
        }
        outcomes
    }

    async fn run_step(&self, bindings: &Bindings, step: &ScenarioStep, deadline: Instant) -> StepResult {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StepFailure::Fail("scenario timeout elapsed".into()));
        }

        match &step.kind {
            StepKind::Await {
                exchange,
                expect,
                deadline_ms,
            } => {
                let wait = deadline_ms
                    .map_or(self.settings.callback_timeout, Duration::from_millis)
                    .min(remaining);
                self.await_message(bindings.pid(exchange)?, expect, wait).await
            }
            _ => match tokio::time::timeout(remaining, self.run_bounded(bindings, &step.kind)).await {
                Ok(result) => result,
                Err(_) => Err(StepFailure::Fail(format!(
                    "scenario timeout elapsed after {}ms",
                    remaining.as_millis()
                ))),
            },
        }
    }

    async fn run_bounded(&self, bindings: &Bindings, kind: &StepKind) -> StepResult {
        match kind {
            StepKind::Send {
                exchange,
                message,
                inject: None,
            } => self.send(bindings.pid(exchange)?, message).await,
            StepKind::Send {
                exchange,
                message,
                inject: Some(violation),
            } => self.send_violation(bindings.pid(exchange)?, message, *violation).await,
            StepKind::AssertState { exchange, state } => {
                let actual = self.store().snapshot(bindings.pid(exchange)?)?.state();
                if actual == *state {
                    Ok(None)
                } else {
                    Err(StepFailure::Fail(format!("state is {actual}, expected {state}")))
                }
            }
            StepKind::AssertShape {
                exchange,
                predicate,
            } => self.assert_shape(bindings.pid(exchange)?, predicate),
            StepKind::QueryState { exchange, state } => {
                self.query_state(bindings.pid(exchange)?, *state).await
            }
            StepKind::Trigger {
                exchange,
                path,
                body,
            } => {
                let pid = exchange.as_deref().map(|alias| bindings.pid(alias)).transpose()?;
                self.trigger(pid, path, body).await
            }
            StepKind::Await { .. } => Err(StepFailure::Error("await is not a bounded step".into())),
        }
    }

    async fn await_message(&self, pid: &ProcessId, expect: &[MessageType], wait: Duration) -> StepResult {
        let message = self.store().await_callback(pid, expect, wait).await?;
        Ok(Some(format!("received {}", message.message_type)))
    }

    async fn send(&self, pid: &ProcessId, template: &MessageTemplate) -> StepResult {
        let exchange = self.store().snapshot(pid)?;
        let role = exchange.role();
        let message = template.materialize(&self.responder.template_context(&exchange))?;
        let url = self.driver().message_url(&exchange, &message)?;

        self.store()
            .record_transition(pid, &message, SenderRole::Tck)
            .map_err(|err| StepFailure::Error(format!("engine would send an illegal message: {err}")))?;

        let driver = self.driver();
        let outcome = self
            .settings
            .retry
            .run("send", || driver.send(&url, &message))
            .await?;

        if let Some(snapshot) = outcome.snapshot() {
            if let Some(own) = pid_of(snapshot, role) {
                if own != pid {
                    return Err(StepFailure::Fail(format!(
                        "acknowledgement names {own} as the {} pid, expected {pid}",
                        role.as_str()
                    )));
                }
            }
            if let Some(counterparty) = pid_of(snapshot, role.counterparty()) {
                self.store().bind_counterparty(pid, counterparty.clone())?;
            }
        }
        if let Some(document) = outcome.document() {
            self.store().set_last_received(pid, document)?;
        }
        if message.is_initial() && self.store().snapshot(pid)?.counterparty_pid().is_none() {
            return Err(StepFailure::Fail(format!(
                "acknowledgement of the initial {} carries no {}",
                message.message_type,
                role.counterparty().pid_term()
            )));
        }
        Ok(Some(format!("HTTP {}", outcome.status)))
    }

    async fn send_violation(
        &self,
        pid: &ProcessId,
        template: &MessageTemplate,
        kind: ViolationKind,
    ) -> StepResult {
        let exchange = self.store().snapshot(pid)?;
        let message = template.materialize(&self.responder.template_context(&exchange))?;
        let prepared = violation::prepare(kind, exchange.role(), exchange.state(), message)
            .map_err(StepFailure::Error)?;
        let url = binding::join(self.driver().sut_base(&exchange), &prepared.path);
        self.store().record_violation(
            pid,
            Some(prepared.message_type),
            SenderRole::Tck,
            format!("injected {kind}"),
        )?;

        let driver = self.driver();
        let result = self
            .settings
            .retry
            .run("send violation", || driver.send_raw(&url, prepared.body.clone()))
            .await;
        match result {
            Ok(outcome) => Err(StepFailure::Fail(format!(
                "SUT accepted {kind} {} with HTTP {}",
                prepared.message_type, outcome.status
            ))),
            Err(DriverError::ProtocolHttp { status, .. }) if (400..500).contains(&status) => {
                Ok(Some(format!("rejected with HTTP {status}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn assert_shape(&self, pid: &ProcessId, predicate: &ShapePredicate) -> StepResult {
        let exchange = self.store().snapshot(pid)?;
        let document = exchange
            .last_received()
            .ok_or_else(|| StepFailure::Fail("nothing received from the SUT yet".into()))?;
        predicate.evaluate(document).map_err(StepFailure::Fail)?;
        Ok(None)
    }

    /// The SUT may still be processing the last message, so a mismatch is
    /// re-queried until the callback timeout elapses.
    async fn query_state(
        &self,
        pid: &ProcessId,
        expected: Option<dsp_protocol::NegotiationState>,
    ) -> StepResult {
        let exchange = self.store().snapshot(pid)?;
        let counterparty = exchange
            .counterparty_pid()
            .ok_or_else(|| StepFailure::Fail("SUT pid is not known; nothing to query".into()))?;
        let url = self.driver().negotiation_url(&exchange, counterparty);
        let expected = expected.unwrap_or_else(|| exchange.state());
        let settle_by = Instant::now() + self.settings.callback_timeout;
        let driver = self.driver();

        loop {
            let (snapshot, document) = self
                .settings
                .retry
                .run("query negotiation", || driver.get_negotiation(&url))
                .await?;
            self.store().set_last_received(pid, document)?;
            if snapshot.state == expected {
                return Ok(Some(format!("SUT reports {}", snapshot.state)));
            }
            if Instant::now() >= settle_by {
                return Err(StepFailure::Fail(format!(
                    "SUT reports {}, expected {expected}",
                    snapshot.state
                )));
            }
            debug!(process_id = %pid, reported = %snapshot.state, %expected, "query not settled yet");
            tokio::time::sleep(QUERY_POLL_INTERVAL).await;
        }
    }

    /// Triggers are not idempotent and are sent exactly once.
    async fn trigger(&self, pid: Option<&ProcessId>, path: &str, body: &Value) -> StepResult {
        let exchange = pid.map(|pid| self.store().snapshot(pid)).transpose()?;
        let public_url = self.responder.public_url();
        let offer_id = exchange
            .as_ref()
            .and_then(|e| e.offer_id())
            .unwrap_or_else(|| self.responder.default_offer_id())
            .to_string();
        let vars = [
            ("public_url", public_url.to_string()),
            ("provider_url", callback_address(public_url, Role::Provider)),
            ("consumer_url", callback_address(public_url, Role::Consumer)),
            ("offer_id", offer_id),
            (
                "process_id",
                pid.map(|pid| pid.as_str().to_string()).unwrap_or_default(),
            ),
        ];
        let body = substitute(body, &vars);
        let url = binding::join(self.driver().base_url(), path);
        let outcome = self.driver().post_json(&url, &body).await?;
        if let (Some(pid), Some(document)) = (pid, outcome.document()) {
            self.store().set_last_received(pid, document)?;
        }
        Ok(Some(format!("HTTP {}", outcome.status)))
    }
}

fn pid_of(snapshot: &NegotiationSnapshot, role: Role) -> Option<&ProcessId> {
    match role {
        Role::Consumer => snapshot.consumer_pid.as_ref(),
        Role::Provider => snapshot.provider_pid.as_ref(),
    }
}

fn advance(state: &mut ScenarioState, next: ScenarioState) {
    debug_assert!(state.can_transition_to(next), "{state:?} -> {next:?}");
    *state = next;
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Replace `{{name}}` placeholders in every string of `value`.
fn substitute(value: &Value, vars: &[(&str, String)]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for (name, replacement) in vars {
                out = out.replace(&format!("{{{{{name}}}}}"), replacement);
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dsp_protocol::{IllegalTransition, NegotiationState};
    use serde_json::json;

    use super::*;
    use crate::scenario::ExchangeDecl;

    #[test]
    fn placeholders_are_replaced_recursively() {
        let vars = [
            ("provider_url", "http://tck/provider".to_string()),
            ("offer_id", "offer-1".to_string()),
        ];
        let body = json!({
            "providerUrl": "{{provider_url}}",
            "nested": {"offers": ["{{offer_id}}", 3]},
            "untouched": "{{unknown}}",
        });
        assert_eq!(
            substitute(&body, &vars),
            json!({
                "providerUrl": "http://tck/provider",
                "nested": {"offers": ["offer-1", 3]},
                "untouched": "{{unknown}}",
            })
        );
    }

    fn executor(scenario_timeout: Duration) -> ScenarioExecutor {
        let store = Arc::new(CorrelationStore::new());
        let driver = DriverClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let responder = Responder::new(
            store,
            driver,
            RetryPolicy::no_retry(),
            false,
            "http://tck",
            "offer-1",
        );
        ScenarioExecutor::new(
            responder,
            ExecutorSettings {
                role: Role::Consumer,
                callback_timeout: Duration::from_millis(500),
                scenario_timeout,
                retry: RetryPolicy::no_retry(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_runs_within_the_scenario_deadline() {
        let executor = executor(Duration::from_millis(1000));
        let scenario = Scenario::new("slow-teardown")
            .with_role(Role::Consumer)
            .exchange(ExchangeDecl::new("neg"))
            .step(ScenarioStep::await_callback(
                "neg",
                [MessageType::Offer],
                Some(Duration::from_millis(600)),
            ))
            .teardown_step(ScenarioStep::await_callback(
                "neg",
                [MessageType::Terminate],
                Some(Duration::from_millis(900)),
            ));

        let clock = Instant::now();
        let report = executor.execute(&scenario).await;

        assert!(clock.elapsed() <= Duration::from_millis(1000), "{:?}", clock.elapsed());
        assert!(report.duration_ms <= 1000, "{}", report.duration_ms);
        assert_eq!(report.verdict, ScenarioVerdict::Fail);
        assert_eq!(report.teardown.len(), 1);
        assert!(report.teardown[0].verdict.is_fail());
        assert!(executor.store().is_empty());
    }

    #[test]
    fn failures_are_classified() {
        let illegal = CorrelationError::IllegalTransition(IllegalTransition {
            current_state: NegotiationState::Requested,
            attempted_type: MessageType::Agreement,
            role: Role::Consumer,
        });
        assert!(matches!(StepFailure::from(illegal), StepFailure::Fail(_)));
        assert!(matches!(
            StepFailure::from(CorrelationError::DuplicateProcess("p".into())),
            StepFailure::Error(_)
        ));
        assert!(matches!(
            StepFailure::from(DriverError::Transport("refused".into())),
            StepFailure::Fail(_)
        ));
        assert!(matches!(
            StepFailure::from(DriverError::NoRoute {
                message_type: MessageType::Offer,
                sender: Role::Consumer,
            }),
            StepFailure::Error(_)
        ));
        assert!(matches!(
            StepFailure::from(ScenarioError::NotFound("x".into())),
            StepFailure::Error(_)
        ));
    }
}
