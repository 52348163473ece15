//! Run context: everything one test run shares, with no global state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TckConfig;
use crate::correlation::{CorrelationStore, Exchange};
use crate::driver::DriverClient;
use crate::endpoint::Endpoint;
use crate::error::TckResult;
use crate::executor::{ExecutorSettings, ScenarioExecutor};
use crate::report::{ExchangeTrail, RunReport, ScenarioReport};
use crate::responder::Responder;
use crate::scenario::Scenario;
use crate::server::{ServerHandle, spawn_on};

/// Alias under which exchanges no scenario declared are reported.
pub const UNMATCHED_ALIAS: &str = "unmatched";

/// Periodically drops terminated exchanges no scenario owns, keeping what it
/// removed for the run report.
#[derive(Debug)]
struct Reaper {
    task: JoinHandle<()>,
    reaped: Arc<Mutex<Vec<Exchange>>>,
}

impl Reaper {
    fn spawn(store: Arc<CorrelationStore>, retention: Duration) -> Self {
        let reaped = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reaped);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(retention);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let removed = store.reap_terminal(retention);
                if !removed.is_empty() {
                    debug!(count = removed.len(), "retention elapsed for terminated exchanges");
                    sink.lock().extend(removed);
                }
            }
        });
        Self { task, reaped }
    }

    fn stop(self) -> Vec<Exchange> {
        self.task.abort();
        std::mem::take(&mut *self.reaped.lock())
    }
}

/// A started run: bound endpoint, shared store, accumulated reports.
#[derive(Debug)]
pub struct RunContext {
    config: TckConfig,
    run_id: String,
    started_at: DateTime<Utc>,
    store: Arc<CorrelationStore>,
    executor: ScenarioExecutor,
    server: ServerHandle,
    reaper: Reaper,
    public_url: String,
    reports: Vec<ScenarioReport>,
}

impl RunContext {
    /// Validate the configuration, bind the endpoint and build the shared
    /// store and driver.
    ///
    /// # Errors
    /// Configuration, HTTP client or bind errors.
    pub async fn start(config: TckConfig) -> TckResult<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let public_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{local_addr}"));

        let store = Arc::new(CorrelationStore::new());
        let driver = DriverClient::new(config.base_url.clone(), config.request_timeout)?;
        let responder = Responder::new(
            Arc::clone(&store),
            driver,
            config.retry,
            config.auto_respond,
            public_url.clone(),
            config.offer_id.clone(),
        );
        let endpoint = Endpoint::new(responder.clone());
        let server = spawn_on(listener, endpoint.router())?;
        let executor = ScenarioExecutor::new(responder, ExecutorSettings::from_config(&config));
        let reaper = Reaper::spawn(Arc::clone(&store), config.terminal_retention);

        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            sut = %config.base_url,
            role = %config.role,
            %public_url,
            "run started"
        );
        Ok(Self {
            config,
            run_id,
            started_at: Utc::now(),
            store,
            executor,
            server,
            reaper,
            public_url,
            reports: Vec::new(),
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub const fn config(&self) -> &TckConfig {
        &self.config
    }

    /// URL the SUT reaches the engine's endpoint at.
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<CorrelationStore> {
        &self.store
    }

    #[must_use]
    pub fn reports(&self) -> &[ScenarioReport] {
        &self.reports
    }

    /// Run one scenario and keep its report.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> &ScenarioReport {
        let report = self.executor.execute(scenario).await;
        self.reports.push(report);
        &self.reports[self.reports.len() - 1]
    }

    /// Run scenarios with at most `parallelism` in flight. Reports keep the
    /// order of `scenarios`.
    pub async fn run_all(&mut self, scenarios: &[Scenario]) -> &[ScenarioReport] {
        let first = self.reports.len();
        let executor = &self.executor;
        let reports: Vec<ScenarioReport> = stream::iter(scenarios)
            .map(|scenario| executor.execute(scenario))
            .buffered(self.config.parallelism.max(1))
            .collect()
            .await;
        self.reports.extend(reports);
        &self.reports[first..]
    }

    /// Shut the endpoint down and produce the run report. Exchanges still
    /// tracked, or reaped during the run, were opened by the SUT outside any
    /// scenario and are reported as unmatched.
    pub async fn finalize(self) -> RunReport {
        self.server.shutdown().await;

        let mut reaped = self.reaper.stop();
        reaped.extend(self.store.reap_terminal(Duration::ZERO));
        let mut unmatched: Vec<ExchangeTrail> = reaped
            .iter()
            .map(|exchange| ExchangeTrail::from_exchange(UNMATCHED_ALIAS, exchange))
            .collect();
        for pid in self.store.process_ids() {
            if let Some(exchange) = self.store.end_exchange(&pid) {
                unmatched.push(ExchangeTrail::from_exchange(UNMATCHED_ALIAS, &exchange));
            }
        }

        let report = RunReport::new(self.run_id, self.started_at, self.reports, unmatched);
        info!(
            run_id = %report.run_id,
            scenarios = report.totals.scenarios,
            passed = report.totals.passed,
            failed = report.totals.failed,
            errored = report.totals.errored,
            "run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use dsp_protocol::{MessageType, ProcessId, ProtocolMessage, Role, SenderRole};

    use super::*;
    use crate::retry::RetryPolicy;

    fn config(retention: Duration) -> TckConfig {
        TckConfig::new("http://127.0.0.1:9")
            .with_retry(RetryPolicy::no_retry())
            .with_terminal_retention(retention)
    }

    fn terminated(store: &CorrelationStore, pid: &str) -> ProcessId {
        let pid = ProcessId::new(pid);
        store.begin_exchange(pid.clone(), Role::Consumer).unwrap();
        let request = ProtocolMessage::new(MessageType::Request)
            .with_consumer_pid(pid.as_str())
            .with_offer_id("offer-1")
            .with_callback_address("http://tck/consumer");
        let terminate = ProtocolMessage::new(MessageType::Terminate)
            .with_consumer_pid(pid.as_str())
            .with_provider_pid("sut");
        store.record_transition(&pid, &request, SenderRole::Tck).unwrap();
        store.record_transition(&pid, &terminate, SenderRole::Tck).unwrap();
        pid
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_exchanges_are_reaped_during_the_run() {
        let run = RunContext::start(config(Duration::from_secs(1))).await.unwrap();
        let pid = terminated(run.store(), "stale");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(run.store().contains(&pid));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!run.store().contains(&pid));

        let report = run.finalize().await;
        assert_eq!(report.unmatched_exchanges.len(), 1);
        assert_eq!(report.unmatched_exchanges[0].alias, UNMATCHED_ALIAS);
    }
}
