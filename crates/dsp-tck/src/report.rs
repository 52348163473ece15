//! Verdicts and structured run reports.

use std::fmt;
use std::io::{self, Write as _};
use std::path::Path;

use chrono::{DateTime, Utc};
use dsp_protocol::{NegotiationState, ProcessId, Role, SenderRole};
use serde::{Deserialize, Serialize};

use crate::correlation::{Exchange, HistoryEntry, Violation};

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail { reason: String },
    Error { cause: String },
    /// Not executed because an earlier step aborted the scenario.
    Skipped,
}

impl Verdict {
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn error(cause: impl Into<String>) -> Self {
        Self::Error {
            cause: cause.into(),
        }
    }

    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[must_use]
    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail { .. } => "FAIL",
            Self::Error { .. } => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Failure reason or error cause.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Fail { reason } => Some(reason),
            Self::Error { cause } => Some(cause),
            Self::Pass | Self::Skipped => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}({message})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Overall scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioVerdict {
    Pass,
    Fail,
    Error,
}

impl ScenarioVerdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ScenarioVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Init,
    Running,
    Passed,
    Failed,
    Errored,
}

impl ScenarioState {
    /// Final state for a verdict.
    #[must_use]
    pub const fn finished(verdict: ScenarioVerdict) -> Self {
        match verdict {
            ScenarioVerdict::Pass => Self::Passed,
            ScenarioVerdict::Fail => Self::Failed,
            ScenarioVerdict::Error => Self::Errored,
        }
    }

    /// Whether `self → next` is a legal lifecycle move.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Running | Self::Errored)
                | (Self::Running, Self::Passed | Self::Failed | Self::Errored)
        )
    }
}

/// Scenario verdict from its step outcomes: ERROR over FAIL over PASS.
#[must_use]
pub fn aggregate(steps: &[StepOutcome]) -> ScenarioVerdict {
    if steps.iter().any(|s| s.verdict.is_error()) {
        ScenarioVerdict::Error
    } else if steps.iter().any(|s| s.verdict.is_fail()) {
        ScenarioVerdict::Fail
    } else {
        ScenarioVerdict::Pass
    }
}

/// One reported step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub label: String,
    pub kind: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Final view of one exchange, with its full message trail.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeTrail {
    pub alias: String,
    pub process_id: ProcessId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_pid: Option<ProcessId>,
    pub initiated_by: SenderRole,
    pub state: NegotiationState,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl ExchangeTrail {
    #[must_use]
    pub fn from_exchange(alias: impl Into<String>, exchange: &Exchange) -> Self {
        Self {
            alias: alias.into(),
            process_id: exchange.process_id().clone(),
            role: exchange.role(),
            counterparty_pid: exchange.counterparty_pid().cloned(),
            initiated_by: exchange.initiated_by(),
            state: exchange.state(),
            history: exchange.history().to_vec(),
            violations: exchange.violations().to_vec(),
        }
    }

    /// `(message type, resulting state)` pairs, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<(dsp_protocol::MessageType, NegotiationState)> {
        self.history
            .iter()
            .map(|entry| (entry.message.message_type, entry.resulting_state))
            .collect()
    }
}

/// Report for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub verdict: ScenarioVerdict,
    pub state: ScenarioState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<StepOutcome>,
    pub exchanges: Vec<ExchangeTrail>,
    /// Scenario-level error (validation, setup).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == ScenarioVerdict::Pass
    }

    /// First step that did not pass or get skipped.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.verdict.is_fail() || s.verdict.is_error())
    }

    #[must_use]
    pub fn exchange(&self, alias: &str) -> Option<&ExchangeTrail> {
        self.exchanges.iter().find(|e| e.alias == alias)
    }
}

/// Scenario counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub scenarios: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl Totals {
    fn of(scenarios: &[ScenarioReport]) -> Self {
        let mut totals = Self {
            scenarios: scenarios.len(),
            ..Self::default()
        };
        for report in scenarios {
            match report.verdict {
                ScenarioVerdict::Pass => totals.passed += 1,
                ScenarioVerdict::Fail => totals.failed += 1,
                ScenarioVerdict::Error => totals.errored += 1,
            }
        }
        totals
    }
}

/// Report for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: Totals,
    pub scenarios: Vec<ScenarioReport>,
    /// Exchanges the SUT opened that no scenario declared.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmatched_exchanges: Vec<ExchangeTrail>,
}

impl RunReport {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        scenarios: Vec<ScenarioReport>,
        unmatched_exchanges: Vec<ExchangeTrail>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: Utc::now(),
            totals: Totals::of(&scenarios),
            scenarios,
            unmatched_exchanges,
        }
    }

    /// True when no scenario failed or errored.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.totals.failed == 0 && self.totals.errored == 0
    }

    /// # Errors
    /// Returns a serialization error.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One scenario report per line.
    #[must_use]
    pub fn to_json_lines(&self) -> String {
        self.scenarios
            .iter()
            .filter_map(|report| serde_json::to_string(report).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write scenario reports to a JSONL file.
    ///
    /// # Errors
    /// Returns an IO error if the file cannot be written.
    pub fn write_json_lines<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for report in &self.scenarios {
            let line = serde_json::to_string(report)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Human-readable summary, one line per scenario.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for report in &self.scenarios {
            out.push_str(&format!(
                "{:<7} {} ({}ms)",
                report.verdict.as_str(),
                report.scenario,
                report.duration_ms
            ));
            if let Some(step) = report.first_failure() {
                out.push_str(&format!(
                    "\n        step {} [{}]: {}",
                    step.index, step.label, step.verdict
                ));
            } else if let Some(error) = &report.error {
                out.push_str(&format!("\n        {error}"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "{} scenarios: {} passed, {} failed, {} errored",
            self.totals.scenarios, self.totals.passed, self.totals.failed, self.totals.errored
        ));
        out
    }
}
