//! Assertion helpers for scenario reports.

use dsp_protocol::{MessageType, NegotiationState};
use dsp_tck::{ExchangeTrail, RunReport, ScenarioReport, ScenarioVerdict, Verdict};

// ─────────────────────────────────────────────────────────────────────────────
// Verdicts
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that a scenario passed, showing the first bad step otherwise.
///
/// # Panics
///
/// Panics if the verdict is not PASS.
pub fn assert_passed(report: &ScenarioReport) {
    assert!(
        report.passed(),
        "scenario {} was {}: step {:?}, error {:?}",
        report.scenario,
        report.verdict,
        report.first_failure(),
        report.error
    );
}

/// Assert the scenario verdict.
///
/// # Panics
///
/// Panics if it differs.
pub fn assert_verdict(report: &ScenarioReport, expected: ScenarioVerdict) {
    assert_eq!(
        report.verdict, expected,
        "scenario {}: unexpected verdict, steps {:#?}",
        report.scenario, report.steps
    );
}

/// Assert that step `index` failed and that its reason mentions `needle`.
///
/// # Panics
///
/// Panics if the step is missing, did not fail, or the reason differs.
pub fn assert_step_failed(report: &ScenarioReport, index: usize, needle: &str) {
    let step = report
        .steps
        .get(index)
        .unwrap_or_else(|| panic!("scenario {} has no step {index}", report.scenario));
    match &step.verdict {
        Verdict::Fail { reason } => assert!(
            reason.contains(needle),
            "step {index} failed with '{reason}', expected it to mention '{needle}'"
        ),
        other => panic!("step {index} was {other}, expected FAIL"),
    }
}

/// Assert that every step from `from` on was skipped.
///
/// # Panics
///
/// Panics if any of them ran.
pub fn assert_skipped_from(report: &ScenarioReport, from: usize) {
    for step in report.steps.iter().skip(from) {
        assert_eq!(step.verdict, Verdict::Skipped, "step {} ran", step.index);
    }
}

/// Assert that the run has no failed or errored scenario.
///
/// # Panics
///
/// Panics with the run summary otherwise.
pub fn assert_run_passed(report: &RunReport) {
    assert!(report.all_passed(), "run did not pass:\n{}", report.summary());
}

// ─────────────────────────────────────────────────────────────────────────────
// Exchanges
// ─────────────────────────────────────────────────────────────────────────────

/// The trail of exchange `alias`.
///
/// # Panics
///
/// Panics if the scenario has no such exchange.
#[must_use]
pub fn trail<'a>(report: &'a ScenarioReport, alias: &str) -> &'a ExchangeTrail {
    report
        .exchange(alias)
        .unwrap_or_else(|| panic!("scenario {} has no exchange {alias}", report.scenario))
}

/// Assert the exact `(message type, resulting state)` history of an exchange.
///
/// # Panics
///
/// Panics if it differs.
pub fn assert_history(report: &ScenarioReport, alias: &str, expected: &[(MessageType, NegotiationState)]) {
    assert_eq!(trail(report, alias).transitions(), expected);
}
