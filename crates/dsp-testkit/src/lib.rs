//! Test kit for the DSP conformance engine.
//!
//! - [`MockSut`] - wiremock-backed SUT with canned responses
//! - [`SimulatedSut`] - provider that calls back according to a [`SutPlan`]
//! - [`fixtures`] - configurations, messages and small scenarios
//! - Assertion helpers for scenario and run reports
//! - Tracing configuration for test output
//!
//! ```rust,ignore
//! use dsp_protocol::Role;
//! use dsp_testkit::{fixtures, init_test_tracing, assert_passed};
//!
//! #[tokio::test]
//! async fn negotiates_against_local_connector() {
//!     init_test_tracing();
//!     let (connector, _server) = fixtures::local_connector().await;
//!     let config = fixtures::test_config(connector.provider_url(), Role::Consumer);
//!     let mut run = dsp_tck::RunContext::start(config).await.unwrap();
//!     let report = run.run_scenario(&fixtures::request_then_offer("smoke")).await;
//!     assert_passed(report);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

mod assertions;
pub mod fixtures;
mod mock_sut;
mod simulated_sut;
mod tracing_config;

pub use assertions::*;
pub use mock_sut::*;
pub use simulated_sut::{SimulatedSut, SutPlan};
pub use tracing_config::*;
