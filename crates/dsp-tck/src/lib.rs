//! Conformance test engine for dataspace protocol contract negotiation.
//!
//! The engine plays one side of a negotiation against a system under test
//! (SUT) and checks that the SUT follows the protocol:
//! - **Correlation**: one exchange per negotiation, keyed by the engine's pid
//! - **Endpoint**: the inbound half, with both role surfaces
//! - **Driver**: the outbound half, with retry
//! - **Scenarios**: declarative step lists, built in or loaded from TOML
//! - **Executor**: runs scenarios and produces reports
//! - **Local connector**: an in-process conformant SUT
//!
//! A run is owned by a [`RunContext`]; there is no global state.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod connector;
pub mod correlation;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod report;
pub mod responder;
pub mod retry;
pub mod run;
pub mod scenario;
pub mod server;
pub mod violation;

pub use config::TckConfig;
pub use connector::{ContractNegotiation, LocalConnector, LocalConnectorOptions, NegotiationListener};
pub use correlation::{CorrelationStore, Exchange, ExchangeParams};
pub use driver::{DriverClient, HttpOutcome};
pub use endpoint::{Endpoint, EndpointError};
pub use error::{CorrelationError, DriverError, ScenarioError, TckError, TckResult};
pub use executor::{ExecutorSettings, ScenarioExecutor};
pub use manifest::{ScenarioManifest, ScenarioRegistry};
pub use report::{
    ExchangeTrail, RunReport, ScenarioReport, ScenarioState, ScenarioVerdict, StepOutcome, Verdict,
};
pub use responder::{CounterpartyScript, Responder, ScriptAction};
pub use retry::RetryPolicy;
pub use run::RunContext;
pub use scenario::{ExchangeDecl, MessageTemplate, Scenario, ScenarioStep, ShapePredicate, StepKind};
pub use server::ServerHandle;
pub use violation::ViolationKind;
