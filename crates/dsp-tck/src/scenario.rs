//! Scenario model: exchanges, steps, message templates and shape predicates.
//!
//! Scenarios are plain data. They are built in code (see [`crate::catalog`])
//! or loaded from a TOML manifest, and validated before execution.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use dsp_protocol::codec::{self, RESERVED_KEYS};
use dsp_protocol::{
    MessageType, NegotiationState, ProcessId, ProtocolMessage, Role, SenderRole, vocab,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::correlation::Exchange;
use crate::error::ScenarioError;
use crate::responder::CounterpartyScript;
use crate::violation::ViolationKind;

// ─────────────────────────────────────────────────────────────────────────────
// Message templates
// ─────────────────────────────────────────────────────────────────────────────

/// A message with everything but its type and extra fields left to the
/// exchange it is sent on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Extra payload terms; keys may be compact or expanded.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl MessageTemplate {
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Build a concrete message for the exchange described by `context`.
    ///
    /// Fills both pids, the offer for REQUEST/OFFER, the callback address for
    /// initial messages and a default agreement, unless the template sets
    /// them. The result passes codec validation.
    ///
    /// # Errors
    /// [`ScenarioError::Template`] when a field is reserved or the message
    /// would not be valid (for example a missing counterparty pid).
    pub fn materialize(&self, context: &TemplateContext) -> Result<ProtocolMessage, ScenarioError> {
        let template_error = |reason: String| ScenarioError::Template {
            message_type: self.message_type,
            reason,
        };

        let mut message = ProtocolMessage::new(self.message_type);
        message.set_process_id(context.role, Some(context.own_pid.clone()));
        message.set_process_id(context.role.counterparty(), context.counterparty_pid.clone());

        for (key, value) in &self.fields {
            let key = vocab::compact(key);
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(template_error(format!("{key} is set by the engine")));
            }
            message.payload.insert(key, value.clone());
        }

        match self.message_type {
            MessageType::Request | MessageType::Offer => {
                if !message.payload.contains_key(vocab::OFFER) {
                    message = message.with_offer_id(context.offer_id.clone());
                }
                if message.is_initial() && message.callback_address().is_none() {
                    message = message.with_callback_address(context.callback_address.clone());
                }
            }
            MessageType::Agreement if !message.payload.contains_key(vocab::AGREEMENT) => {
                message = message.with_field(vocab::AGREEMENT, default_agreement(&context.offer_id));
            }
            _ => {}
        }

        codec::validate(&message).map_err(template_error)?;
        Ok(message)
    }
}

fn default_agreement(offer_id: &str) -> Value {
    json!({
        vocab::TYPE: vocab::ODRL_AGREEMENT,
        vocab::ID: ProcessId::generate().as_str(),
        vocab::ODRL_TARGET: offer_id,
        vocab::ODRL_ASSIGNER: vocab::TCK_PARTICIPANT_ID,
        vocab::ODRL_ASSIGNEE: vocab::TCK_PARTICIPANT_ID,
        vocab::TIMESTAMP: Utc::now().to_rfc3339(),
    })
}

/// What a template needs to know about its exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    /// Role of the sender (the engine).
    pub role: Role,
    pub own_pid: ProcessId,
    pub counterparty_pid: Option<ProcessId>,
    pub offer_id: String,
    /// Where the SUT should send callbacks for this exchange.
    pub callback_address: String,
}

impl TemplateContext {
    #[must_use]
    pub fn from_exchange(exchange: &Exchange, callback_address: &str, default_offer_id: &str) -> Self {
        Self {
            role: exchange.role(),
            own_pid: exchange.process_id().clone(),
            counterparty_pid: exchange.counterparty_pid().cloned(),
            offer_id: exchange.offer_id().unwrap_or(default_offer_id).to_string(),
            callback_address: callback_address.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shape predicates
// ─────────────────────────────────────────────────────────────────────────────

/// Predicate over a compact JSON-LD document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ShapePredicate {
    /// A JSON pointer resolves (e.g. `/dspace:offer/@id`).
    HasField { pointer: String },
    /// A JSON pointer resolves to `value`; JSON-LD value wrappers match
    /// their plain string.
    FieldEquals { pointer: String, value: Value },
    /// The document is a message of this type.
    MessageType {
        #[serde(rename = "type")]
        message_type: MessageType,
    },
    All { predicates: Vec<ShapePredicate> },
}

impl ShapePredicate {
    /// # Errors
    /// Returns a description of the first mismatch.
    pub fn evaluate(&self, document: &Value) -> Result<(), String> {
        match self {
            Self::HasField { pointer } => document
                .pointer(pointer)
                .map(|_| ())
                .ok_or_else(|| format!("{pointer} is absent")),
            Self::FieldEquals { pointer, value } => {
                let actual = document
                    .pointer(pointer)
                    .ok_or_else(|| format!("{pointer} is absent"))?;
                let matches = actual == value
                    || value
                        .as_str()
                        .is_some_and(|expected| vocab::scalar_str(actual) == Some(expected));
                if matches {
                    Ok(())
                } else {
                    Err(format!("{pointer} is {actual}, expected {value}"))
                }
            }
            Self::MessageType { message_type } => {
                let found = document.get(vocab::TYPE).and_then(vocab::scalar_str);
                if found != Some(message_type.wire_type()) {
                    return Err(format!(
                        "@type is {}, expected {}",
                        found.unwrap_or("absent"),
                        message_type.wire_type()
                    ));
                }
                match message_type.event_type() {
                    Some(event) => {
                        let found = document.get(vocab::EVENT_TYPE).and_then(vocab::scalar_str);
                        if found == Some(event) {
                            Ok(())
                        } else {
                            Err(format!(
                                "eventType is {}, expected {event}",
                                found.unwrap_or("absent")
                            ))
                        }
                    }
                    None => Ok(()),
                }
            }
            Self::All { predicates } => predicates.iter().try_for_each(|p| p.evaluate(document)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// One instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Put a message on the wire to the SUT, optionally as a violation.
    Send {
        exchange: String,
        message: MessageTemplate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inject: Option<ViolationKind>,
    },
    /// Wait for the SUT to send one of `expect`.
    Await {
        exchange: String,
        expect: Vec<MessageType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline_ms: Option<u64>,
    },
    /// Compare the tracked state.
    AssertState {
        exchange: String,
        state: NegotiationState,
    },
    /// Check the last document received from the SUT.
    AssertShape {
        exchange: String,
        predicate: ShapePredicate,
    },
    /// Ask the SUT for its view of the negotiation.
    QueryState {
        exchange: String,
        /// Expected state; defaults to the tracked state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<NegotiationState>,
    },
    /// POST to a SUT-specific path, e.g. to make it initiate a negotiation.
    Trigger {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange: Option<String>,
        path: String,
        #[serde(default)]
        body: Value,
    },
}

const fn default_fatal() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_true(value: &bool) -> bool {
    *value
}

/// A step with its failure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    #[serde(flatten)]
    pub kind: StepKind,
    /// A failed fatal step aborts the rest of the scenario.
    #[serde(default = "default_fatal", skip_serializing_if = "is_true")]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ScenarioStep {
    #[must_use]
    pub const fn new(kind: StepKind) -> Self {
        Self {
            kind,
            fatal: true,
            label: None,
        }
    }

    #[must_use]
    pub fn send(exchange: impl Into<String>, message: MessageTemplate) -> Self {
        Self::new(StepKind::Send {
            exchange: exchange.into(),
            message,
            inject: None,
        })
    }

    #[must_use]
    pub fn send_violation(
        exchange: impl Into<String>,
        message: MessageTemplate,
        kind: ViolationKind,
    ) -> Self {
        Self::new(StepKind::Send {
            exchange: exchange.into(),
            message,
            inject: Some(kind),
        })
    }

    /// Wait for one of `expect`; `None` uses the configured default deadline.
    #[must_use]
    pub fn await_callback(
        exchange: impl Into<String>,
        expect: impl IntoIterator<Item = MessageType>,
        deadline: Option<Duration>,
    ) -> Self {
        Self::new(StepKind::Await {
            exchange: exchange.into(),
            expect: expect.into_iter().collect(),
            deadline_ms: deadline.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        })
    }

    #[must_use]
    pub fn assert_state(exchange: impl Into<String>, state: NegotiationState) -> Self {
        Self::new(StepKind::AssertState {
            exchange: exchange.into(),
            state,
        })
    }

    #[must_use]
    pub fn assert_shape(exchange: impl Into<String>, predicate: ShapePredicate) -> Self {
        Self::new(StepKind::AssertShape {
            exchange: exchange.into(),
            predicate,
        })
    }

    #[must_use]
    pub fn query_state(exchange: impl Into<String>, state: Option<NegotiationState>) -> Self {
        Self::new(StepKind::QueryState {
            exchange: exchange.into(),
            state,
        })
    }

    #[must_use]
    pub fn trigger(exchange: Option<&str>, path: impl Into<String>, body: Value) -> Self {
        Self::new(StepKind::Trigger {
            exchange: exchange.map(str::to_string),
            path: path.into(),
            body,
        })
    }

    /// Keep going after this step fails.
    #[must_use]
    pub const fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    #[must_use]
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Short kind name used in reports and logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Send { inject: None, .. } => "send",
            StepKind::Send { inject: Some(_), .. } => "send_violation",
            StepKind::Await { .. } => "await",
            StepKind::AssertState { .. } => "assert_state",
            StepKind::AssertShape { .. } => "assert_shape",
            StepKind::QueryState { .. } => "query_state",
            StepKind::Trigger { .. } => "trigger",
        }
    }

    /// Exchange alias the step operates on, if any.
    #[must_use]
    pub fn exchange_alias(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Send { exchange, .. }
            | StepKind::Await { exchange, .. }
            | StepKind::AssertState { exchange, .. }
            | StepKind::AssertShape { exchange, .. }
            | StepKind::QueryState { exchange, .. } => Some(exchange),
            StepKind::Trigger { exchange, .. } => exchange.as_deref(),
        }
    }

    /// Label, or a generated one-line description.
    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.kind {
            StepKind::Send {
                exchange,
                message,
                inject,
            } => match inject {
                Some(kind) => format!("send {} as {kind} on {exchange}", message.message_type),
                None => format!("send {} on {exchange}", message.message_type),
            },
            StepKind::Await {
                exchange, expect, ..
            } => format!(
                "await {} on {exchange}",
                expect
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|")
            ),
            StepKind::AssertState { exchange, state } => {
                format!("assert {exchange} is {state}")
            }
            StepKind::AssertShape { exchange, .. } => format!("assert shape of last message on {exchange}"),
            StepKind::QueryState { exchange, state } => match state {
                Some(state) => format!("query {exchange} expecting {state}"),
                None => format!("query {exchange}"),
            },
            StepKind::Trigger { path, .. } => format!("trigger {path}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

/// A negotiation the scenario tracks, referred to by alias from its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDecl {
    pub alias: String,
    /// Engine role on this exchange; defaults to the scenario's role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Fixed pid; a fresh `urn:uuid:` is generated otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
    /// Who opens the negotiation.
    #[serde(default = "default_initiator")]
    pub initiated_by: SenderRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    /// How the endpoint answers the SUT on this exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<CounterpartyScript>,
}

const fn default_initiator() -> SenderRole {
    SenderRole::Tck
}

impl ExchangeDecl {
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            role: None,
            process_id: None,
            initiated_by: SenderRole::Tck,
            offer_id: None,
            script: None,
        }
    }

    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_process_id(mut self, pid: impl Into<ProcessId>) -> Self {
        self.process_id = Some(pid.into());
        self
    }

    /// The SUT sends the first message.
    #[must_use]
    pub const fn initiated_by_sut(mut self) -> Self {
        self.initiated_by = SenderRole::Sut;
        self
    }

    #[must_use]
    pub fn with_offer_id(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    #[must_use]
    pub fn with_script(mut self, script: CounterpartyScript) -> Self {
        self.script = Some(script);
        self
    }
}

/// An ordered conformance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Engine role for exchanges that do not set one; defaults to the
    /// configured role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "exchange")]
    pub exchanges: Vec<ExchangeDecl>,
    #[serde(default, rename = "step")]
    pub steps: Vec<ScenarioStep>,
    /// Runs after the steps regardless of outcome; never affects the verdict.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<ScenarioStep>,
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            role: None,
            timeout_ms: None,
            exchanges: Vec::new(),
            steps: Vec::new(),
            teardown: Vec::new(),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn exchange(mut self, decl: ExchangeDecl) -> Self {
        self.exchanges.push(decl);
        self
    }

    #[must_use]
    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn teardown_step(mut self, step: ScenarioStep) -> Self {
        self.teardown.push(step);
        self
    }

    /// Effective scenario timeout.
    #[must_use]
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map_or(default, Duration::from_millis)
    }

    /// Effective engine role of an exchange.
    #[must_use]
    pub fn role_of(&self, decl: &ExchangeDecl, default: Role) -> Role {
        decl.role.or(self.role).unwrap_or(default)
    }

    #[must_use]
    pub fn find_exchange(&self, alias: &str) -> Option<&ExchangeDecl> {
        self.exchanges.iter().find(|decl| decl.alias == alias)
    }

    /// Structural checks done before anything runs.
    ///
    /// # Errors
    /// [`ScenarioError::UnknownExchange`] for undeclared aliases and
    /// [`ScenarioError::Invalid`] for other problems.
    pub fn validate(&self, default_timeout: Duration) -> Result<(), ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::invalid("<unnamed>", "name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(ScenarioError::invalid(&self.name, "no steps"));
        }
        if self.timeout_ms == Some(0) {
            return Err(ScenarioError::invalid(&self.name, "timeout_ms must be > 0"));
        }

        let mut aliases = HashSet::new();
        for decl in &self.exchanges {
            if decl.alias.is_empty() {
                return Err(ScenarioError::invalid(&self.name, "exchange alias must not be empty"));
            }
            if !aliases.insert(decl.alias.as_str()) {
                return Err(ScenarioError::invalid(
                    &self.name,
                    format!("exchange alias {} declared twice", decl.alias),
                ));
            }
        }

        let timeout = self.timeout(default_timeout);
        for step in self.steps.iter().chain(&self.teardown) {
            if let Some(alias) = step.exchange_alias() {
                if !aliases.contains(alias) {
                    return Err(ScenarioError::UnknownExchange {
                        scenario: self.name.clone(),
                        alias: alias.to_string(),
                    });
                }
            }
            if let StepKind::Await {
                expect,
                deadline_ms,
                ..
            } = &step.kind
            {
                if expect.is_empty() {
                    return Err(ScenarioError::invalid(
                        &self.name,
                        format!("{}: expects no message type", step.describe()),
                    ));
                }
                if let Some(deadline) = deadline_ms.map(Duration::from_millis) {
                    if deadline > timeout {
                        return Err(ScenarioError::invalid(
                            &self.name,
                            format!(
                                "{}: deadline {}ms exceeds scenario timeout {}ms",
                                step.describe(),
                                deadline.as_millis(),
                                timeout.as_millis()
                            ),
                        ));
                    }
                }
            }
            if let StepKind::Trigger { path, .. } = &step.kind {
                if !path.starts_with('/') {
                    return Err(ScenarioError::invalid(
                        &self.name,
                        format!("trigger path {path} must start with '/'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(counterparty: Option<&str>) -> TemplateContext {
        TemplateContext {
            role: Role::Consumer,
            own_pid: ProcessId::new("c1"),
            counterparty_pid: counterparty.map(ProcessId::new),
            offer_id: "offer-7".into(),
            callback_address: "http://tck/consumer".into(),
        }
    }

    #[test]
    fn initial_request_gets_offer_and_callback() {
        let message = MessageTemplate::new(MessageType::Request)
            .materialize(&context(None))
            .unwrap();
        assert_eq!(message.consumer_pid, Some("c1".into()));
        assert_eq!(message.provider_pid, None);
        assert_eq!(message.offer_id(), Some("offer-7"));
        assert_eq!(message.callback_address(), Some("http://tck/consumer"));
    }

    #[test]
    fn follow_up_uses_counterparty_pid() {
        let message = MessageTemplate::new(MessageType::Accept)
            .with_field("dspace:reason", json!("ok"))
            .materialize(&context(Some("p9")))
            .unwrap();
        assert_eq!(message.provider_pid, Some("p9".into()));
        assert_eq!(message.payload.get("dspace:reason"), Some(&json!("ok")));
    }

    #[test]
    fn missing_counterparty_pid_is_a_template_error() {
        let err = MessageTemplate::new(MessageType::Accept)
            .materialize(&context(None))
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Template {
                message_type: MessageType::Accept,
                ..
            }
        ));
    }

    #[test]
    fn reserved_template_fields_are_rejected() {
        let err = MessageTemplate::new(MessageType::Request)
            .with_field("https://w3id.org/dspace/v0.8/providerPid", json!("x"))
            .materialize(&context(None))
            .unwrap_err();
        assert!(err.to_string().contains("set by the engine"));
    }

    #[test]
    fn provider_agreement_gets_default_body() {
        let context = TemplateContext {
            role: Role::Provider,
            own_pid: "p1".into(),
            counterparty_pid: Some("c1".into()),
            offer_id: "offer-7".into(),
            callback_address: "http://tck/provider".into(),
        };
        let message = MessageTemplate::new(MessageType::Agreement)
            .materialize(&context)
            .unwrap();
        let agreement = &message.payload[vocab::AGREEMENT];
        assert_eq!(agreement[vocab::TYPE], json!(vocab::ODRL_AGREEMENT));
        assert_eq!(agreement[vocab::ODRL_TARGET], json!("offer-7"));
    }

    #[test]
    fn shape_predicates() {
        let document = json!({
            "@type": "dspace:ContractNegotiationEventMessage",
            "dspace:eventType": {"@id": "dspace:ACCEPTED"},
            "dspace:consumerPid": "c1",
            "dspace:offer": {"@id": "offer-1"},
        });
        let predicate = ShapePredicate::All {
            predicates: vec![
                ShapePredicate::MessageType {
                    message_type: MessageType::Accept,
                },
                ShapePredicate::HasField {
                    pointer: "/dspace:offer/@id".into(),
                },
                ShapePredicate::FieldEquals {
                    pointer: "/dspace:eventType".into(),
                    value: json!("dspace:ACCEPTED"),
                },
            ],
        };
        predicate.evaluate(&document).unwrap();

        let wrong = ShapePredicate::MessageType {
            message_type: MessageType::Finalize,
        };
        assert!(wrong.evaluate(&document).unwrap_err().contains("eventType"));
        let absent = ShapePredicate::HasField {
            pointer: "/dspace:agreement".into(),
        };
        assert!(absent.evaluate(&document).is_err());
    }

    fn request_then_await(deadline: Duration) -> Scenario {
        Scenario::new("s")
            .exchange(ExchangeDecl::new("neg"))
            .step(ScenarioStep::send("neg", MessageTemplate::new(MessageType::Request)))
            .step(ScenarioStep::await_callback(
                "neg",
                [MessageType::Offer],
                Some(deadline),
            ))
    }

    #[test]
    fn validation() {
        let timeout = Duration::from_secs(5);
        request_then_await(Duration::from_secs(2)).validate(timeout).unwrap();

        assert!(matches!(
            request_then_await(Duration::from_secs(6)).validate(timeout),
            Err(ScenarioError::Invalid { .. })
        ));
        assert!(matches!(
            Scenario::new("empty").validate(timeout),
            Err(ScenarioError::Invalid { .. })
        ));
        let unknown = Scenario::new("u")
            .step(ScenarioStep::assert_state("ghost", NegotiationState::Requested));
        assert!(matches!(
            unknown.validate(timeout),
            Err(ScenarioError::UnknownExchange { alias, .. }) if alias == "ghost"
        ));
    }

    #[test]
    fn describe_steps() {
        assert_eq!(
            ScenarioStep::send("neg", MessageTemplate::new(MessageType::Request)).describe(),
            "send REQUEST on neg"
        );
        assert_eq!(
            ScenarioStep::await_callback("neg", [MessageType::Offer, MessageType::Terminate], None)
                .describe(),
            "await OFFER|TERMINATE on neg"
        );
        assert_eq!(
            ScenarioStep::assert_state("neg", NegotiationState::Offered)
                .labelled("offer seen")
                .describe(),
            "offer seen"
        );
    }

    #[test]
    fn steps_deserialize_from_toml() {
        let scenario: Scenario = toml::from_str(
            r#"
            name = "toml"
            timeout_ms = 3000

            [[exchange]]
            alias = "neg"
            offer_id = "offer-1"

            [[step]]
            kind = "send"
            exchange = "neg"
            message = { type = "request" }

            [[step]]
            kind = "await"
            exchange = "neg"
            expect = ["offer"]
            deadline_ms = 2000

            [[step]]
            kind = "assert_shape"
            exchange = "neg"
            fatal = false
            predicate = { check = "has_field", pointer = "/dspace:offer" }
            "#,
        )
        .unwrap();
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[1].kind_name(), "await");
        assert!(!scenario.steps[2].fatal);
        assert_eq!(scenario.exchanges[0].initiated_by, SenderRole::Tck);
        scenario.validate(Duration::from_secs(30)).unwrap();
    }
}
