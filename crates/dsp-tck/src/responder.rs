//! Scripted counterparty behaviour.
//!
//! When the SUT sends a message, the endpoint asks the [`Responder`] what the
//! engine should answer on that exchange: a scripted message, a deliberate
//! violation, nothing, or the default well-behaved reply. Replies are sent on
//! spawned tasks; failures become exchange faults that the scenario sees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dsp_protocol::{MessageType, ProcessId, ProtocolMessage, Role, SenderRole};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::correlation::{CorrelationStore, Delivery, Exchange};
use crate::driver::DriverClient;
use crate::error::{CorrelationError, CorrelationResult, DriverError};
use crate::retry::RetryPolicy;
use crate::scenario::{MessageTemplate, TemplateContext};
use crate::violation::{self, ViolationKind};

/// The reply a conformant counterparty gives to `received`, if any.
#[must_use]
pub const fn default_reply(role: Role, received: MessageType) -> Option<MessageType> {
    match (role, received) {
        (Role::Provider, MessageType::Request) => Some(MessageType::Offer),
        (Role::Provider, MessageType::Accept) => Some(MessageType::Agreement),
        (Role::Provider, MessageType::Verification) => Some(MessageType::Finalize),
        (Role::Consumer, MessageType::Offer) => Some(MessageType::Accept),
        (Role::Consumer, MessageType::Agreement) => Some(MessageType::Verification),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripts
// ─────────────────────────────────────────────────────────────────────────────

/// What to do when a message arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptAction {
    Respond {
        message: MessageTemplate,
        #[serde(default)]
        delay_ms: u64,
    },
    Inject {
        violation: ViolationKind,
        /// Message to corrupt; derived from the exchange state when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<MessageTemplate>,
        #[serde(default)]
        delay_ms: u64,
    },
    Ignore,
}

impl ScriptAction {
    #[must_use]
    pub fn respond(message_type: MessageType) -> Self {
        Self::Respond {
            message: MessageTemplate::new(message_type),
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn respond_after(message_type: MessageType, delay: Duration) -> Self {
        Self::Respond {
            message: MessageTemplate::new(message_type),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    #[must_use]
    pub const fn inject(violation: ViolationKind) -> Self {
        Self::Inject {
            violation,
            message: None,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRule {
    pub on: MessageType,
    #[serde(flatten)]
    pub action: ScriptAction,
}

const fn default_auto() -> bool {
    true
}

/// Per-exchange responder script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyScript {
    /// Fall back to [`default_reply`] for messages no rule covers.
    #[serde(default = "default_auto")]
    pub auto: bool,
    #[serde(default, rename = "rule", skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<ScriptRule>,
}

impl Default for CounterpartyScript {
    fn default() -> Self {
        Self::auto()
    }
}

impl CounterpartyScript {
    /// Well-behaved counterparty.
    #[must_use]
    pub const fn auto() -> Self {
        Self {
            auto: true,
            rules: Vec::new(),
        }
    }

    /// Only explicit rules; everything else is left to scenario steps.
    #[must_use]
    pub const fn manual() -> Self {
        Self {
            auto: false,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn on(mut self, received: MessageType, action: ScriptAction) -> Self {
        self.rules.push(ScriptRule {
            on: received,
            action,
        });
        self
    }

    fn action_for(&self, role: Role, received: MessageType) -> Option<ScriptAction> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.on == received) {
            return Some(rule.action.clone());
        }
        if self.auto {
            return default_reply(role, received).map(ScriptAction::respond);
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responder
// ─────────────────────────────────────────────────────────────────────────────

enum Deferred {
    Respond {
        template: MessageTemplate,
        delay: Duration,
    },
    Inject {
        kind: ViolationKind,
        template: Option<MessageTemplate>,
        received: MessageType,
        delay: Duration,
    },
}

enum Plan {
    Nothing,
    Immediate(ProtocolMessage),
    Deferred(Deferred),
    Failed(String),
}

struct Inner {
    scripts: RwLock<HashMap<ProcessId, CounterpartyScript>>,
    store: Arc<CorrelationStore>,
    driver: DriverClient,
    retry: RetryPolicy,
    auto_respond: bool,
    public_url: String,
    default_offer_id: String,
}

/// Answers SUT messages on behalf of the engine.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("scripts", &self.inner.scripts.read().len())
            .field("auto_respond", &self.inner.auto_respond)
            .finish_non_exhaustive()
    }
}

/// Callback address the SUT should use for an exchange of `role`.
#[must_use]
pub fn callback_address(public_url: &str, role: Role) -> String {
    dsp_protocol::binding::join(public_url, role.as_str())
}

impl Responder {
    #[must_use]
    pub fn new(
        store: Arc<CorrelationStore>,
        driver: DriverClient,
        retry: RetryPolicy,
        auto_respond: bool,
        public_url: impl Into<String>,
        default_offer_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                scripts: RwLock::new(HashMap::new()),
                store,
                driver,
                retry,
                auto_respond,
                public_url: public_url.into(),
                default_offer_id: default_offer_id.into(),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn driver(&self) -> &DriverClient {
        &self.inner.driver
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.inner.public_url
    }

    #[must_use]
    pub fn default_offer_id(&self) -> &str {
        &self.inner.default_offer_id
    }

    /// Template context for messages the engine sends on `exchange`.
    #[must_use]
    pub fn template_context(&self, exchange: &Exchange) -> TemplateContext {
        TemplateContext::from_exchange(
            exchange,
            &callback_address(&self.inner.public_url, exchange.role()),
            &self.inner.default_offer_id,
        )
    }

    pub fn register(&self, pid: ProcessId, script: CounterpartyScript) {
        self.inner.scripts.write().insert(pid, script);
    }

    pub fn unregister(&self, pid: &ProcessId) {
        self.inner.scripts.write().remove(pid);
    }

    fn action_for(&self, exchange: &Exchange, received: MessageType) -> Option<ScriptAction> {
        let scripts = self.inner.scripts.read();
        match scripts.get(exchange.process_id()) {
            Some(script) => script.action_for(exchange.role(), received),
            None if self.inner.auto_respond => {
                default_reply(exchange.role(), received).map(ScriptAction::respond)
            }
            None => None,
        }
    }

    /// Runs under the exchange lock: must not touch the store.
    fn plan(&self, exchange: &Exchange, received: MessageType) -> Plan {
        match self.action_for(exchange, received) {
            None | Some(ScriptAction::Ignore) => Plan::Nothing,
            Some(ScriptAction::Respond { message, delay_ms: 0 }) => {
                match message.materialize(&self.template_context(exchange)) {
                    Ok(reply) => Plan::Immediate(reply),
                    Err(err) => Plan::Failed(err.to_string()),
                }
            }
            Some(ScriptAction::Respond { message, delay_ms }) => Plan::Deferred(Deferred::Respond {
                template: message,
                delay: Duration::from_millis(delay_ms),
            }),
            Some(ScriptAction::Inject {
                violation,
                message,
                delay_ms,
            }) => Plan::Deferred(Deferred::Inject {
                kind: violation,
                template: message,
                received,
                delay: Duration::from_millis(delay_ms),
            }),
        }
    }

    /// Deliver an inbound SUT message and answer it per the exchange script.
    ///
    /// # Errors
    /// Same as [`CorrelationStore::deliver_with_reply`].
    pub fn handle_inbound(&self, pid: &ProcessId, message: ProtocolMessage) -> CorrelationResult<Delivery> {
        let received = message.message_type;
        let mut plan = Plan::Nothing;
        let delivery = self.inner.store.deliver_with_reply(pid, message, |exchange| {
            match self.plan(exchange, received) {
                Plan::Immediate(reply) => Some(reply),
                other => {
                    plan = other;
                    None
                }
            }
        })?;

        if let Some(reply) = &delivery.reply {
            self.spawn_recorded_send(pid.clone(), reply.clone());
        }
        match plan {
            Plan::Deferred(deferred) => self.spawn_deferred(pid.clone(), deferred),
            Plan::Failed(reason) => {
                self.fault(pid, format!("cannot build reply to {received}: {reason}"));
            }
            Plan::Nothing | Plan::Immediate(_) => {}
        }
        Ok(delivery)
    }

    fn fault(&self, pid: &ProcessId, reason: String) {
        let fault = CorrelationError::CounterpartyFault {
            process_id: pid.clone(),
            reason,
        };
        if let Err(err) = self.inner.store.record_fault(pid, fault) {
            debug!(process_id = %pid, error = %err, "fault not recorded");
        }
    }

    /// Send a reply that is already recorded as a transition.
    fn spawn_recorded_send(&self, pid: ProcessId, reply: ProtocolMessage) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(reason) = this.send_reply(&pid, &reply).await {
                this.fault(&pid, reason);
            }
        });
    }

    fn spawn_deferred(&self, pid: ProcessId, deferred: Deferred) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = match deferred {
                Deferred::Respond { template, delay } => {
                    tokio::time::sleep(delay).await;
                    this.respond_later(&pid, &template).await
                }
                Deferred::Inject {
                    kind,
                    template,
                    received,
                    delay,
                } => {
                    tokio::time::sleep(delay).await;
                    this.inject(&pid, kind, template, received).await
                }
            };
            if let Err(reason) = result {
                this.fault(&pid, reason);
            }
        });
    }

    async fn send_reply(&self, pid: &ProcessId, reply: &ProtocolMessage) -> Result<(), String> {
        let exchange = self.inner.store.snapshot(pid).map_err(|e| e.to_string())?;
        let url = self
            .inner
            .driver
            .message_url(&exchange, reply)
            .map_err(|e| e.to_string())?;
        debug!(process_id = %pid, message_type = %reply.message_type, %url, "sending scripted reply");
        self.inner
            .retry
            .run("scripted reply", || self.inner.driver.send(&url, reply))
            .await
            .map(|_| ())
            .map_err(|e| format!("SUT did not accept {}: {e}", reply.message_type))
    }

    async fn respond_later(&self, pid: &ProcessId, template: &MessageTemplate) -> Result<(), String> {
        let exchange = self.inner.store.snapshot(pid).map_err(|e| e.to_string())?;
        let reply = template
            .materialize(&self.template_context(&exchange))
            .map_err(|e| e.to_string())?;
        self.inner
            .store
            .record_transition(pid, &reply, SenderRole::Tck)
            .map_err(|e| format!("scripted reply rejected: {e}"))?;
        self.send_reply(pid, &reply).await
    }

    async fn inject(
        &self,
        pid: &ProcessId,
        kind: ViolationKind,
        template: Option<MessageTemplate>,
        received: MessageType,
    ) -> Result<(), String> {
        let exchange = self.inner.store.snapshot(pid).map_err(|e| e.to_string())?;
        let role = exchange.role();
        let template = template
            .or_else(|| {
                let message_type = match kind {
                    ViolationKind::WrongState => {
                        violation::default_wrong_state_type(role, exchange.state())
                    }
                    ViolationKind::MalformedPayload | ViolationKind::WrongProcessId => {
                        default_reply(role, received).or(Some(MessageType::Terminate))
                    }
                }?;
                Some(MessageTemplate::new(message_type))
            })
            .ok_or_else(|| format!("no message type can express {kind} in {}", exchange.state()))?;

        let message = template
            .materialize(&self.template_context(&exchange))
            .map_err(|e| e.to_string())?;
        let prepared = violation::prepare(kind, role, exchange.state(), message)?;
        let url = dsp_protocol::binding::join(self.inner.driver.sut_base(&exchange), &prepared.path);
        self.inner
            .store
            .record_violation(
                pid,
                Some(prepared.message_type),
                SenderRole::Tck,
                format!("injected {kind}"),
            )
            .map_err(|e| e.to_string())?;
        debug!(process_id = %pid, violation = %kind, %url, "injecting violation");

        let result = self
            .inner
            .retry
            .run("injected violation", || {
                self.inner.driver.send_raw(&url, prepared.body.clone())
            })
            .await;
        match result {
            Ok(outcome) => Err(format!(
                "SUT accepted injected {kind} ({}) with HTTP {}",
                prepared.message_type, outcome.status
            )),
            Err(DriverError::ProtocolHttp { status, .. }) if (400..500).contains(&status) => {
                debug!(process_id = %pid, status, "injected violation rejected");
                Ok(())
            }
            Err(err) => {
                warn!(process_id = %pid, error = %err, "injected violation not delivered");
                Err(format!("injected {kind} not delivered: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_replies_follow_the_happy_path() {
        assert_eq!(
            default_reply(Role::Provider, MessageType::Request),
            Some(MessageType::Offer)
        );
        assert_eq!(
            default_reply(Role::Consumer, MessageType::Agreement),
            Some(MessageType::Verification)
        );
        assert_eq!(default_reply(Role::Consumer, MessageType::Finalize), None);
        assert_eq!(default_reply(Role::Provider, MessageType::Terminate), None);
    }

    #[test]
    fn rules_override_auto() {
        let script = CounterpartyScript::auto()
            .on(MessageType::Request, ScriptAction::Ignore)
            .on(
                MessageType::Accept,
                ScriptAction::inject(ViolationKind::WrongState),
            );
        assert_eq!(
            script.action_for(Role::Provider, MessageType::Request),
            Some(ScriptAction::Ignore)
        );
        assert_eq!(
            script.action_for(Role::Provider, MessageType::Verification),
            Some(ScriptAction::respond(MessageType::Finalize))
        );
        assert!(matches!(
            script.action_for(Role::Provider, MessageType::Accept),
            Some(ScriptAction::Inject { .. })
        ));
        assert_eq!(
            CounterpartyScript::manual().action_for(Role::Provider, MessageType::Request),
            None
        );
    }

    #[test]
    fn script_deserializes() {
        let script: CounterpartyScript = toml::from_str(
            r#"
            auto = false

            [[rule]]
            on = "request"
            action = "respond"
            delay_ms = 50
            message = { type = "offer" }

            [[rule]]
            on = "accept"
            action = "inject"
            violation = "malformed_payload"
            "#,
        )
        .unwrap();
        assert!(!script.auto);
        assert_eq!(
            script.rules[0].action,
            ScriptAction::respond_after(MessageType::Offer, Duration::from_millis(50))
        );
        assert_eq!(
            script.rules[1].action,
            ScriptAction::inject(ViolationKind::MalformedPayload)
        );
    }
}
