//! Negotiation bookkeeping for the local connector, both roles.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dsp_protocol::{
    Direction, MessageType, NegotiationSnapshot, NegotiationState, ProcessId, ProtocolMessage, Role,
    binding, decode, transition,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::driver::{DriverClient, HttpOutcome};
use crate::endpoint::EndpointError;
use crate::responder::{callback_address, default_reply};
use crate::scenario::{MessageTemplate, TemplateContext};

/// One negotiation as the local connector sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractNegotiation {
    pub id: ProcessId,
    pub role: Role,
    pub counterparty_pid: Option<ProcessId>,
    /// Protocol base URL of the other side.
    pub counterparty_address: String,
    pub offer_id: String,
    pub state: NegotiationState,
    pub messages: Vec<(MessageType, Direction)>,
}

impl ContractNegotiation {
    #[must_use]
    pub fn snapshot(&self) -> NegotiationSnapshot {
        let own = Some(self.id.clone());
        let (consumer_pid, provider_pid) = match self.role {
            Role::Consumer => (own, self.counterparty_pid.clone()),
            Role::Provider => (self.counterparty_pid.clone(), own),
        };
        NegotiationSnapshot {
            consumer_pid,
            provider_pid,
            state: self.state,
        }
    }
}

/// Observer of negotiation transitions.
pub trait NegotiationListener: Send + Sync {
    fn on_transition(&self, negotiation: &ContractNegotiation, message_type: MessageType, direction: Direction);
}

/// Negotiation store plus the outbound half of the local connector.
pub(crate) struct NegotiationManager {
    negotiations: RwLock<HashMap<ProcessId, ContractNegotiation>>,
    listeners: RwLock<Vec<Arc<dyn NegotiationListener>>>,
    client: DriverClient,
    public_url: String,
    offer_id: String,
    auto_progress: bool,
}

impl fmt::Debug for NegotiationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationManager")
            .field("public_url", &self.public_url)
            .field("negotiations", &self.negotiations.read().len())
            .field("listeners", &self.listeners.read().len())
            .field("auto_progress", &self.auto_progress)
            .finish_non_exhaustive()
    }
}

impl NegotiationManager {
    pub(crate) fn new(client: DriverClient, public_url: String, offer_id: String, auto_progress: bool) -> Self {
        Self {
            negotiations: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            client,
            public_url,
            offer_id,
            auto_progress,
        }
    }

    pub(crate) fn public_url(&self) -> &str {
        &self.public_url
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn NegotiationListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn get(&self, role: Role, pid: &ProcessId) -> Option<ContractNegotiation> {
        self.negotiations
            .read()
            .get(pid)
            .filter(|n| n.role == role)
            .cloned()
    }

    pub(crate) fn all(&self) -> Vec<ContractNegotiation> {
        self.negotiations.read().values().cloned().collect()
    }

    /// Open a negotiation in `INITIAL`.
    pub(crate) fn create(
        &self,
        role: Role,
        counterparty_pid: Option<ProcessId>,
        counterparty_address: String,
        offer_id: String,
    ) -> ProcessId {
        let negotiation = ContractNegotiation {
            id: ProcessId::generate(),
            role,
            counterparty_pid,
            counterparty_address,
            offer_id,
            state: NegotiationState::Initial,
            messages: Vec::new(),
        };
        let id = negotiation.id.clone();
        self.negotiations.write().insert(id.clone(), negotiation);
        id
    }

    pub(crate) fn learn_counterparty(&self, pid: &ProcessId, counterparty: ProcessId) {
        if let Some(negotiation) = self.negotiations.write().get_mut(pid) {
            negotiation.counterparty_pid.get_or_insert(counterparty);
        }
    }

    /// Validate and apply one message, then notify listeners.
    pub(crate) fn apply(
        &self,
        pid: &ProcessId,
        message: &ProtocolMessage,
        direction: Direction,
    ) -> Result<ContractNegotiation, EndpointError> {
        let updated = {
            let mut negotiations = self.negotiations.write();
            let negotiation = negotiations
                .get_mut(pid)
                .ok_or_else(|| EndpointError::UnknownProcess(pid.clone()))?;
            let next = transition(negotiation.role, negotiation.state, message.message_type, direction)
                .map_err(EndpointError::Illegal)?;
            negotiation.state = next;
            negotiation.messages.push((message.message_type, direction));
            if direction == Direction::Inbound && negotiation.counterparty_pid.is_none() {
                negotiation.counterparty_pid = message.process_id(negotiation.role.counterparty()).cloned();
            }
            negotiation.clone()
        };
        debug!(
            process_id = %pid,
            message_type = %message.message_type,
            direction = ?direction,
            state = %updated.state,
            "local negotiation advanced"
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_transition(&updated, message.message_type, direction);
        }
        Ok(updated)
    }

    /// Answer `received` with the conformant reply, on a background task.
    pub(crate) fn progress(self: &Arc<Self>, pid: ProcessId, role: Role, received: MessageType) {
        if !self.auto_progress {
            return;
        }
        let Some(reply) = default_reply(role, received) else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.send_next(&pid, reply).await {
                warn!(process_id = %pid, message_type = %reply, error = %err, "local connector reply failed");
            }
        });
    }

    /// Build, record and send the next message of a negotiation.
    pub(crate) async fn send_next(
        &self,
        pid: &ProcessId,
        message_type: MessageType,
    ) -> Result<HttpOutcome, EndpointError> {
        let negotiation = self
            .negotiations
            .read()
            .get(pid)
            .cloned()
            .ok_or_else(|| EndpointError::UnknownProcess(pid.clone()))?;
        let context = TemplateContext {
            role: negotiation.role,
            own_pid: negotiation.id.clone(),
            counterparty_pid: negotiation.counterparty_pid.clone(),
            offer_id: negotiation.offer_id.clone(),
            callback_address: callback_address(&self.public_url, negotiation.role),
        };
        let message = MessageTemplate::new(message_type)
            .materialize(&context)
            .map_err(|e| EndpointError::Internal(e.to_string()))?;
        let path = binding::message_path(&message, negotiation.role).ok_or_else(|| {
            EndpointError::Internal(format!("no route for {message_type} from {}", negotiation.role))
        })?;

        self.apply(pid, &message, Direction::Outbound)?;
        let url = binding::join(&negotiation.counterparty_address, &path);
        self.client
            .send(&url, &message)
            .await
            .map_err(|e| EndpointError::Internal(format!("{message_type} to {url} failed: {e}")))
    }

    /// Inbound pipeline: decode, resolve or open the negotiation, validate
    /// the transition, then schedule the conformant reply.
    ///
    /// Returns the updated negotiation and whether it was just created.
    pub(crate) fn receive(
        self: &Arc<Self>,
        role: Role,
        path_pid: Option<ProcessId>,
        accepted: &[MessageType],
        body: &[u8],
    ) -> Result<(ContractNegotiation, bool), EndpointError> {
        let message = decode(body)?;
        let message_type = message.message_type;
        if !accepted.contains(&message_type) {
            return Err(EndpointError::Misrouted(format!(
                "{message_type} is not accepted on this route"
            )));
        }

        let (pid, created) = match path_pid {
            None => (self.open_from(role, &message)?, true),
            Some(pid) => {
                if self.get(role, &pid).is_none() {
                    return Err(EndpointError::UnknownProcess(pid));
                }
                if message.process_id(role) != Some(&pid) {
                    return Err(EndpointError::Misrouted(format!(
                        "{} in body does not match path pid {pid}",
                        role.pid_term()
                    )));
                }
                (pid, false)
            }
        };

        let updated = match self.apply(&pid, &message, Direction::Inbound) {
            Ok(updated) => updated,
            Err(err) => {
                if created {
                    self.negotiations.write().remove(&pid);
                }
                return Err(err);
            }
        };
        self.progress(pid, role, message_type);
        Ok((updated, created))
    }

    fn open_from(&self, role: Role, message: &ProtocolMessage) -> Result<ProcessId, EndpointError> {
        if !message.is_initial() {
            return Err(EndpointError::Misrouted(format!(
                "{} carries a {} and is not an initial message",
                message.message_type,
                role.pid_term()
            )));
        }
        let address = message.callback_address().ok_or_else(|| {
            EndpointError::Misrouted(format!("initial {} has no callbackAddress", message.message_type))
        })?;
        let offer_id = message
            .offer_id()
            .map_or_else(|| self.offer_id.clone(), str::to_string);
        Ok(self.create(
            role,
            message.process_id(role.counterparty()).cloned(),
            address.to_string(),
            offer_id,
        ))
    }

    /// Start a negotiation as consumer against `provider_url`.
    pub(crate) async fn initiate(
        &self,
        provider_url: &str,
        offer_id: Option<String>,
    ) -> Result<ContractNegotiation, EndpointError> {
        let offer_id = offer_id.unwrap_or_else(|| self.offer_id.clone());
        let pid = self.create(Role::Consumer, None, provider_url.to_string(), offer_id);
        let outcome = match self.send_next(&pid, MessageType::Request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.negotiations.write().remove(&pid);
                return Err(err);
            }
        };
        if let Some(provider_pid) = outcome.snapshot().and_then(|s| s.provider_pid.clone()) {
            self.learn_counterparty(&pid, provider_pid);
        }
        info!(process_id = %pid, provider_url, "local consumer requested a contract");
        self.get(Role::Consumer, &pid)
            .ok_or(EndpointError::UnknownProcess(pid))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dsp_protocol::encode;

    use super::*;

    fn manager() -> Arc<NegotiationManager> {
        let client = DriverClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        Arc::new(NegotiationManager::new(
            client,
            "http://local".into(),
            "offer-1".into(),
            false,
        ))
    }

    fn initial_request() -> Vec<u8> {
        encode(
            &ProtocolMessage::new(MessageType::Request)
                .with_consumer_pid("tck-c")
                .with_offer_id("offer-9")
                .with_callback_address("http://tck/consumer"),
        )
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder(parking_lot::Mutex<Vec<(MessageType, Direction, NegotiationState)>>);

    impl NegotiationListener for Recorder {
        fn on_transition(&self, negotiation: &ContractNegotiation, message_type: MessageType, direction: Direction) {
            self.0.lock().push((message_type, direction, negotiation.state));
        }
    }

    #[tokio::test]
    async fn initial_request_opens_a_provider_negotiation() {
        let manager = manager();
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());

        let (negotiation, created) = manager
            .receive(Role::Provider, None, &[MessageType::Request], &initial_request())
            .unwrap();
        assert!(created);
        assert_eq!(negotiation.state, NegotiationState::Requested);
        assert_eq!(negotiation.counterparty_pid, Some(ProcessId::new("tck-c")));
        assert_eq!(negotiation.counterparty_address, "http://tck/consumer");
        assert_eq!(negotiation.offer_id, "offer-9");

        let snapshot = negotiation.snapshot();
        assert_eq!(snapshot.provider_pid, Some(negotiation.id.clone()));
        assert_eq!(
            recorder.0.lock().as_slice(),
            [(MessageType::Request, Direction::Inbound, NegotiationState::Requested)]
        );
    }

    #[tokio::test]
    async fn out_of_order_message_is_illegal() {
        let manager = manager();
        let (negotiation, _) = manager
            .receive(Role::Provider, None, &[MessageType::Request], &initial_request())
            .unwrap();
        let verification = ProtocolMessage::new(MessageType::Verification)
            .with_consumer_pid("tck-c")
            .with_provider_pid(negotiation.id.clone());
        let err = manager
            .receive(
                Role::Provider,
                Some(negotiation.id.clone()),
                &[MessageType::Verification],
                &encode(&verification).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EndpointError::Illegal(_)));
        assert_eq!(
            manager.get(Role::Provider, &negotiation.id).unwrap().state,
            NegotiationState::Requested
        );
    }

    #[tokio::test]
    async fn unknown_or_foreign_pid_is_not_found() {
        let manager = manager();
        let (negotiation, _) = manager
            .receive(Role::Provider, None, &[MessageType::Request], &initial_request())
            .unwrap();
        let terminate = ProtocolMessage::new(MessageType::Terminate)
            .with_consumer_pid(negotiation.id.clone())
            .with_provider_pid("p");
        let err = manager
            .receive(
                Role::Consumer,
                Some(negotiation.id),
                &[MessageType::Terminate],
                &encode(&terminate).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EndpointError::UnknownProcess(_)));
    }

    #[tokio::test]
    async fn initial_message_needs_a_callback_address() {
        let manager = manager();
        let mut doc: serde_json::Value = serde_json::from_slice(&initial_request()).unwrap();
        doc.as_object_mut()
            .unwrap()
            .remove(dsp_protocol::vocab::CALLBACK_ADDRESS);
        let body = serde_json::to_vec(&doc).unwrap();
        let err = manager
            .receive(Role::Provider, None, &[MessageType::Request], &body)
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(manager.all().is_empty());
    }
}
