//! Counterparty endpoint: the inbound side of the wire protocol.
//!
//! Provider handlers are mounted under `/provider`, consumer handlers under
//! `/consumer`. Every inbound message goes through the same pipeline:
//! decode, resolve the exchange, check the path pid against the body, deliver
//! to the correlation store (which validates the transition), then answer
//! with a `ContractNegotiation` document or a `ContractNegotiationError`.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use dsp_protocol::{
    CodecError, IllegalTransition, MessageType, NegotiationError, ProcessId, ProtocolMessage, Role,
    SenderRole, decode,
};
use tracing::{debug, info, warn};

use crate::correlation::{CorrelationStore, ExchangeParams, InitialResolution};
use crate::error::CorrelationError;
use crate::responder::Responder;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Rejection sent back to the SUT.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Illegal(IllegalTransition),

    /// Message type or pid does not belong on this route.
    #[error("{0}")]
    Misrouted(String),

    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EndpointError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Codec(_) | Self::Illegal(_) | Self::Misrouted(_) => StatusCode::BAD_REQUEST,
            Self::UnknownProcess(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CorrelationError> for EndpointError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::IllegalTransition(illegal) => Self::Illegal(illegal),
            CorrelationError::UnknownProcess(pid) => Self::UnknownProcess(pid),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = NegotiationError::new(status.as_u16().to_string(), self.to_string()).to_document();
        (status, Json(body)).into_response()
    }
}

type EndpointResult = Result<Response, EndpointError>;

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct Endpoint {
    responder: Responder,
}

impl Endpoint {
    #[must_use]
    pub const fn new(responder: Responder) -> Self {
        Self { responder }
    }

    #[must_use]
    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    fn store(&self) -> &CorrelationStore {
        self.responder.store()
    }

    /// Router with both role surfaces.
    #[must_use]
    pub fn router(&self) -> Router {
        let provider = Router::new()
            .route("/negotiations/request", post(provider_initial_request))
            .route("/negotiations/:pid", get(provider_query))
            .route("/negotiations/:pid/request", post(provider_request))
            .route("/negotiations/:pid/events", post(provider_events))
            .route(
                "/negotiations/:pid/agreement/verification",
                post(provider_verification),
            )
            .route("/negotiations/:pid/termination", post(provider_termination));

        let consumer = Router::new()
            .route("/negotiations/offers", post(consumer_initial_offer))
            .route("/negotiations/:pid", get(consumer_query))
            .route("/negotiations/:pid/offers", post(consumer_offer))
            .route("/negotiations/:pid/agreement", post(consumer_agreement))
            .route("/negotiations/:pid/events", post(consumer_events))
            .route("/negotiations/:pid/termination", post(consumer_termination));

        Router::new()
            .nest("/provider", provider)
            .nest("/consumer", consumer)
            .with_state(self.clone())
    }

    /// Inbound pipeline shared by every POST route.
    ///
    /// `path_pid` is `None` on the initial-message routes. `accepted` lists
    /// the message types the route carries.
    fn receive(
        &self,
        role: Role,
        path_pid: Option<ProcessId>,
        accepted: &[MessageType],
        body: &[u8],
    ) -> EndpointResult {
        let message = match decode(body) {
            Ok(message) => message,
            Err(err) => {
                if let Some(pid) = &path_pid {
                    self.note_bad_message(pid, None, format!("undecodable message: {err}"));
                }
                warn!(role = %role, error = %err, "rejecting undecodable message");
                return Err(err.into());
            }
        };
        let message_type = message.message_type;

        if !accepted.contains(&message_type) {
            if let Some(pid) = &path_pid {
                self.note_bad_message(pid, Some(message_type), format!("{message_type} sent to the wrong route"));
            }
            return Err(EndpointError::Misrouted(format!(
                "{message_type} is not accepted on this route"
            )));
        }

        let (pid, initial) = match path_pid {
            None => {
                if !message.is_initial() {
                    return Err(EndpointError::Misrouted(format!(
                        "{message_type} carries a {} and is not an initial message",
                        role.pid_term()
                    )));
                }
                match self.resolve_initial(role, &message)? {
                    Resolved::Fresh(pid) => (pid, true),
                    Resolved::Redelivered(pid) => {
                        debug!(process_id = %pid, "initial message redelivered");
                        return self.acknowledge(&pid, StatusCode::CREATED);
                    }
                }
            }
            Some(pid) => {
                let exchange = self
                    .store()
                    .snapshot(&pid)
                    .map_err(|_| EndpointError::UnknownProcess(pid.clone()))?;
                if exchange.role() != role {
                    return Err(EndpointError::UnknownProcess(pid));
                }
                if message.process_id(role) != Some(&pid) {
                    let reason = format!(
                        "{} in body does not match path pid {pid}",
                        role.pid_term()
                    );
                    self.note_bad_message(&pid, Some(message_type), reason.clone());
                    return Err(EndpointError::Misrouted(reason));
                }
                (pid, false)
            }
        };

        let delivery = self.responder.handle_inbound(&pid, message)?;
        info!(
            process_id = %pid,
            role = %role,
            message_type = %message_type,
            state = %delivery.state,
            "inbound message accepted"
        );
        self.acknowledge(
            &pid,
            if initial { StatusCode::CREATED } else { StatusCode::OK },
        )
    }

    fn resolve_initial(&self, role: Role, message: &ProtocolMessage) -> Result<Resolved, EndpointError> {
        match self.store().claim_initial(role, message) {
            Some(InitialResolution::Redelivered(pid)) => Ok(Resolved::Redelivered(pid)),
            Some(InitialResolution::Claimed(pid)) => Ok(Resolved::Fresh(pid)),
            None => {
                let params = ExchangeParams {
                    process_id: ProcessId::generate(),
                    role,
                    initiated_by: SenderRole::Sut,
                    offer_id: message.offer_id().map(str::to_string),
                    owner: None,
                };
                let exchange = self.store().begin(params)?;
                info!(process_id = %exchange.process_id(), role = %role, "SUT opened an unsolicited negotiation");
                Ok(Resolved::Fresh(exchange.process_id().clone()))
            }
        }
    }

    /// Keep a rejected SUT message on the exchange and surface it to the
    /// scenario.
    /// Record an unusable SUT message as a violation and a pending fault.
    fn note_bad_message(
        &self,
        pid: &ProcessId,
        message_type: Option<MessageType>,
        reason: String,
    ) {
        if let Err(err) = self.record_bad_message(pid, message_type, reason) {
            debug!(process_id = %pid, error = %err, "bad message not recorded");
        }
    }

    fn record_bad_message(
        &self,
        pid: &ProcessId,
        message_type: Option<MessageType>,
        reason: String,
    ) -> Result<(), CorrelationError> {
        self.store()
            .record_violation(pid, message_type, SenderRole::Sut, reason.clone())?;
        self.store().record_fault(
            pid,
            CorrelationError::CounterpartyFault {
                process_id: pid.clone(),
                reason,
            },
        )
    }

    fn acknowledge(&self, pid: &ProcessId, status: StatusCode) -> EndpointResult {
        let exchange = self.store().snapshot(pid)?;
        let document = exchange
            .negotiation_snapshot()
            .to_document()
            .map_err(|e| EndpointError::Internal(e.to_string()))?;
        Ok((status, Json(document)).into_response())
    }

    fn query(&self, role: Role, pid: ProcessId) -> EndpointResult {
        let exchange = self
            .store()
            .snapshot(&pid)
            .map_err(|_| EndpointError::UnknownProcess(pid.clone()))?;
        if exchange.role() != role {
            return Err(EndpointError::UnknownProcess(pid));
        }
        match exchange.negotiation_snapshot().to_document() {
            Ok(document) => Ok((StatusCode::OK, Json(document)).into_response()),
            Err(_) => Err(EndpointError::UnknownProcess(pid)),
        }
    }
}

enum Resolved {
    Fresh(ProcessId),
    Redelivered(ProcessId),
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn provider_initial_request(State(endpoint): State<Endpoint>, body: Bytes) -> EndpointResult {
    endpoint.receive(Role::Provider, None, &[MessageType::Request], &body)
}

async fn provider_request(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Provider, Some(pid.into()), &[MessageType::Request], &body)
}

async fn provider_events(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Provider, Some(pid.into()), &[MessageType::Accept], &body)
}

async fn provider_verification(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(
        Role::Provider,
        Some(pid.into()),
        &[MessageType::Verification],
        &body,
    )
}

async fn provider_termination(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Provider, Some(pid.into()), &[MessageType::Terminate], &body)
}

async fn provider_query(State(endpoint): State<Endpoint>, Path(pid): Path<String>) -> EndpointResult {
    endpoint.query(Role::Provider, pid.into())
}

async fn consumer_initial_offer(State(endpoint): State<Endpoint>, body: Bytes) -> EndpointResult {
    endpoint.receive(Role::Consumer, None, &[MessageType::Offer], &body)
}

async fn consumer_offer(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Consumer, Some(pid.into()), &[MessageType::Offer], &body)
}

async fn consumer_agreement(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Consumer, Some(pid.into()), &[MessageType::Agreement], &body)
}

async fn consumer_events(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Consumer, Some(pid.into()), &[MessageType::Finalize], &body)
}

async fn consumer_termination(
    State(endpoint): State<Endpoint>,
    Path(pid): Path<String>,
    body: Bytes,
) -> EndpointResult {
    endpoint.receive(Role::Consumer, Some(pid.into()), &[MessageType::Terminate], &body)
}

async fn consumer_query(State(endpoint): State<Endpoint>, Path(pid): Path<String>) -> EndpointResult {
    endpoint.query(Role::Consumer, pid.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dsp_protocol::{NegotiationState, encode};

    use super::*;
    use crate::driver::DriverClient;
    use crate::retry::RetryPolicy;

    fn endpoint() -> Endpoint {
        let store = Arc::new(CorrelationStore::new());
        let driver = DriverClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        Endpoint::new(Responder::new(
            store,
            driver,
            RetryPolicy::no_retry(),
            false,
            "http://tck",
            "offer-1",
        ))
    }

    fn offer(consumer: &str) -> ProtocolMessage {
        ProtocolMessage::new(MessageType::Offer)
            .with_consumer_pid(consumer)
            .with_provider_pid("sut-p")
            .with_offer_id("offer-1")
    }

    fn requested(endpoint: &Endpoint, pid: &str) -> ProcessId {
        let pid = ProcessId::new(pid);
        endpoint
            .store()
            .begin_exchange(pid.clone(), Role::Consumer)
            .unwrap();
        let request = ProtocolMessage::new(MessageType::Request)
            .with_consumer_pid(pid.clone())
            .with_offer_id("offer-1")
            .with_callback_address("http://tck/consumer");
        endpoint
            .store()
            .record_transition(&pid, &request, SenderRole::Tck)
            .unwrap();
        pid
    }

    #[tokio::test]
    async fn legal_callback_is_acknowledged_with_snapshot() {
        let endpoint = endpoint();
        let pid = requested(&endpoint, "c1");
        let body = encode(&offer("c1")).unwrap();
        let response = endpoint
            .receive(Role::Consumer, Some(pid.clone()), &[MessageType::Offer], &body)
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            endpoint.store().snapshot(&pid).unwrap().state(),
            NegotiationState::Offered
        );
    }

    #[tokio::test]
    async fn illegal_callback_is_rejected_with_400() {
        let endpoint = endpoint();
        let pid = requested(&endpoint, "c1");
        let finalize = ProtocolMessage::new(MessageType::Finalize)
            .with_consumer_pid("c1")
            .with_provider_pid("sut-p");
        let err = endpoint
            .receive(
                Role::Consumer,
                Some(pid.clone()),
                &[MessageType::Finalize],
                &encode(&finalize).unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(err, EndpointError::Illegal(_)));
        assert_eq!(endpoint.store().snapshot(&pid).unwrap().violations().len(), 1);
    }

    #[test]
    fn bad_message_is_recorded_as_violation_and_fault() {
        let endpoint = endpoint();
        let pid = requested(&endpoint, "c1");
        endpoint
            .record_bad_message(&pid, Some(MessageType::Agreement), "wrong route".into())
            .unwrap();
        assert_eq!(endpoint.store().snapshot(&pid).unwrap().violations().len(), 1);
        assert!(matches!(
            endpoint.store().take_fault(&pid),
            Some(CorrelationError::CounterpartyFault { .. })
        ));

        let ghost = ProcessId::new("ghost");
        assert!(matches!(
            endpoint.record_bad_message(&ghost, None, "undecodable".into()),
            Err(CorrelationError::UnknownProcess(_))
        ));
        endpoint.note_bad_message(&ghost, None, "undecodable".into());
    }

    #[tokio::test]
    async fn unknown_pid_is_404() {
        let endpoint = endpoint();
        let err = endpoint
            .receive(
                Role::Consumer,
                Some("ghost".into()),
                &[MessageType::Offer],
                &encode(&offer("ghost")).unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn path_and_body_pid_must_agree() {
        let endpoint = endpoint();
        let pid = requested(&endpoint, "c1");
        let err = endpoint
            .receive(
                Role::Consumer,
                Some(pid.clone()),
                &[MessageType::Offer],
                &encode(&offer("c2")).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EndpointError::Misrouted(_)));
        assert!(matches!(
            endpoint.store().take_fault(&pid),
            Some(CorrelationError::CounterpartyFault { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_400_and_faults_the_exchange() {
        let endpoint = endpoint();
        let pid = requested(&endpoint, "c1");
        let err = endpoint
            .receive(Role::Consumer, Some(pid.clone()), &[MessageType::Offer], b"{\"nope\":1}")
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(endpoint.store().take_fault(&pid).is_some());
    }

    #[tokio::test]
    async fn initial_request_creates_exchange_and_redelivery_is_idempotent() {
        let endpoint = endpoint();
        let request = ProtocolMessage::new(MessageType::Request)
            .with_consumer_pid("sut-c")
            .with_offer_id("offer-1")
            .with_callback_address("http://sut/callback");
        let body = encode(&request).unwrap();

        let first = endpoint
            .receive(Role::Provider, None, &[MessageType::Request], &body)
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(endpoint.store().len(), 1);

        let again = endpoint
            .receive(Role::Provider, None, &[MessageType::Request], &body)
            .unwrap();
        assert_eq!(again.status(), StatusCode::CREATED);
        assert_eq!(endpoint.store().len(), 1);

        let pid = endpoint.store().process_ids().remove(0);
        let exchange = endpoint.store().snapshot(&pid).unwrap();
        assert_eq!(exchange.state(), NegotiationState::Requested);
        assert_eq!(exchange.callback_address(), Some("http://sut/callback"));
        assert_eq!(exchange.history().len(), 1);
    }

    #[tokio::test]
    async fn query_hides_initial_exchanges() {
        let endpoint = endpoint();
        endpoint.store().begin_exchange("fresh", Role::Consumer).unwrap();
        assert_eq!(
            endpoint
                .query(Role::Consumer, "fresh".into())
                .unwrap_err()
                .status_code(),
            StatusCode::NOT_FOUND
        );
        let pid = requested(&endpoint, "c1");
        assert_eq!(
            endpoint.query(Role::Consumer, pid).unwrap().status(),
            StatusCode::OK
        );
    }
}
