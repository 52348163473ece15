//! Scriptable provider SUT that issues real callbacks.
//!
//! Unlike [`crate::MockSut`], a [`SimulatedSut`] reacts to what it receives by
//! POSTing messages back to the sender's callback address, following a
//! [`SutPlan`]. The plan need not be conformant, which is the point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use dsp_protocol::{
    Direction, MessageType, NegotiationError, NegotiationSnapshot, NegotiationState, ProcessId,
    ProtocolMessage, Role, binding, decode, transition,
};
use dsp_tck::ServerHandle;
use dsp_tck::responder::default_reply;
use dsp_tck::scenario::{MessageTemplate, TemplateContext};
use dsp_tck::server::spawn_on;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// What the simulated provider sends back for each message type it receives.
#[derive(Debug, Clone, Default)]
pub struct SutPlan {
    reactions: HashMap<MessageType, Vec<MessageType>>,
}

impl SutPlan {
    /// A plan that never calls back.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// The replies a conformant provider gives.
    #[must_use]
    pub fn conformant() -> Self {
        MessageType::ALL.iter().fold(Self::default(), |plan, &received| {
            match default_reply(Role::Provider, received) {
                Some(reply) => plan.on(received, [reply]),
                None => plan,
            }
        })
    }

    /// Answer `received` with `replies`, in order.
    #[must_use]
    pub fn on(
        mut self,
        received: MessageType,
        replies: impl IntoIterator<Item = MessageType>,
    ) -> Self {
        self.reactions.insert(received, replies.into_iter().collect());
        self
    }
}

#[derive(Debug, Clone)]
struct SimNegotiation {
    consumer_pid: ProcessId,
    callback: String,
    offer_id: String,
    state: NegotiationState,
}

struct Inner {
    plan: SutPlan,
    base_url: String,
    negotiations: Mutex<HashMap<ProcessId, SimNegotiation>>,
    received: Mutex<Vec<MessageType>>,
    next_pid: AtomicUsize,
    http: reqwest::Client,
}

/// A running simulated provider.
pub struct SimulatedSut {
    inner: Arc<Inner>,
    server: ServerHandle,
}

impl SimulatedSut {
    /// Start a provider that follows `plan`.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind.
    pub async fn start(plan: SutPlan) -> Self {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("bind simulated SUT");
        let addr = listener.local_addr().expect("local addr");
        let inner = Arc::new(Inner {
            plan,
            base_url: format!("http://{addr}/provider"),
            negotiations: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            next_pid: AtomicUsize::new(1),
            http: reqwest::Client::new(),
        });
        let router = Router::new()
            .route("/provider/negotiations/request", post(initial))
            .route("/provider/negotiations/:pid/*rest", post(follow_up))
            .with_state(Arc::clone(&inner));
        let server = spawn_on(listener, router).expect("serve simulated SUT");
        Self { inner, server }
    }

    /// Protocol base URL of the provider surface.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Types received, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<MessageType> {
        self.inner.received.lock().clone()
    }

    /// State the simulated provider believes `pid` is in.
    #[must_use]
    pub fn state(&self, pid: &str) -> Option<NegotiationState> {
        self.inner
            .negotiations
            .lock()
            .get(&ProcessId::new(pid))
            .map(|n| n.state)
    }

    /// Stop the listener.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

fn reject(status: StatusCode, reason: impl Into<String>) -> Response {
    let body = NegotiationError::new(status.as_u16().to_string(), reason).to_document();
    (status, Json(body)).into_response()
}

async fn initial(State(inner): State<Arc<Inner>>, body: Bytes) -> Response {
    let message = match decode(&body) {
        Ok(message) if message.is_initial() && message.message_type == MessageType::Request => {
            message
        }
        Ok(message) => {
            let reason = format!("{} is not an initial request", message.message_type);
            return reject(StatusCode::BAD_REQUEST, reason);
        }
        Err(err) => return reject(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let (Some(consumer_pid), Some(callback)) = (
        message.process_id(Role::Consumer).cloned(),
        message.callback_address().map(str::to_string),
    ) else {
        return reject(StatusCode::BAD_REQUEST, "missing consumerPid or callbackAddress");
    };
    let pid = ProcessId::new(format!(
        "sim-{}",
        inner.next_pid.fetch_add(1, Ordering::Relaxed)
    ));
    inner.negotiations.lock().insert(
        pid.clone(),
        SimNegotiation {
            consumer_pid,
            callback,
            offer_id: message.offer_id().unwrap_or("sim-offer").to_string(),
            state: NegotiationState::Initial,
        },
    );
    react(&inner, pid, &message, StatusCode::CREATED)
}

async fn follow_up(
    State(inner): State<Arc<Inner>>,
    Path((pid, _rest)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let message = match decode(&body) {
        Ok(message) => message,
        Err(err) => return reject(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let pid = ProcessId::new(pid);
    if !inner.negotiations.lock().contains_key(&pid) {
        return reject(StatusCode::NOT_FOUND, format!("unknown process {pid}"));
    }
    react(&inner, pid, &message, StatusCode::OK)
}

fn react(
    inner: &Arc<Inner>,
    pid: ProcessId,
    message: &ProtocolMessage,
    status: StatusCode,
) -> Response {
    inner.received.lock().push(message.message_type);
    let negotiation = {
        let mut negotiations = inner.negotiations.lock();
        let Some(negotiation) = negotiations.get_mut(&pid) else {
            return reject(StatusCode::NOT_FOUND, format!("unknown process {pid}"));
        };
        // Lenient: an illegal message leaves the state alone.
        negotiation.state = transition(
            Role::Provider,
            negotiation.state,
            message.message_type,
            Direction::Inbound,
        )
        .unwrap_or(negotiation.state);
        negotiation.clone()
    };

    let replies = inner
        .plan
        .reactions
        .get(&message.message_type)
        .cloned()
        .unwrap_or_default();
    if !replies.is_empty() {
        let inner = Arc::clone(inner);
        let pid = pid.clone();
        let negotiation = negotiation.clone();
        tokio::spawn(async move {
            for reply in replies {
                send(&inner, &pid, &negotiation, reply).await;
            }
        });
    }

    let ack = NegotiationSnapshot {
        consumer_pid: Some(negotiation.consumer_pid),
        provider_pid: Some(pid),
        state: negotiation.state,
    };
    match ack.to_document() {
        Ok(document) => (status, Json(document)).into_response(),
        Err(err) => reject(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn send(
    inner: &Inner,
    pid: &ProcessId,
    negotiation: &SimNegotiation,
    message_type: MessageType,
) {
    let context = TemplateContext {
        role: Role::Provider,
        own_pid: pid.clone(),
        counterparty_pid: Some(negotiation.consumer_pid.clone()),
        offer_id: negotiation.offer_id.clone(),
        callback_address: inner.base_url.clone(),
    };
    let message = match MessageTemplate::new(message_type).materialize(&context) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "simulated SUT cannot build {message_type}");
            return;
        }
    };
    let Some(path) = binding::message_path(&message, Role::Provider) else {
        return;
    };
    if let Ok(next) = transition(Role::Provider, negotiation.state, message_type, Direction::Outbound) {
        if let Some(tracked) = inner.negotiations.lock().get_mut(pid) {
            tracked.state = next;
        }
    }
    let url = binding::join(&negotiation.callback, &path);
    let Ok(body) = dsp_protocol::encode(&message) else {
        return;
    };
    match inner
        .http
        .post(&url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(response) => debug!(%url, status = response.status().as_u16(), "simulated SUT callback"),
        Err(err) => warn!(%url, error = %err, "simulated SUT callback failed"),
    }
}
