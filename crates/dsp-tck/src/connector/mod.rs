//! A minimal, conformant connector that runs in-process.
//!
//! It serves both role surfaces and answers every message with the reply a
//! well-behaved counterparty would send. Pointing the engine at it exercises
//! the full catalog without an external system under test, and gives
//! scenario authors a known-good baseline.
//!
//! Consumer side, `POST {consumer_url}/tck/initiate` with
//! `{"providerUrl": .., "offerId": ..}` makes the connector request a
//! contract from the given provider.

mod manager;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use dsp_protocol::{MessageType, ProcessId, Role};
use serde::Deserialize;
use tokio::net::TcpListener;

pub use manager::{ContractNegotiation, NegotiationListener};
use manager::NegotiationManager;

use crate::catalog::INITIATE_PATH;
use crate::driver::DriverClient;
use crate::endpoint::EndpointError;
use crate::error::TckResult;
use crate::responder::callback_address;
use crate::server::{ServerHandle, spawn_on};

type Shared = Arc<NegotiationManager>;

/// Options for [`LocalConnector::start`].
#[derive(Debug, Clone)]
pub struct LocalConnectorOptions {
    pub listen_addr: SocketAddr,
    /// Answer each message with the conformant reply.
    pub auto_progress: bool,
    pub request_timeout: Duration,
    pub offer_id: String,
}

impl Default for LocalConnectorOptions {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            auto_progress: true,
            request_timeout: Duration::from_secs(5),
            offer_id: "urn:uuid:local-offer".into(),
        }
    }
}

/// Handle on a running local connector.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    manager: Shared,
}

impl LocalConnector {
    /// Bind and start serving.
    ///
    /// # Errors
    /// Bind or HTTP client construction errors.
    pub async fn start(options: LocalConnectorOptions) -> TckResult<(Self, ServerHandle)> {
        let listener = TcpListener::bind(options.listen_addr).await?;
        let public_url = format!("http://{}", listener.local_addr()?);
        // Every outbound URL is absolute, so the base is never used.
        let client = DriverClient::new(public_url.clone(), options.request_timeout)?;
        let manager = Arc::new(NegotiationManager::new(
            client,
            public_url,
            options.offer_id,
            options.auto_progress,
        ));
        let server = spawn_on(listener, router(Arc::clone(&manager)))?;
        Ok((Self { manager }, server))
    }

    /// Protocol base URL of the provider surface.
    #[must_use]
    pub fn provider_url(&self) -> String {
        callback_address(self.manager.public_url(), Role::Provider)
    }

    /// Protocol base URL of the consumer surface.
    #[must_use]
    pub fn consumer_url(&self) -> String {
        callback_address(self.manager.public_url(), Role::Consumer)
    }

    /// Base URL of the surface an engine running as `engine_role` talks to.
    #[must_use]
    pub fn url_for_engine(&self, engine_role: Role) -> String {
        match engine_role {
            Role::Consumer => self.provider_url(),
            Role::Provider => self.consumer_url(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn NegotiationListener>) {
        self.manager.add_listener(listener);
    }

    #[must_use]
    pub fn negotiation(&self, role: Role, pid: &ProcessId) -> Option<ContractNegotiation> {
        self.manager.get(role, pid)
    }

    #[must_use]
    pub fn negotiations(&self) -> Vec<ContractNegotiation> {
        self.manager.all()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

fn router(manager: Shared) -> Router {
    let provider = Router::new()
        .route("/negotiations/request", initial(Role::Provider, &[MessageType::Request]))
        .route("/negotiations/:pid", lookup(Role::Provider))
        .route("/negotiations/:pid/request", inbound(Role::Provider, &[MessageType::Request]))
        .route("/negotiations/:pid/events", inbound(Role::Provider, &[MessageType::Accept]))
        .route(
            "/negotiations/:pid/agreement/verification",
            inbound(Role::Provider, &[MessageType::Verification]),
        )
        .route("/negotiations/:pid/termination", inbound(Role::Provider, &[MessageType::Terminate]));

    let consumer = Router::new()
        .route("/negotiations/offers", initial(Role::Consumer, &[MessageType::Offer]))
        .route("/negotiations/:pid", lookup(Role::Consumer))
        .route("/negotiations/:pid/offers", inbound(Role::Consumer, &[MessageType::Offer]))
        .route("/negotiations/:pid/agreement", inbound(Role::Consumer, &[MessageType::Agreement]))
        .route("/negotiations/:pid/events", inbound(Role::Consumer, &[MessageType::Finalize]))
        .route("/negotiations/:pid/termination", inbound(Role::Consumer, &[MessageType::Terminate]))
        .route(INITIATE_PATH, post(initiate));

    Router::new()
        .nest("/provider", provider)
        .nest("/consumer", consumer)
        .with_state(manager)
}

fn initial(role: Role, accepted: &'static [MessageType]) -> MethodRouter<Shared> {
    post(move |State(manager): State<Shared>, body: Bytes| async move {
        acknowledge(manager.receive(role, None, accepted, &body))
    })
}

fn inbound(role: Role, accepted: &'static [MessageType]) -> MethodRouter<Shared> {
    post(
        move |State(manager): State<Shared>, Path(pid): Path<String>, body: Bytes| async move {
            acknowledge(manager.receive(role, Some(pid.into()), accepted, &body))
        },
    )
}

fn acknowledge(result: Result<(ContractNegotiation, bool), EndpointError>) -> Result<Response, EndpointError> {
    let (negotiation, created) = result?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    snapshot_response(&negotiation, status)
}

fn snapshot_response(negotiation: &ContractNegotiation, status: StatusCode) -> Result<Response, EndpointError> {
    let document = negotiation
        .snapshot()
        .to_document()
        .map_err(|e| EndpointError::Internal(e.to_string()))?;
    Ok((status, Json(document)).into_response())
}

fn lookup(role: Role) -> MethodRouter<Shared> {
    get(move |State(manager): State<Shared>, Path(pid): Path<String>| async move {
        let pid = ProcessId::from(pid);
        let Some(negotiation) = manager.get(role, &pid) else {
            return Err(EndpointError::UnknownProcess(pid));
        };
        // INITIAL has no wire name, so it is reported as unknown.
        snapshot_response(&negotiation, StatusCode::OK).map_err(|_| EndpointError::UnknownProcess(pid))
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    provider_url: String,
    #[serde(default)]
    offer_id: Option<String>,
}

async fn initiate(
    State(manager): State<Shared>,
    Json(request): Json<InitiateRequest>,
) -> Result<Response, EndpointError> {
    let negotiation = manager.initiate(&request.provider_url, request.offer_id).await?;
    snapshot_response(&negotiation, StatusCode::CREATED)
}
