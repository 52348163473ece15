//! Scripted SUT built on wiremock.
//!
//! A [`MockSut`] answers the engine's HTTP calls with canned responses and
//! records what it received. It never calls back on its own; tests play the
//! SUT's outbound half with [`deliver`].

use std::time::Duration;

use dsp_protocol::{
    MessageType, NegotiationError, NegotiationSnapshot, NegotiationState, ProcessId, ProtocolMessage,
    Role, binding, decode, encode,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A wiremock server standing in for one role of a connector.
pub struct MockSut {
    server: MockServer,
    role: Role,
}

impl MockSut {
    /// Start a SUT that plays `role`.
    pub async fn start(role: Role) -> Self {
        Self {
            server: MockServer::start().await,
            role,
        }
    }

    /// Protocol base URL, including the role prefix.
    #[must_use]
    pub fn base_url(&self) -> String {
        binding::join(&self.server.uri(), self.role.as_str())
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn inner(&self) -> &MockServer {
        &self.server
    }

    fn full_path(&self, relative: &str) -> String {
        binding::join(&format!("/{}", self.role.as_str()), relative)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Response Setup
    // ─────────────────────────────────────────────────────────────────────────────

    /// Answer POSTs to `relative` with a `ContractNegotiation` document.
    pub async fn acknowledge(&self, relative: &str, status: u16, snapshot: &NegotiationSnapshot) {
        let body = snapshot
            .to_document()
            .expect("acknowledged snapshot must not be INITIAL");
        Mock::given(method("POST"))
            .and(path(self.full_path(relative)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Accept the initial REQUEST, assigning `provider_pid`.
    ///
    /// The consumer pid is unknown until the request arrives, so the
    /// acknowledgement only carries the provider side.
    pub async fn accept_initial_request(&self, provider_pid: &str) {
        let ack = NegotiationSnapshot {
            consumer_pid: None,
            provider_pid: Some(ProcessId::new(provider_pid)),
            state: NegotiationState::Requested,
        };
        self.acknowledge("/negotiations/request", 201, &ack).await;
    }

    /// Reject POSTs to `relative` with `status` and a
    /// `ContractNegotiationError` body.
    pub async fn reject(&self, relative: &str, status: u16, reason: &str) {
        let body = NegotiationError::new(status.to_string(), reason).to_document();
        Mock::given(method("POST"))
            .and(path(self.full_path(relative)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Respond to the next `times` POSTs on `relative` with `status`, before
    /// any other mock on that path.
    pub async fn fail_times(&self, relative: &str, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path(self.full_path(relative)))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer state queries for `pid`.
    pub async fn answer_query(&self, pid: &str, snapshot: &NegotiationSnapshot) {
        let body = snapshot
            .to_document()
            .expect("queried snapshot must not be INITIAL");
        Mock::given(method("GET"))
            .and(path(self.full_path(&binding::negotiation_path(&ProcessId::new(pid)))))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────────

    /// Every decodable protocol message received, in arrival order.
    pub async fn received_messages(&self) -> Vec<ProtocolMessage> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| decode(&request.body).ok())
            .collect()
    }

    /// Number of requests received on `relative`.
    pub async fn hits(&self, relative: &str) -> usize {
        let full = self.full_path(relative);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == full)
            .count()
    }

    /// Wait until a message of `message_type` has arrived.
    ///
    /// # Panics
    ///
    /// Panics if none arrives within `timeout`.
    pub async fn wait_for(&self, message_type: MessageType, timeout: Duration) -> ProtocolMessage {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self
                .received_messages()
                .await
                .into_iter()
                .find(|m| m.message_type == message_type)
            {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no {message_type} received within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Play the SUT's outbound half: POST `message`, sent by `sender`, to the
/// counterparty whose protocol base is `base_url`. Returns the HTTP status.
///
/// # Panics
///
/// Panics if the message has no route or the request fails at transport
/// level.
pub async fn deliver(base_url: &str, message: &ProtocolMessage, sender: Role) -> u16 {
    let route = binding::message_path(message, sender).expect("message has no route");
    let body = encode(message).expect("message must encode");
    reqwest::Client::new()
        .post(binding::join(base_url, &route))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("deliver request failed")
        .status()
        .as_u16()
}

/// Snapshot with both pids set.
#[must_use]
pub fn snapshot(consumer_pid: &str, provider_pid: &str, state: NegotiationState) -> NegotiationSnapshot {
    NegotiationSnapshot {
        consumer_pid: Some(ProcessId::new(consumer_pid)),
        provider_pid: Some(ProcessId::new(provider_pid)),
        state,
    }
}
