//! Outbound HTTP client towards the SUT.
//!
//! The client never retries; [`crate::retry::RetryPolicy`] wraps it where
//! retries are wanted.

use std::time::Duration;

use dsp_protocol::{
    Envelope, NegotiationError, NegotiationSnapshot, ProcessId, ProtocolMessage, binding,
    decode_envelope, encode,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::correlation::Exchange;
use crate::error::{DriverError, DriverResult};

const JSON: &str = "application/json";

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutcome {
    pub status: u16,
    pub body: Vec<u8>,
    /// The body decoded as a protocol document, when it is one.
    pub envelope: Option<Envelope>,
}

impl HttpOutcome {
    /// The `ContractNegotiation` acknowledgement, if the SUT sent one.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&NegotiationSnapshot> {
        match &self.envelope {
            Some(Envelope::Negotiation(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    /// The body as JSON, if it parses.
    #[must_use]
    pub fn document(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

/// HTTP client bound to one SUT.
#[derive(Debug, Clone)]
pub struct DriverClient {
    http: reqwest::Client,
    base_url: String,
}

impl DriverClient {
    /// # Errors
    /// [`DriverError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> DriverResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// SUT protocol base URL from the configuration.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL for messages on `exchange`: the callback address the SUT
    /// announced, else the configured base URL.
    #[must_use]
    pub fn sut_base<'a>(&'a self, exchange: &'a Exchange) -> &'a str {
        exchange.callback_address().unwrap_or(&self.base_url)
    }

    /// Full URL that receives `message` sent by the engine on `exchange`.
    ///
    /// # Errors
    /// [`DriverError::NoRoute`] if the binding has no path for it.
    pub fn message_url(&self, exchange: &Exchange, message: &ProtocolMessage) -> DriverResult<String> {
        let path = binding::message_path(message, exchange.role()).ok_or(DriverError::NoRoute {
            message_type: message.message_type,
            sender: exchange.role(),
        })?;
        Ok(binding::join(self.sut_base(exchange), &path))
    }

    /// URL of the SUT's negotiation resource for `exchange`.
    #[must_use]
    pub fn negotiation_url(&self, exchange: &Exchange, counterparty_pid: &ProcessId) -> String {
        binding::join(
            self.sut_base(exchange),
            &binding::negotiation_path(counterparty_pid),
        )
    }

    /// Encode and POST a message.
    ///
    /// # Errors
    /// Codec, transport, or non-2xx errors.
    pub async fn send(&self, url: &str, message: &ProtocolMessage) -> DriverResult<HttpOutcome> {
        let body = encode(message)?;
        debug!(url, message_type = %message.message_type, "sending message");
        self.send_raw(url, body).await
    }

    /// POST pre-encoded bytes.
    ///
    /// # Errors
    /// Transport or non-2xx errors.
    pub async fn send_raw(&self, url: &str, body: Vec<u8>) -> DriverResult<HttpOutcome> {
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .body(body)
            .send()
            .await?;
        Self::finish(response).await
    }

    /// POST an arbitrary JSON body.
    ///
    /// # Errors
    /// Transport or non-2xx errors.
    pub async fn post_json(&self, url: &str, body: &Value) -> DriverResult<HttpOutcome> {
        debug!(url, "posting json");
        let response = self
            .http
            .post(url)
            .header(ACCEPT, JSON)
            .json(body)
            .send()
            .await?;
        Self::finish(response).await
    }

    /// GET a negotiation resource.
    ///
    /// # Errors
    /// Transport or non-2xx errors, or a body that is not a
    /// `ContractNegotiation`.
    pub async fn get_negotiation(&self, url: &str) -> DriverResult<(NegotiationSnapshot, Value)> {
        let response = self.http.get(url).header(ACCEPT, JSON).send().await?;
        let outcome = Self::finish(response).await?;
        let document = outcome.document().unwrap_or(Value::Null);
        match outcome.envelope {
            Some(Envelope::Negotiation(snapshot)) => Ok((snapshot, document)),
            _ => Err(dsp_protocol::CodecError::Decoding(format!(
                "expected a ContractNegotiation, got {}",
                String::from_utf8_lossy(&outcome.body)
            ))
            .into()),
        }
    }

    async fn finish(response: reqwest::Response) -> DriverResult<HttpOutcome> {
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        let envelope = if body.is_empty() {
            None
        } else {
            decode_envelope(&body).ok()
        };
        if !status.is_success() {
            let error = match envelope {
                Some(Envelope::Error(error)) => Some(error),
                _ => None::<NegotiationError>,
            };
            return Err(DriverError::ProtocolHttp {
                status: status.as_u16(),
                error,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(HttpOutcome {
            status: status.as_u16(),
            body,
            envelope,
        })
    }
}

#[cfg(test)]
mod tests {
    use dsp_protocol::{MessageType, NegotiationState, Role, vocab};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> ProtocolMessage {
        ProtocolMessage::new(MessageType::Request)
            .with_consumer_pid("c1")
            .with_offer_id("offer-1")
            .with_callback_address("http://tck/consumer")
    }

    #[tokio::test]
    async fn decodes_acknowledgement() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/negotiations/request"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "@context": {"dspace": vocab::DSPACE_NAMESPACE},
                "@type": "dspace:ContractNegotiation",
                "dspace:consumerPid": "c1",
                "dspace:providerPid": "p1",
                "dspace:state": "dspace:REQUESTED",
            })))
            .mount(&server)
            .await;

        let client = DriverClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let url = binding::join(&server.uri(), "/negotiations/request");
        let outcome = client.send(&url, &request()).await.unwrap();
        assert_eq!(outcome.status, 201);
        let snapshot = outcome.snapshot().unwrap();
        assert_eq!(snapshot.provider_pid, Some("p1".into()));
        assert_eq!(snapshot.state, NegotiationState::Requested);
    }

    #[tokio::test]
    async fn surfaces_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "@context": {"dspace": vocab::DSPACE_NAMESPACE},
                "@type": "dspace:ContractNegotiationError",
                "dspace:code": "400",
                "dspace:reason": ["offer unknown"],
            })))
            .mount(&server)
            .await;

        let client = DriverClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client
            .send(&format!("{}/negotiations/request", server.uri()), &request())
            .await
            .unwrap_err();
        let DriverError::ProtocolHttp { status, error, .. } = err else {
            panic!("expected protocol error, got {err}");
        };
        assert_eq!(status, 400);
        assert_eq!(error.unwrap().reason, vec!["offer unknown".to_string()]);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let client = DriverClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client
            .send("http://127.0.0.1:9/negotiations/request", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn no_route_for_wrong_sender() {
        let store = crate::correlation::CorrelationStore::new();
        let exchange = store.begin_exchange("c1", Role::Consumer).unwrap();
        let client = DriverClient::new("http://sut", Duration::from_secs(1)).unwrap();
        let offer = ProtocolMessage::new(MessageType::Offer)
            .with_consumer_pid("c1")
            .with_provider_pid("p1");
        assert!(matches!(
            client.message_url(&exchange, &offer),
            Err(DriverError::NoRoute { .. })
        ));
        assert_eq!(
            client.message_url(&exchange, &request()).unwrap(),
            "http://sut/negotiations/request"
        );
    }
}
