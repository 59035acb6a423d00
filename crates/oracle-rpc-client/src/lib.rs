//! Oracle RPC Client
//!
//! HTTP implementation of the peer [`Transport`] plus a small client for a
//! node's signing entry point.

use std::collections::HashMap;
use std::time::Duration;

use oracle_tss_core::transport::{async_trait, Transport};
use oracle_tss_core::{ConfirmedResult, Error, PartyId, PeerId, Result};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

/// Error body returned by a node for a failed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl ErrorBody {
    /// Rebuild the remote error on the caller's side
    pub fn into_error(self) -> Error {
        Error::from_remote(&self.kind, self.message)
    }
}

/// Body of `POST /v1/apps/{app}/sign`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub method: String,
    pub party: PartyId,
    pub n_sign: usize,
    #[serde(default)]
    pub params: Value,
}

/// Map an unsuccessful response to the remote error, or a transport fault
/// when the body is not an error body
async fn error_from_response(peer: &str, response: Response) -> Error {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.into_error(),
        Err(_) => Error::Transport(format!("{} answered with status {}", peer, status)),
    }
}

/// Peer transport over HTTP
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Base URL by peer
    peers: HashMap<PeerId, String>,
    /// Request timeout
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the given peer URLs
    pub fn new(peers: HashMap<PeerId, String>) -> Self {
        Self {
            client: Client::new(),
            peers: peers
                .into_iter()
                .map(|(peer, url)| (peer, url.trim_end_matches('/').to_string()))
                .collect(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint of `method` on `peer`
    fn endpoint(&self, peer: &PeerId, method: &str) -> Result<String> {
        let url = self
            .peers
            .get(peer)
            .ok_or_else(|| Error::Transport(format!("Unknown peer: {}", peer)))?;
        Ok(format!("{}/v1/rpc/{}", url, method))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, payload))]
    async fn call(&self, peer: &PeerId, method: &str, payload: Value) -> Result<Value> {
        let endpoint = self.endpoint(peer, method)?;

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(peer, response).await);
        }

        let value = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))?;

        debug!(peer = %peer, method, "RPC call completed");
        Ok(value)
    }
}

/// Client of a node's signing entry point
pub struct NodeClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Ask the node to originate a signing request for `app`
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn sign(&self, app: &str, request: &SignRequest) -> Result<ConfirmedResult> {
        let response = self
            .client
            .post(format!("{}/v1/apps/{}/sign", self.url, app))
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(&self.url, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_preserves_rejections() {
        let body = ErrorBody::from(&Error::ResultMismatch("price".into()));
        assert_eq!(body.kind, "result_mismatch");
        assert!(matches!(body.into_error(), Error::ResultMismatch(_)));

        let body = ErrorBody {
            kind: "store".into(),
            message: "disk full".into(),
        };
        assert!(matches!(body.into_error(), Error::Remote { .. }));
    }

    #[test]
    fn test_endpoint() {
        let peers = HashMap::from([("node-2".to_string(), "http://10.0.0.2:8700/".to_string())]);
        let transport = HttpTransport::new(peers);

        assert_eq!(
            transport
                .endpoint(&"node-2".to_string(), "app-quote-wantSign")
                .unwrap(),
            "http://10.0.0.2:8700/v1/rpc/app-quote-wantSign"
        );
        assert!(matches!(
            transport.endpoint(&"node-9".to_string(), "x"),
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let peers = HashMap::from([("node-2".to_string(), "http://127.0.0.1:1".to_string())]);
        let transport = HttpTransport::new(peers).with_timeout(Duration::from_secs(2));

        let result = transport
            .call(&"node-2".to_string(), "app-quote-wantSign", Value::Null)
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_sign_request_wire_names() {
        let request: SignRequest = serde_json::from_value(serde_json::json!({
            "method": "get_price",
            "party": "p1",
            "nSign": 2,
        }))
        .unwrap();

        assert_eq!(request.n_sign, 2);
        assert!(request.params.is_null());
    }
}
