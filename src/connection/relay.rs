//! Outbound delivery to WebSocket clients.
//!
//! The platform keeps the socket; the function can only reach the client
//! through the management API of the gateway that owns it:
//! `POST {endpoint}/@connections/{id}` to push a frame and
//! `DELETE {endpoint}/@connections/{id}` to hang up.

use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;
use url::Url;

use crate::aws::sigv4::{self, SignableRequest, SigningParams};
use crate::aws::Credentials;

const SERVICE: &str = "execute-api";

/// Relay failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The client is no longer connected.
    #[error("connection {0} is gone")]
    Gone(String),

    /// Any other delivery failure.
    #[error("relay transport error: {0}")]
    Transport(String),
}

/// Delivers frames to clients and closes their connections.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn post_to_connection(&self, id: &str, data: &[u8]) -> Result<(), RelayError>;

    async fn delete_connection(&self, id: &str) -> Result<(), RelayError>;
}

/// Signed client for the gateway management API.
pub struct ManagementApiClient {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

impl ManagementApiClient {
    pub fn new(endpoint: Url, region: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            region: region.into(),
            credentials,
        }
    }

    /// The endpoint of the gateway stage that delivered an event.
    pub fn default_endpoint(domain_name: &str, stage: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{}/{}", domain_name, stage))
    }

    fn connection_url(&self, id: &str) -> Result<Url, RelayError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let encoded = utf8_percent_encode(id, NON_ALPHANUMERIC);
        Url::parse(&format!("{}/@connections/{}", base, encoded))
            .map_err(|e| RelayError::Transport(format!("invalid connection url: {}", e)))
    }

    async fn execute(&self, method: reqwest::Method, id: &str, payload: &[u8]) -> Result<(), RelayError> {
        let url = self.connection_url(id)?;
        let signed = sigv4::sign(
            &SignableRequest {
                method: method.as_str(),
                url: &url,
                headers: &[],
                payload,
            },
            &SigningParams {
                credentials: &self.credentials,
                region: &self.region,
                service: SERVICE,
                time: Utc::now(),
            },
        );

        let mut request = self.client.request(method, url).body(payload.to_vec());
        for (name, value) in &signed {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::GONE {
            Err(RelayError::Gone(id.to_string()))
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(RelayError::Transport(format!("HTTP {}: {}", status.as_u16(), text)))
        }
    }
}

#[async_trait]
impl RelayTransport for ManagementApiClient {
    async fn post_to_connection(&self, id: &str, data: &[u8]) -> Result<(), RelayError> {
        self.execute(reqwest::Method::POST, id, data).await
    }

    async fn delete_connection(&self, id: &str) -> Result<(), RelayError> {
        self.execute(reqwest::Method::DELETE, id, b"").await
    }
}

impl std::fmt::Debug for ManagementApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementApiClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .finish()
    }
}
