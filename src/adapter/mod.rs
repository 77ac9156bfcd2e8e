//! Bridge between invocation events and the application.
//!
//! # Responsibilities
//! - Classify the raw event (REST API, HTTP API, WebSocket)
//! - Build the connection scope and run the matching cycle
//! - Open the connection store and relay transport for WebSocket events
//! - Serialize the outcome into the invocation response
//!
//! # Data Flow
//! ```text
//! event + context
//!     → event::classify
//!     ├── HTTP: event::http_request → HttpCycle → InvocationResponse::from_http
//!     └── WebSocket
//!           CONNECT    → Connection::establish
//!           MESSAGE    → Connection::resume → WebSocketCycle (relay via management API)
//!           DISCONNECT → Connection::terminate
//! ```
//!
//! # Design Decisions
//! - Store and relay clients are built per invocation; nothing is cached
//! - Store configuration errors abort the invocation (`Err`); every other
//!   failure is a 500 response
//! - Lifespan startup runs once, before the first invocation

pub mod event;
pub mod response;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::Instrument;
use url::Url;

use crate::aws::{Credentials, MissingCredentials};
use crate::config::BridgeConfig;
use crate::connection::{Connection, ConnectionError, ManagementApiClient, RelayTransport};
use crate::observability::metrics;
use crate::protocol::cycle::{Application, CycleConfig};
use crate::protocol::http::HttpCycle;
use crate::protocol::lifespan::{Lifespan, LifespanError};
use crate::protocol::message::InboundMessage;
use crate::protocol::websocket::WebSocketCycle;
use crate::store::{ConnectionStore, StoreError};

pub use event::{EventKind, WebSocketEventType};
pub use response::{InvocationResponse, ResponseFormat};

/// Region used to sign management API calls when nothing else names one.
const FALLBACK_REGION: &str = "us-east-1";

/// Errors that abort an invocation instead of producing a response.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The connection store is misconfigured (missing table, bad endpoint).
    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Credentials(#[from] MissingCredentials),

    #[error("invalid management endpoint: {0}")]
    ManagementEndpoint(String),

    #[error(transparent)]
    Lifespan(#[from] LifespanError),
}

/// Runs invocation events through one application.
pub struct Bridge {
    app: Arc<dyn Application>,
    config: BridgeConfig,
    cycle_config: CycleConfig,
    credentials: Option<Credentials>,
    lifespan: Mutex<Option<Lifespan>>,
    started: OnceCell<()>,
}

impl Bridge {
    pub fn new(app: Arc<dyn Application>, config: BridgeConfig) -> Self {
        let cycle_config = CycleConfig::from(&config);
        Self {
            app,
            config,
            cycle_config,
            credentials: None,
            lifespan: Mutex::new(None),
            started: OnceCell::new(),
        }
    }

    /// Sign AWS calls with `credentials` instead of the runtime environment.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run lifespan startup; later calls are no-ops.
    pub async fn startup(&self) -> Result<(), AdapterError> {
        self.started
            .get_or_try_init(|| async {
                if self.config.lifespan.enabled {
                    let mut lifespan = Lifespan::spawn(self.app.clone());
                    lifespan.startup().await?;
                    *self.lifespan.lock().await = Some(lifespan);
                }
                Ok::<(), AdapterError>(())
            })
            .await
            .map(|_| ())
    }

    /// Run lifespan shutdown if the application took part in startup.
    pub async fn shutdown(&self) -> Result<(), AdapterError> {
        let lifespan = self.lifespan.lock().await.take();
        if let Some(mut lifespan) = lifespan {
            lifespan.shutdown().await?;
        }
        Ok(())
    }

    /// Handle one invocation event.
    pub async fn handle(
        &self,
        event: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<InvocationResponse, AdapterError> {
        let request_id = context
            .get("aws_request_id")
            .or_else(|| context.get("awsRequestId"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("invocation", request_id = %request_id);

        async {
            self.startup().await?;
            let start = Instant::now();
            let kind = event::classify(event)?;
            let response = match kind {
                EventKind::RestApi => {
                    self.handle_http(event, context, kind, ResponseFormat::Rest).await?
                }
                EventKind::HttpApi => {
                    self.handle_http(event, context, kind, ResponseFormat::HttpApi).await?
                }
                EventKind::WebSocket(_) => self.handle_websocket(event, context).await?,
            };
            metrics::record_invocation(kind.as_str(), response.status_code, start);
            Ok::<InvocationResponse, AdapterError>(response)
        }
        .instrument(span)
        .await
    }

    async fn handle_http(
        &self,
        event: &serde_json::Value,
        context: &serde_json::Value,
        kind: EventKind,
        format: ResponseFormat,
    ) -> Result<InvocationResponse, AdapterError> {
        let request = event::http_request(event, context, kind, self.config.http.base_path.as_deref())?;
        tracing::debug!(
            method = request.scope.method.as_deref().unwrap_or_default(),
            path = %request.scope.path,
            "Handling HTTP event"
        );

        let cycle = HttpCycle::new(request.scope, self.cycle_config.clone());
        cycle.enqueue(InboundMessage::HttpRequest {
            body: request.body,
            more_body: false,
        });
        let result = cycle.run(self.app.as_ref()).await;
        Ok(InvocationResponse::from_http(&result, format))
    }

    async fn handle_websocket(
        &self,
        event: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<InvocationResponse, AdapterError> {
        let ws = event::websocket_event(event)?;
        tracing::debug!(
            connection_id = %ws.connection_id,
            event_type = ws.event_type.as_str(),
            "Received WebSocket event"
        );

        let store = match ConnectionStore::open(&self.config.store, self.credentials.clone()).await {
            Ok(store) => store,
            Err(err) if err.is_fatal() => return Err(AdapterError::Store(err)),
            Err(err) => {
                tracing::error!(error = %err, "Connection store unavailable");
                return Ok(InvocationResponse::status(500));
            }
        };
        let mut connection = Connection::new(ws.connection_id.clone(), store);

        let status = match ws.event_type {
            WebSocketEventType::Connect => {
                let scope = event::websocket_scope(event, context, &self.config.websocket.app_path);
                settle(connection.establish(&scope).await.map(|_| 200))?
            }
            WebSocketEventType::Message => {
                let relay = self.management_client(&ws)?;
                connection = connection.with_relay(relay);
                match connection.resume().await {
                    Ok(scope) => {
                        let cycle = WebSocketCycle::new(scope, &mut connection, self.cycle_config.clone());
                        cycle.enqueue(InboundMessage::WebSocketConnect);
                        if let Some(payload) = ws.payload {
                            cycle.enqueue(InboundMessage::WebSocketReceive(payload));
                        }
                        cycle.run(self.app.as_ref()).await.status
                    }
                    Err(err) => settle(Err(err))?,
                }
            }
            WebSocketEventType::Disconnect => settle(connection.terminate().await.map(|_| 200))?,
        };
        Ok(InvocationResponse::status(status))
    }

    fn management_client(
        &self,
        ws: &event::WebSocketEvent,
    ) -> Result<Arc<dyn RelayTransport>, AdapterError> {
        let endpoint = match (&self.config.websocket.management_endpoint, &ws.domain_name, &ws.stage) {
            (Some(endpoint), _, _) => Url::parse(endpoint),
            (None, Some(domain), Some(stage)) => ManagementApiClient::default_endpoint(domain, stage),
            _ => {
                return Err(AdapterError::MalformedEvent(
                    "MESSAGE event without domainName/stage and no management endpoint configured"
                        .to_string(),
                ))
            }
        }
        .map_err(|e| AdapterError::ManagementEndpoint(e.to_string()))?;

        let region = self
            .config
            .store
            .region
            .clone()
            .or_else(|| endpoint.host_str().and_then(region_from_host))
            .unwrap_or_else(|| FALLBACK_REGION.to_string());
        let credentials = match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => Credentials::from_env()?,
        };
        Ok(Arc::new(ManagementApiClient::new(endpoint, region, credentials)))
    }
}

/// Turn a connection outcome into a status, aborting only on configuration errors.
fn settle(outcome: Result<u16, ConnectionError>) -> Result<u16, AdapterError> {
    match outcome {
        Ok(status) => Ok(status),
        Err(ConnectionError::Store(err)) if err.is_fatal() => Err(AdapterError::Store(err)),
        Err(err) => {
            tracing::error!(error = %err, "WebSocket event failed");
            Ok(500)
        }
    }
}

/// `{api}.execute-api.{region}.amazonaws.com` → `{region}`.
fn region_from_host(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        [_, "execute-api", region, "amazonaws", "com"] => Some(region.to_string()),
        _ => None,
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish()
    }
}
