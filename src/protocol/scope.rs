//! Connection scope.
//!
//! The immutable description of one logical connection handed to the
//! application. For WebSocket connections it is built once at CONNECT time,
//! persisted as JSON and restored on every later MESSAGE invocation, so the
//! serialized form must round-trip every field losslessly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered header list. Names are lower-case; duplicates are preserved.
pub type Headers = Vec<(String, String)>;

/// ASGI protocol version advertised to the application.
pub const ASGI_VERSION: &str = "3.0";

/// Transport type of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    Lifespan,
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Http => write!(f, "http"),
            ScopeKind::WebSocket => write!(f, "websocket"),
            ScopeKind::Lifespan => write!(f, "lifespan"),
        }
    }
}

/// Opaque invocation metadata passed through to the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationMetadata {
    /// The raw invocation event.
    pub event: Value,
    /// The invocation context, if the runtime supplied one.
    pub context: Value,
    /// WebSocket event type (`CONNECT`, `MESSAGE`, `DISCONNECT`) or `None` for HTTP.
    pub event_type: Option<String>,
}

/// Context of one logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionScope {
    #[serde(rename = "type")]
    pub kind: ScopeKind,
    #[serde(default = "default_asgi_version")]
    pub asgi_version: String,
    #[serde(default = "default_http_version")]
    pub http_version: String,
    /// Request method; `None` for WebSocket and lifespan scopes.
    #[serde(default)]
    pub method: Option<String>,
    pub scheme: String,
    pub path: String,
    #[serde(default)]
    pub raw_path: Option<String>,
    #[serde(default)]
    pub root_path: String,
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub client: Option<(String, u16)>,
    #[serde(default)]
    pub server: Option<(String, u16)>,
    #[serde(default)]
    pub invocation: InvocationMetadata,
}

fn default_asgi_version() -> String {
    ASGI_VERSION.to_string()
}

fn default_http_version() -> String {
    "1.1".to_string()
}

impl ConnectionScope {
    /// A bare HTTP scope for `method` and `path`.
    pub fn http(method: &str, path: &str) -> Self {
        Self::new(ScopeKind::Http, Some(method.to_string()), "https", path)
    }

    /// A bare WebSocket scope for `path`.
    pub fn websocket(path: &str) -> Self {
        Self::new(ScopeKind::WebSocket, None, "wss", path)
    }

    /// The scope used for the lifespan protocol.
    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, None, "", "")
    }

    fn new(kind: ScopeKind, method: Option<String>, scheme: &str, path: &str) -> Self {
        Self {
            kind,
            asgi_version: default_asgi_version(),
            http_version: default_http_version(),
            method,
            scheme: scheme.to_string(),
            path: path.to_string(),
            raw_path: None,
            root_path: String::new(),
            query_string: String::new(),
            headers: Vec::new(),
            client: None,
            server: None,
            invocation: InvocationMetadata::default(),
        }
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restore from the persisted form.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
