//! Invocation event parsing.
//!
//! Three event shapes reach the bridge:
//! - REST API (payload v1): `httpMethod`, `path`, `multiValueQueryStringParameters`
//! - HTTP API (payload v2): `requestContext.http`, `rawQueryString`, `cookies`
//! - WebSocket API: `requestContext.eventType` and `requestContext.connectionId`

use base64::Engine;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use crate::adapter::AdapterError;
use crate::protocol::message::Payload;
use crate::protocol::scope::{ConnectionScope, Headers, InvocationMetadata};

/// Port assumed when neither `host` nor `x-forwarded-port` carries one.
const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RestApi,
    HttpApi,
    WebSocket(WebSocketEventType),
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RestApi | EventKind::HttpApi => "http",
            EventKind::WebSocket(_) => "websocket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketEventType {
    Connect,
    Message,
    Disconnect,
}

impl WebSocketEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebSocketEventType::Connect => "CONNECT",
            WebSocketEventType::Message => "MESSAGE",
            WebSocketEventType::Disconnect => "DISCONNECT",
        }
    }
}

/// Decide which kind of event this is.
pub fn classify(event: &Value) -> Result<EventKind, AdapterError> {
    let context = request_context(event)?;
    match context.get("eventType").and_then(Value::as_str) {
        Some("CONNECT") => Ok(EventKind::WebSocket(WebSocketEventType::Connect)),
        Some("MESSAGE") => Ok(EventKind::WebSocket(WebSocketEventType::Message)),
        Some("DISCONNECT") => Ok(EventKind::WebSocket(WebSocketEventType::Disconnect)),
        Some(other) => Err(AdapterError::MalformedEvent(format!(
            "unknown WebSocket event type '{}'",
            other
        ))),
        None if context.contains_key("http") => Ok(EventKind::HttpApi),
        None => Ok(EventKind::RestApi),
    }
}

/// An HTTP request ready to be handed to the cycle.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub scope: ConnectionScope,
    pub body: Vec<u8>,
}

/// Build the scope and body of an HTTP event.
pub fn http_request(
    event: &Value,
    context: &Value,
    kind: EventKind,
    base_path: Option<&str>,
) -> Result<HttpRequest, AdapterError> {
    let request_context = request_context(event)?;
    let headers = headers(event);

    let (method, path, query_string, source_ip) = match kind {
        EventKind::HttpApi => {
            let http = request_context
                .get("http")
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("requestContext.http"))?;
            (
                required_str(http, "method")?,
                required_str(http, "path")?,
                event
                    .get("rawQueryString")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                http.get("sourceIp").and_then(Value::as_str),
            )
        }
        _ => {
            let event = event.as_object().ok_or_else(|| malformed("event"))?;
            (
                required_str(event, "httpMethod")?,
                required_str(event, "path")?,
                rest_query_string(event),
                source_ip(request_context),
            )
        }
    };

    let mut scope = ConnectionScope::http(method, &strip_base_path(path, base_path));
    scope.scheme = header_value(&headers, "x-forwarded-proto")
        .unwrap_or("https")
        .to_string();
    scope.query_string = query_string;
    scope.server = Some(get_server(&headers));
    scope.client = source_ip.map(|ip| (ip.to_string(), 0));
    scope.headers = headers;
    scope.invocation = InvocationMetadata {
        event: event.clone(),
        context: context.clone(),
        event_type: None,
    };

    Ok(HttpRequest {
        scope,
        body: decode_body(event)?,
    })
}

/// The fields of a WebSocket event the bridge acts on.
#[derive(Debug, Clone)]
pub struct WebSocketEvent {
    pub event_type: WebSocketEventType,
    pub connection_id: String,
    pub domain_name: Option<String>,
    pub stage: Option<String>,
    /// Frame received from the client (MESSAGE only).
    pub payload: Option<Payload>,
}

pub fn websocket_event(event: &Value) -> Result<WebSocketEvent, AdapterError> {
    let event_type = match classify(event)? {
        EventKind::WebSocket(event_type) => event_type,
        _ => return Err(malformed("requestContext.eventType")),
    };
    let context = request_context(event)?;
    let optional = |key: &str| context.get(key).and_then(Value::as_str).map(str::to_string);

    let payload = match event_type {
        WebSocketEventType::Message => {
            let bytes = decode_body(event)?;
            if is_base64_encoded(event) {
                Some(Payload::Binary(bytes))
            } else {
                Some(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
        _ => None,
    };

    Ok(WebSocketEvent {
        event_type,
        connection_id: required_str(context, "connectionId")?.to_string(),
        domain_name: optional("domainName"),
        stage: optional("stage"),
        payload,
    })
}

/// The scope persisted for a WebSocket connection at CONNECT.
pub fn websocket_scope(event: &Value, context: &Value, app_path: &str) -> ConnectionScope {
    let headers = headers(event);
    let mut scope = ConnectionScope::websocket(app_path);
    scope.scheme = header_value(&headers, "x-forwarded-proto")
        .unwrap_or("wss")
        .to_string();
    scope.server = Some(get_server(&headers));
    scope.client = request_context(event)
        .ok()
        .and_then(source_ip)
        .map(|ip| (ip.to_string(), 0));
    scope.headers = headers;
    scope.invocation = InvocationMetadata {
        event: event.clone(),
        context: context.clone(),
        event_type: Some(WebSocketEventType::Connect.as_str().to_string()),
    };
    scope
}

/// Lower-cased request headers, multi-value entries kept in order.
pub fn headers(event: &Value) -> Headers {
    let mut headers = Headers::new();
    if let Some(multi) = event.get("multiValueHeaders").and_then(Value::as_object) {
        for (name, values) in multi {
            for value in values.as_array().into_iter().flatten().filter_map(Value::as_str) {
                headers.push((name.to_ascii_lowercase(), value.to_string()));
            }
        }
    } else if let Some(single) = event.get("headers").and_then(Value::as_object) {
        for (name, value) in single {
            if let Some(value) = value.as_str() {
                headers.push((name.to_ascii_lowercase(), value.to_string()));
            }
        }
    }

    if let Some(cookies) = event.get("cookies").and_then(Value::as_array) {
        let cookies: Vec<&str> = cookies.iter().filter_map(Value::as_str).collect();
        if !cookies.is_empty() {
            headers.push(("cookie".to_string(), cookies.join("; ")));
        }
    }
    headers
}

/// Server address from the `host` header, falling back to `x-forwarded-port`.
pub fn get_server(headers: &Headers) -> (String, u16) {
    let host = header_value(headers, "host").unwrap_or("localhost");
    match host.split_once(':') {
        Some((name, port)) => (name.to_string(), port.parse().unwrap_or(DEFAULT_PORT)),
        None => {
            let port = header_value(headers, "x-forwarded-port")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT);
            (host.to_string(), port)
        }
    }
}

/// Remove the configured base path, then percent-decode. Empty becomes `/`.
pub fn strip_base_path(path: &str, base_path: Option<&str>) -> String {
    let mut path = path;
    if let Some(base) = base_path.map(|b| b.trim_matches('/')).filter(|b| !b.is_empty()) {
        let prefix = format!("/{}", base);
        if let Some(rest) = path.strip_prefix(prefix.as_str()) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest;
            }
        }
    }
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    if decoded.is_empty() {
        "/".to_string()
    } else {
        decoded.into_owned()
    }
}

fn rest_query_string(event: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(params) = event
        .get("multiValueQueryStringParameters")
        .and_then(Value::as_object)
    {
        for (key, values) in params {
            for value in values.as_array().into_iter().flatten().filter_map(Value::as_str) {
                serializer.append_pair(key, value);
            }
        }
    } else if let Some(params) = event.get("queryStringParameters").and_then(Value::as_object) {
        for (key, value) in params {
            if let Some(value) = value.as_str() {
                serializer.append_pair(key, value);
            }
        }
    }
    serializer.finish()
}

fn decode_body(event: &Value) -> Result<Vec<u8>, AdapterError> {
    let body = event.get("body").and_then(Value::as_str).unwrap_or_default();
    if is_base64_encoded(event) {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| AdapterError::MalformedEvent(format!("body is not valid base64: {}", e)))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

fn is_base64_encoded(event: &Value) -> bool {
    event
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn source_ip(request_context: &Map<String, Value>) -> Option<&str> {
    request_context
        .get("identity")
        .and_then(|identity| identity.get("sourceIp"))
        .and_then(Value::as_str)
}

fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn request_context(event: &Value) -> Result<&Map<String, Value>, AdapterError> {
    event
        .get("requestContext")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("requestContext"))
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, AdapterError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(key))
}

fn malformed(field: &str) -> AdapterError {
    AdapterError::MalformedEvent(format!("missing or invalid '{}'", field))
}
