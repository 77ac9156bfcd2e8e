//! Messages exchanged with the application.

use crate::protocol::scope::Headers;

/// A WebSocket data frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Raw bytes as posted to the client.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }
}

/// Messages the bridge delivers to the application through `receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    HttpRequest { body: Vec<u8>, more_body: bool },
    HttpDisconnect,
    WebSocketConnect,
    WebSocketReceive(Payload),
    WebSocketDisconnect { code: u16 },
    LifespanStartup,
    LifespanShutdown,
}

impl InboundMessage {
    /// ASGI message type.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::HttpRequest { .. } => "http.request",
            InboundMessage::HttpDisconnect => "http.disconnect",
            InboundMessage::WebSocketConnect => "websocket.connect",
            InboundMessage::WebSocketReceive(_) => "websocket.receive",
            InboundMessage::WebSocketDisconnect { .. } => "websocket.disconnect",
            InboundMessage::LifespanStartup => "lifespan.startup",
            InboundMessage::LifespanShutdown => "lifespan.shutdown",
        }
    }
}

/// Messages the application emits through `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    HttpResponseStart { status: u16, headers: Headers },
    HttpResponseBody { body: Vec<u8>, more_body: bool },
    WebSocketAccept { subprotocol: Option<String> },
    WebSocketSend(Payload),
    WebSocketClose { code: u16 },
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },
}

impl OutboundMessage {
    /// ASGI message type.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::HttpResponseStart { .. } => "http.response.start",
            OutboundMessage::HttpResponseBody { .. } => "http.response.body",
            OutboundMessage::WebSocketAccept { .. } => "websocket.accept",
            OutboundMessage::WebSocketSend(_) => "websocket.send",
            OutboundMessage::WebSocketClose { .. } => "websocket.close",
            OutboundMessage::LifespanStartupComplete => "lifespan.startup.complete",
            OutboundMessage::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            OutboundMessage::LifespanShutdownComplete => "lifespan.shutdown.complete",
            OutboundMessage::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
        }
    }
}
