//! WebSocket message cycle.
//!
//! One MESSAGE invocation replays the connection to the application: a
//! `websocket.connect` followed by the received frame. Every
//! `websocket.send` is relayed to the client immediately and in order.
//!
//! # State Transitions
//! ```text
//! Connecting ──websocket.accept | websocket.send──▶ Open
//! Connecting ──websocket.close──▶ Closed (403)
//! Open ──websocket.send──▶ Open (relayed)
//! Open ──websocket.close──▶ Closed (connection deleted at the gateway)
//! Open ──relay gone──▶ Closed (stored scope removed)
//! ```
//!
//! The cycle ends when the application returns, closes, or waits for a
//! frame that this invocation does not carry. In the last case the
//! connection simply stays open for the next MESSAGE.

use async_trait::async_trait;

use crate::connection::{Connection, Delivery};
use crate::observability::metrics;
use crate::protocol::cycle::{
    drive, Application, Completion, CycleConfig, CycleError, CycleResult, Flow, Mailbox, Protocol,
};
use crate::protocol::message::{InboundMessage, OutboundMessage};
use crate::protocol::scope::ConnectionScope;

/// Status returned when the application rejects the handshake.
const REJECTED: u16 = 403;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketCycleState {
    Connecting,
    Open,
    Closed,
}

impl WebSocketCycleState {
    fn as_str(&self) -> &'static str {
        match self {
            WebSocketCycleState::Connecting => "connecting",
            WebSocketCycleState::Open => "open",
            WebSocketCycleState::Closed => "closed",
        }
    }
}

/// Drives one WebSocket MESSAGE invocation through the application.
pub struct WebSocketCycle<'c> {
    scope: ConnectionScope,
    connection: &'c mut Connection,
    config: CycleConfig,
    mailbox: Mailbox,
}

impl<'c> WebSocketCycle<'c> {
    pub fn new(scope: ConnectionScope, connection: &'c mut Connection, config: CycleConfig) -> Self {
        Self {
            scope,
            connection,
            config,
            mailbox: Mailbox::new(),
        }
    }

    pub fn enqueue(&self, message: InboundMessage) {
        self.mailbox.enqueue(message);
    }

    /// Run the application, relaying its frames as they are sent.
    pub async fn run(self, app: &dyn Application) -> CycleResult {
        let connection_id = self.connection.id().to_string();
        let mut relayer = Relayer {
            state: WebSocketCycleState::Connecting,
            status: 200,
            connection: self.connection,
        };
        let completion = drive(&mut relayer, app, self.scope, self.mailbox, &self.config).await;

        match completion {
            Completion::Terminal | Completion::Returned | Completion::Idle => {
                tracing::debug!(
                    connection_id = %connection_id,
                    state = relayer.state.as_str(),
                    status = relayer.status,
                    "WebSocket cycle finished"
                );
                CycleResult::status_only(relayer.status)
            }
            Completion::Failed(err) => {
                tracing::error!(connection_id = %connection_id, error = %err, "Exception in 'websocket' protocol");
                metrics::record_cycle_failure("websocket");
                let mut result = CycleResult::status_only(500);
                result.failure = Some(err);
                result
            }
        }
    }
}

struct Relayer<'c> {
    state: WebSocketCycleState,
    status: u16,
    connection: &'c mut Connection,
}

#[async_trait]
impl<'c> Protocol for Relayer<'c> {
    async fn on_send(&mut self, message: OutboundMessage) -> Result<Flow, CycleError> {
        match (self.state, message) {
            (WebSocketCycleState::Connecting, OutboundMessage::WebSocketAccept { .. }) => {
                self.state = WebSocketCycleState::Open;
                Ok(Flow::Continue)
            }
            (
                WebSocketCycleState::Connecting | WebSocketCycleState::Open,
                OutboundMessage::WebSocketSend(payload),
            ) => {
                // The gateway completed the handshake at CONNECT already.
                self.state = WebSocketCycleState::Open;
                match self.connection.relay(payload.as_bytes()).await {
                    Ok(Delivery::Delivered) => Ok(Flow::Continue),
                    Ok(Delivery::PeerGone) => {
                        self.state = WebSocketCycleState::Closed;
                        Ok(Flow::Complete)
                    }
                    Err(err) => Err(CycleError::Relay(err.to_string())),
                }
            }
            (WebSocketCycleState::Connecting, OutboundMessage::WebSocketClose { code }) => {
                tracing::info!(connection_id = %self.connection.id(), code, "Application rejected connection");
                self.state = WebSocketCycleState::Closed;
                self.status = REJECTED;
                Ok(Flow::Complete)
            }
            (WebSocketCycleState::Open, OutboundMessage::WebSocketClose { code }) => {
                tracing::info!(connection_id = %self.connection.id(), code, "Application closed connection");
                self.connection
                    .close()
                    .await
                    .map_err(|err| CycleError::Relay(err.to_string()))?;
                self.state = WebSocketCycleState::Closed;
                Ok(Flow::Complete)
            }
            (state, message) => Err(CycleError::UnexpectedMessage {
                state: state.as_str(),
                message: message.kind(),
            }),
        }
    }

    fn completes_when_idle(&self) -> bool {
        true
    }
}
