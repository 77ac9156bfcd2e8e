//! Cycle plumbing shared by the HTTP, WebSocket and lifespan drivers.
//!
//! # Data Flow
//! ```text
//! bridge ── enqueue ──▶ inbound queue ── receive ──▶ application
//! application ── send ──▶ outbound channel ──▶ protocol state machine
//!                         ◀── ack (Ok / CycleError) ──┘
//! ```
//!
//! Every `send` waits for the protocol to process the message, so the
//! application observes relay failures at the call site and nothing is
//! emitted after the cycle has decided to stop.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use crate::config::schema::{BridgeConfig, DEFAULT_TEXT_MIME_TYPES};
use crate::protocol::message::{InboundMessage, OutboundMessage};
use crate::protocol::scope::{ConnectionScope, Headers};

/// Error type returned by application code.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// An application speaking the inbound/outbound message protocol.
#[async_trait]
pub trait Application: Send + Sync {
    async fn call(
        &self,
        scope: ConnectionScope,
        inbound: Inbound,
        outbound: Outbound,
    ) -> Result<(), AppError>;
}

#[async_trait]
impl<F, Fut> Application for F
where
    F: Fn(ConnectionScope, Inbound, Outbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    async fn call(
        &self,
        scope: ConnectionScope,
        inbound: Inbound,
        outbound: Outbound,
    ) -> Result<(), AppError> {
        (self)(scope, inbound, outbound).await
    }
}

/// Errors raised while driving a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    /// The application sent a message the current protocol state does not accept.
    #[error("unexpected '{message}' message in {state} state")]
    UnexpectedMessage {
        state: &'static str,
        message: &'static str,
    },

    /// The application finished without starting a response.
    #[error("application completed without sending a response")]
    NoResponse,

    /// The application returned an error.
    #[error("application error: {0}")]
    Application(String),

    /// The application panicked.
    #[error("application panicked: {0}")]
    Panicked(String),

    /// Relaying an outbound message to the client failed.
    #[error("relay failed: {0}")]
    Relay(String),

    /// The cycle already finished.
    #[error("cycle closed")]
    Closed,
}

/// How a response body is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Text,
    Base64,
}

/// Per-cycle settings.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// MIME types whose bodies are returned as text (all `text/*` are implied).
    pub text_mime_types: Vec<String>,
    /// Log every message crossing the application boundary at debug level.
    pub trace_messages: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            text_mime_types: DEFAULT_TEXT_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            trace_messages: false,
        }
    }
}

impl From<&BridgeConfig> for CycleConfig {
    fn from(config: &BridgeConfig) -> Self {
        let mut text_mime_types = config.http.text_mime_types.clone();
        for default in DEFAULT_TEXT_MIME_TYPES {
            if !text_mime_types.iter().any(|m| m == default) {
                text_mime_types.push(default.to_string());
            }
        }
        Self {
            text_mime_types,
            trace_messages: matches!(
                config.observability.log_level.as_str(),
                "debug" | "trace"
            ),
        }
    }
}

/// Materialized outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub encoding: BodyEncoding,
    /// Set when the cycle ended abnormally; the status is then a generic error.
    pub failure: Option<CycleError>,
}

impl CycleResult {
    /// A result carrying only a status code (WebSocket invocations).
    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            encoding: BodyEncoding::Text,
            failure: None,
        }
    }

    /// The generic server error returned in place of an internal failure.
    pub fn internal_error(failure: CycleError) -> Self {
        Self {
            status: 500,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: b"Internal Server Error".to_vec(),
            encoding: BodyEncoding::Text,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && (200..300).contains(&self.status)
    }
}

/// Receive side handed to the application.
#[derive(Clone)]
pub struct Inbound {
    queue: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    idle: Arc<Notify>,
    waiting: Arc<AtomicBool>,
    delivered: Arc<AtomicUsize>,
}

impl Inbound {
    /// Next inbound message, in enqueue order.
    ///
    /// Waits when the queue is exhausted; the cycle is told the application
    /// went idle. Returns `None` once the cycle is gone.
    pub async fn receive(&self) -> Option<InboundMessage> {
        let mut queue = self.queue.lock().await;
        let next = match queue.try_recv() {
            Ok(message) => Some(message),
            Err(mpsc::error::TryRecvError::Empty) => {
                self.waiting.store(true, Ordering::SeqCst);
                self.idle.notify_one();
                let next = queue.recv().await;
                self.waiting.store(false, Ordering::SeqCst);
                next
            }
            Err(mpsc::error::TryRecvError::Disconnected) => None,
        };
        if next.is_some() {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
        next
    }
}

/// Send side handed to the application.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Outbound {
    /// Hand one message to the cycle and wait until it has been processed.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), CycleError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Envelope { message, ack })
            .map_err(|_| CycleError::Closed)?;
        done.await.map_err(|_| CycleError::Closed)?
    }
}

pub(crate) struct Envelope {
    pub(crate) message: OutboundMessage,
    pub(crate) ack: oneshot::Sender<Result<(), CycleError>>,
}

/// Both queues of one cycle.
pub(crate) struct Mailbox {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    pub(crate) outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    idle: Arc<Notify>,
    waiting: Arc<AtomicBool>,
    delivered: Arc<AtomicUsize>,
    enqueued: AtomicUsize,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx,
            idle: Arc::new(Notify::new()),
            waiting: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicUsize::new(0)),
            enqueued: AtomicUsize::new(0),
        }
    }

    pub(crate) fn enqueue(&self, message: InboundMessage) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the mailbox.
        let _ = self.inbound_tx.send(message);
    }

    pub(crate) fn inbound(&self) -> Inbound {
        Inbound {
            queue: self.inbound_rx.clone(),
            idle: self.idle.clone(),
            waiting: self.waiting.clone(),
            delivered: self.delivered.clone(),
        }
    }

    /// Signalled whenever the application finds the inbound queue empty.
    pub(crate) fn idle(&self) -> Arc<Notify> {
        self.idle.clone()
    }

    /// The application took every enqueued message and is waiting for more.
    ///
    /// A notification from [`Mailbox::idle`] can predate the latest enqueue;
    /// this is the check that it still holds.
    pub(crate) fn is_idle(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
            && self.delivered.load(Ordering::SeqCst) == self.enqueued.load(Ordering::SeqCst)
    }

    pub(crate) fn outbound(&self) -> Outbound {
        Outbound {
            tx: self.outbound_tx.clone(),
        }
    }
}

/// Whether the cycle keeps going after a message.
pub(crate) enum Flow {
    Continue,
    Complete,
}

/// Protocol state machine fed by the driver.
#[async_trait]
pub(crate) trait Protocol: Send {
    async fn on_send(&mut self, message: OutboundMessage) -> Result<Flow, CycleError>;

    /// Treat an application waiting on an exhausted queue as completion.
    fn completes_when_idle(&self) -> bool {
        false
    }
}

/// Why the driver stopped.
pub(crate) enum Completion {
    /// The protocol observed its terminal message.
    Terminal,
    /// The application returned normally.
    Returned,
    /// The application is waiting for input that will not come.
    Idle,
    Failed(CycleError),
}

/// Run `app` until it finishes, the protocol completes, or something fails.
pub(crate) async fn drive<P: Protocol>(
    protocol: &mut P,
    app: &dyn Application,
    scope: ConnectionScope,
    mut mailbox: Mailbox,
    config: &CycleConfig,
) -> Completion {
    let stop_on_idle = protocol.completes_when_idle();
    let idle = mailbox.idle.clone();
    let app_future =
        AssertUnwindSafe(app.call(scope, mailbox.inbound(), mailbox.outbound())).catch_unwind();
    tokio::pin!(app_future);

    loop {
        tokio::select! {
            biased;
            Some(envelope) = mailbox.outbound_rx.recv() => {
                if config.trace_messages {
                    tracing::debug!(message = envelope.message.kind(), "Application sent message");
                }
                match protocol.on_send(envelope.message).await {
                    Ok(Flow::Continue) => {
                        let _ = envelope.ack.send(Ok(()));
                    }
                    Ok(Flow::Complete) => {
                        let _ = envelope.ack.send(Ok(()));
                        return Completion::Terminal;
                    }
                    Err(err) => {
                        let _ = envelope.ack.send(Err(err.clone()));
                        return Completion::Failed(err);
                    }
                }
            }
            outcome = &mut app_future => {
                return match outcome {
                    Ok(Ok(())) => Completion::Returned,
                    Ok(Err(err)) => Completion::Failed(CycleError::Application(err.to_string())),
                    Err(panic) => Completion::Failed(CycleError::Panicked(panic_message(panic))),
                };
            }
            _ = idle.notified(), if stop_on_idle => {
                return Completion::Idle;
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_preserves_enqueue_order() {
        let mailbox = Mailbox::new();
        mailbox.enqueue(InboundMessage::WebSocketConnect);
        mailbox.enqueue(InboundMessage::HttpDisconnect);

        let inbound = mailbox.inbound();
        assert_eq!(inbound.receive().await, Some(InboundMessage::WebSocketConnect));
        assert_eq!(inbound.receive().await, Some(InboundMessage::HttpDisconnect));
    }

    #[tokio::test]
    async fn test_idle_only_after_queue_drained() {
        let mailbox = Mailbox::new();
        mailbox.enqueue(InboundMessage::LifespanStartup);
        assert!(!mailbox.is_idle());

        let inbound = mailbox.inbound();
        let app = tokio::spawn(async move {
            assert_eq!(inbound.receive().await, Some(InboundMessage::LifespanStartup));
            inbound.receive().await
        });
        mailbox.idle().notified().await;
        assert!(mailbox.is_idle());

        mailbox.enqueue(InboundMessage::LifespanShutdown);
        assert!(!mailbox.is_idle());
        assert_eq!(app.await.unwrap(), Some(InboundMessage::LifespanShutdown));
    }

    #[tokio::test]
    async fn test_send_after_cycle_dropped_is_closed() {
        let mailbox = Mailbox::new();
        let outbound = mailbox.outbound();
        drop(mailbox);
        let err = outbound
            .send(OutboundMessage::WebSocketAccept { subprotocol: None })
            .await
            .unwrap_err();
        assert_eq!(err, CycleError::Closed);
    }

    #[test]
    fn test_cycle_config_merges_default_text_types() {
        let mut config = BridgeConfig::default();
        config.http.text_mime_types = vec!["application/yaml".to_string()];
        let cycle = CycleConfig::from(&config);
        assert_eq!(cycle.text_mime_types[0], "application/yaml");
        assert!(cycle.text_mime_types.iter().any(|m| m == "application/json"));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let result = CycleResult::internal_error(CycleError::Application("db password wrong".into()));
        assert_eq!(result.status, 500);
        assert_eq!(result.body, b"Internal Server Error");
        assert!(!result.is_success());
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
