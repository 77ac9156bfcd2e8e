//! Lifespan protocol.
//!
//! The application is started once per container with a `lifespan` scope
//! and kept running in the background; startup and shutdown are requested
//! through its inbound queue. An application that returns without
//! answering, or goes back to waiting for input without replying, does not
//! support lifespan, which is not an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::protocol::cycle::{panic_message, Application, CycleError, Mailbox};
use crate::protocol::message::{InboundMessage, OutboundMessage};
use crate::protocol::scope::ConnectionScope;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifespanError {
    #[error("lifespan startup failed: {0}")]
    StartupFailed(String),

    #[error("lifespan shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("unexpected '{0}' message during lifespan")]
    Unexpected(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Shutdown,
}

/// Background lifespan task of one application instance.
pub struct Lifespan {
    mailbox: Mailbox,
    task: Option<JoinHandle<Result<(), String>>>,
}

impl Lifespan {
    /// Start the application with a lifespan scope.
    pub fn spawn(app: Arc<dyn Application>) -> Self {
        let mailbox = Mailbox::new();
        let inbound = mailbox.inbound();
        let outbound = mailbox.outbound();
        let task = tokio::spawn(async move {
            let call = app.call(ConnectionScope::lifespan(), inbound, outbound);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(panic) => Err(panic_message(panic)),
            }
        });
        Self {
            mailbox,
            task: Some(task),
        }
    }

    /// Whether the application is still taking part in the protocol.
    pub fn is_supported(&self) -> bool {
        self.task.is_some()
    }

    pub async fn startup(&mut self) -> Result<(), LifespanError> {
        self.exchange(Phase::Startup).await
    }

    pub async fn shutdown(&mut self) -> Result<(), LifespanError> {
        let result = self.exchange(Phase::Shutdown).await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        result
    }

    async fn exchange(&mut self, phase: Phase) -> Result<(), LifespanError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        self.mailbox.enqueue(match phase {
            Phase::Startup => InboundMessage::LifespanStartup,
            Phase::Shutdown => InboundMessage::LifespanShutdown,
        });

        let idle = self.mailbox.idle();
        loop {
            tokio::select! {
                Some(envelope) = self.mailbox.outbound_rx.recv() => {
                    let kind = envelope.message.kind();
                    let outcome = match (phase, envelope.message) {
                        (Phase::Startup, OutboundMessage::LifespanStartupComplete)
                        | (Phase::Shutdown, OutboundMessage::LifespanShutdownComplete) => Ok(()),
                        (Phase::Startup, OutboundMessage::LifespanStartupFailed { message }) => {
                            Err(LifespanError::StartupFailed(message))
                        }
                        (Phase::Shutdown, OutboundMessage::LifespanShutdownFailed { message }) => {
                            Err(LifespanError::ShutdownFailed(message))
                        }
                        _ => Err(LifespanError::Unexpected(kind)),
                    };
                    let ack = match &outcome {
                        Err(LifespanError::Unexpected(_)) => Err(CycleError::UnexpectedMessage {
                            state: "lifespan",
                            message: kind,
                        }),
                        _ => Ok(()),
                    };
                    let _ = envelope.ack.send(ack);
                    match &outcome {
                        Ok(()) => tracing::info!(phase = ?phase, "Lifespan phase complete"),
                        Err(err) => tracing::error!(phase = ?phase, error = %err, "Lifespan phase failed"),
                    }
                    return outcome;
                }
                finished = &mut *task => {
                    self.task = None;
                    match finished {
                        Ok(Ok(())) => tracing::info!("ASGI 'lifespan' protocol appears unsupported"),
                        Ok(Err(err)) => tracing::info!(error = %err, "ASGI 'lifespan' protocol appears unsupported"),
                        Err(err) => tracing::warn!(error = %err, "Lifespan task ended abnormally"),
                    }
                    return Ok(());
                }
                _ = idle.notified() => {
                    if !self.mailbox.is_idle() {
                        continue;
                    }
                    tracing::info!(phase = ?phase, "Application ignored lifespan message; lifespan unsupported");
                    if let Some(task) = self.task.take() {
                        task.abort();
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for Lifespan {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
