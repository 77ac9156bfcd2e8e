//! Local invocation harness.
//!
//! Feeds one invocation event through the bridge with a built-in echo
//! application and prints the invocation response, so event handling can be
//! exercised without deploying a function.
//!
//! ```text
//! asgi-bridge invoke --event event.json [--context context.json] [--config bridge.toml]
//! cat event.json | asgi-bridge invoke --event -
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use asgi_bridge::config::{load_config, local_from_env};
use asgi_bridge::observability::logging;
use asgi_bridge::protocol::{
    AppError, Application, ConnectionScope, Inbound, InboundMessage, Outbound, OutboundMessage,
    ScopeKind,
};
use asgi_bridge::Bridge;

#[derive(Parser)]
#[command(name = "asgi-bridge")]
#[command(about = "Run invocation events through the ASGI bridge locally", long_about = None)]
struct Cli {
    /// Bridge configuration file (TOML). Without one, environment variables
    /// apply over a file connection store in the temp directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one event with the echo application
    Invoke {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long)]
        event: String,

        /// Invocation context JSON file
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => local_from_env()?,
    };
    logging::init(&config.observability);

    match cli.command {
        Commands::Invoke { event, context } => {
            let event = read_event(&event)?;
            let context = match context {
                Some(path) => read_json(&path)?,
                None => json!({}),
            };

            let bridge = Bridge::new(Arc::new(EchoApp), config);
            tracing::info!(backend = %bridge.config().store.backend, "Invoking echo application");
            let response = bridge.handle(&event, &context).await?;
            bridge.shutdown().await?;

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

fn read_event(source: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(serde_json::from_str(&text)?)
    } else {
        read_json(Path::new(source))
    }
}

fn read_json(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Echoes HTTP requests as JSON and WebSocket frames verbatim.
struct EchoApp;

#[async_trait]
impl Application for EchoApp {
    async fn call(
        &self,
        scope: ConnectionScope,
        inbound: Inbound,
        outbound: Outbound,
    ) -> Result<(), AppError> {
        match scope.kind {
            ScopeKind::Http => echo_http(scope, inbound, outbound).await,
            ScopeKind::WebSocket => echo_websocket(inbound, outbound).await,
            ScopeKind::Lifespan => {
                while let Some(message) = inbound.receive().await {
                    match message {
                        InboundMessage::LifespanStartup => {
                            outbound.send(OutboundMessage::LifespanStartupComplete).await?
                        }
                        InboundMessage::LifespanShutdown => {
                            outbound.send(OutboundMessage::LifespanShutdownComplete).await?;
                            break;
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

async fn echo_http(scope: ConnectionScope, inbound: Inbound, outbound: Outbound) -> Result<(), AppError> {
    let mut body = Vec::new();
    while let Some(InboundMessage::HttpRequest { body: chunk, more_body }) = inbound.receive().await {
        body.extend_from_slice(&chunk);
        if !more_body {
            break;
        }
    }

    let echoed = json!({
        "method": scope.method,
        "path": scope.path,
        "query_string": scope.query_string,
        "headers": scope.headers,
        "body": String::from_utf8_lossy(&body),
    });
    outbound
        .send(OutboundMessage::HttpResponseStart {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        })
        .await?;
    outbound
        .send(OutboundMessage::HttpResponseBody {
            body: serde_json::to_vec(&echoed)?,
            more_body: false,
        })
        .await?;
    Ok(())
}

async fn echo_websocket(inbound: Inbound, outbound: Outbound) -> Result<(), AppError> {
    while let Some(message) = inbound.receive().await {
        match message {
            InboundMessage::WebSocketConnect => {
                outbound
                    .send(OutboundMessage::WebSocketAccept { subprotocol: None })
                    .await?
            }
            InboundMessage::WebSocketReceive(payload) => {
                outbound.send(OutboundMessage::WebSocketSend(payload)).await?
            }
            InboundMessage::WebSocketDisconnect { .. } => break,
            _ => {}
        }
    }
    Ok(())
}
