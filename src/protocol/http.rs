//! Single-shot HTTP cycle.
//!
//! # State Transitions
//! ```text
//! Request ──http.response.start──▶ Response ──http.response.body(more_body=false)──▶ Complete
//!                                   └──http.response.body(more_body=true)──┘
//! ```
//!
//! Anything else is a protocol violation and turns into a generic 500.

use async_trait::async_trait;

use crate::observability::metrics;
use crate::protocol::cycle::{
    drive, Application, BodyEncoding, Completion, CycleConfig, CycleError, CycleResult, Flow,
    Mailbox, Protocol,
};
use crate::protocol::message::{InboundMessage, OutboundMessage};
use crate::protocol::scope::{ConnectionScope, Headers};

/// Content encodings whose bodies are always binary.
const COMPRESSED_ENCODINGS: &[&str] = &["gzip", "deflate", "br"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCycleState {
    Request,
    Response,
    Complete,
}

impl HttpCycleState {
    fn as_str(&self) -> &'static str {
        match self {
            HttpCycleState::Request => "request",
            HttpCycleState::Response => "response",
            HttpCycleState::Complete => "complete",
        }
    }
}

/// Drives one HTTP request through the application.
pub struct HttpCycle {
    scope: ConnectionScope,
    config: CycleConfig,
    mailbox: Mailbox,
}

impl HttpCycle {
    pub fn new(scope: ConnectionScope, config: CycleConfig) -> Self {
        Self {
            scope,
            config,
            mailbox: Mailbox::new(),
        }
    }

    /// Queue a message for the application's `receive`.
    pub fn enqueue(&self, message: InboundMessage) {
        self.mailbox.enqueue(message);
    }

    /// Run the application and collect its response.
    pub async fn run(self, app: &dyn Application) -> CycleResult {
        let mut collector = ResponseCollector::new();
        let completion = drive(&mut collector, app, self.scope, self.mailbox, &self.config).await;

        let failure = match completion {
            Completion::Terminal => None,
            Completion::Returned | Completion::Idle => match collector.state {
                HttpCycleState::Request => Some(CycleError::NoResponse),
                HttpCycleState::Response => {
                    tracing::warn!("Application returned before the final response body chunk");
                    None
                }
                HttpCycleState::Complete => None,
            },
            Completion::Failed(err) => Some(err),
        };

        match failure {
            None => collector.finish(&self.config.text_mime_types),
            Some(err) => {
                tracing::error!(error = %err, "Exception in 'http' protocol");
                metrics::record_cycle_failure("http");
                CycleResult::internal_error(err)
            }
        }
    }
}

struct ResponseCollector {
    state: HttpCycleState,
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseCollector {
    fn new() -> Self {
        Self {
            state: HttpCycleState::Request,
            status: 500,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn finish(self, text_mime_types: &[String]) -> CycleResult {
        let encoding = classify_body(&self.headers, &self.body, text_mime_types);
        CycleResult {
            status: self.status,
            headers: self.headers,
            body: self.body,
            encoding,
            failure: None,
        }
    }
}

#[async_trait]
impl Protocol for ResponseCollector {
    async fn on_send(&mut self, message: OutboundMessage) -> Result<Flow, CycleError> {
        match (self.state, message) {
            (HttpCycleState::Request, OutboundMessage::HttpResponseStart { status, headers }) => {
                self.status = status;
                self.headers = headers;
                self.state = HttpCycleState::Response;
                Ok(Flow::Continue)
            }
            (HttpCycleState::Response, OutboundMessage::HttpResponseBody { body, more_body }) => {
                self.body.extend_from_slice(&body);
                if more_body {
                    Ok(Flow::Continue)
                } else {
                    self.state = HttpCycleState::Complete;
                    Ok(Flow::Complete)
                }
            }
            (state, message) => Err(CycleError::UnexpectedMessage {
                state: state.as_str(),
                message: message.kind(),
            }),
        }
    }
}

/// Decide whether a response body travels as text or base64.
pub fn classify_body(headers: &Headers, body: &[u8], text_mime_types: &[String]) -> BodyEncoding {
    if body.is_empty() {
        return BodyEncoding::Text;
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim().to_ascii_lowercase())
    };

    if let Some(encoding) = header("content-encoding") {
        if COMPRESSED_ENCODINGS.contains(&encoding.as_str()) {
            return BodyEncoding::Base64;
        }
    }

    let mime = header("content-type")
        .and_then(|value| value.split(';').next().map(|m| m.trim().to_string()))
        .unwrap_or_default();

    if mime.starts_with("text/") || text_mime_types.iter().any(|t| t.eq_ignore_ascii_case(&mime)) {
        if std::str::from_utf8(body).is_ok() {
            return BodyEncoding::Text;
        }
    }
    BodyEncoding::Base64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cycle::{AppError, Inbound, Outbound};

    fn start(status: u16, content_type: &str) -> OutboundMessage {
        OutboundMessage::HttpResponseStart {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
        }
    }

    fn body(bytes: &[u8], more_body: bool) -> OutboundMessage {
        OutboundMessage::HttpResponseBody {
            body: bytes.to_vec(),
            more_body,
        }
    }

    fn request_cycle() -> HttpCycle {
        let cycle = HttpCycle::new(ConnectionScope::http("GET", "/x"), CycleConfig::default());
        cycle.enqueue(InboundMessage::HttpRequest {
            body: b"hello".to_vec(),
            more_body: false,
        });
        cycle
    }

    #[tokio::test]
    async fn test_plain_text_response() {
        let app = |scope: ConnectionScope, _inbound: Inbound, outbound: Outbound| async move {
            assert_eq!(scope.path, "/x");
            outbound.send(start(200, "text/plain")).await?;
            outbound.send(body(b"ok", false)).await?;
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 200);
        assert_eq!(
            result.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
        assert_eq!(result.body, b"ok");
        assert_eq!(result.encoding, BodyEncoding::Text);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_application_reads_request_body() {
        let app = |_scope: ConnectionScope, inbound: Inbound, outbound: Outbound| async move {
            let echoed = match inbound.receive().await {
                Some(InboundMessage::HttpRequest { body, .. }) => body,
                other => panic!("unexpected message {other:?}"),
            };
            outbound.send(start(201, "text/plain")).await?;
            outbound.send(body(&echoed, false)).await?;
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 201);
        assert_eq!(result.body, b"hello");
    }

    #[tokio::test]
    async fn test_chunks_concatenate_in_order() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, outbound: Outbound| async move {
            outbound.send(start(200, "text/plain")).await?;
            outbound.send(body(b"a", true)).await?;
            outbound.send(body(b"", true)).await?;
            outbound.send(body(b"bc", true)).await?;
            outbound.send(body(b"d", false)).await?;
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.body, b"abcd");
    }

    #[tokio::test]
    async fn test_missing_response_start_is_server_error() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, _outbound: Outbound| async move {
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 500);
        assert_eq!(result.failure, Some(CycleError::NoResponse));
    }

    #[tokio::test]
    async fn test_body_before_start_is_protocol_violation() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, outbound: Outbound| async move {
            outbound.send(body(b"early", false)).await?;
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 500);
        assert_eq!(result.body, b"Internal Server Error");
        assert!(matches!(
            result.failure,
            Some(CycleError::UnexpectedMessage { state: "request", message: "http.response.body" })
        ));
    }

    #[tokio::test]
    async fn test_application_error_after_start_overrides_status() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, outbound: Outbound| async move {
            outbound.send(start(200, "application/json")).await?;
            outbound.send(body(b"{\"partial\":", true)).await?;
            Err::<(), AppError>("database went away".into())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 500);
        assert_eq!(result.body, b"Internal Server Error");
        assert_eq!(
            result.failure,
            Some(CycleError::Application("database went away".to_string()))
        );
    }

    #[tokio::test]
    async fn test_application_panic_is_contained() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, _outbound: Outbound| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.status, 500);
        assert_eq!(
            result.failure,
            Some(CycleError::Panicked("handler exploded".to_string()))
        );
    }

    #[tokio::test]
    async fn test_binary_body_is_base64_encoded() {
        let app = |_scope: ConnectionScope, _inbound: Inbound, outbound: Outbound| async move {
            outbound.send(start(200, "image/png")).await?;
            outbound.send(body(&[0x89, 0x50, 0x4e, 0x47], false)).await?;
            Ok::<(), AppError>(())
        };

        let result = request_cycle().run(&app).await;
        assert_eq!(result.encoding, BodyEncoding::Base64);
    }

    #[test]
    fn test_classify_body_rules() {
        let types = CycleConfig::default().text_mime_types;
        let headers = |pairs: &[(&str, &str)]| -> Headers {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        assert_eq!(classify_body(&headers(&[]), b"", &types), BodyEncoding::Text);
        assert_eq!(
            classify_body(&headers(&[("content-type", "text/html; charset=utf-8")]), b"<p>", &types),
            BodyEncoding::Text
        );
        assert_eq!(
            classify_body(&headers(&[("content-type", "application/json")]), b"{}", &types),
            BodyEncoding::Text
        );
        assert_eq!(
            classify_body(
                &headers(&[("content-type", "application/json"), ("content-encoding", "gzip")]),
                b"\x1f\x8b",
                &types
            ),
            BodyEncoding::Base64
        );
        assert_eq!(
            classify_body(&headers(&[("content-type", "application/octet-stream")]), b"x", &types),
            BodyEncoding::Base64
        );
    }
}
