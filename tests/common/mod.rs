//! Shared utilities for integration testing.
//!
//! Mock AWS endpoints served by axum on ephemeral local ports:
//! - a DynamoDB JSON 1.0 endpoint backed by an in-memory table map
//! - a gateway management API that records posted frames

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use asgi_bridge::aws::Credentials;
use asgi_bridge::config::{BackendKind, BridgeConfig};
use asgi_bridge::protocol::{
    AppError, ConnectionScope, Inbound, InboundMessage, Outbound, OutboundMessage, Payload,
};

pub const TABLE: &str = "connections";

pub fn test_credentials() -> Credentials {
    Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", None)
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn dynamo_error(kind: &str, message: &str) -> (StatusCode, String) {
    (
        StatusCode::BAD_REQUEST,
        json!({
            "__type": format!("com.amazonaws.dynamodb.v20120810#{}", kind),
            "message": message,
        })
        .to_string(),
    )
}

/// In-memory DynamoDB speaking the subset of the JSON protocol the store uses.
#[derive(Clone, Default)]
pub struct MockDynamo {
    tables: Arc<Mutex<HashMap<String, HashMap<String, Value>>>>,
    unsigned_requests: Arc<Mutex<usize>>,
}

impl MockDynamo {
    pub fn with_table(name: &str) -> Self {
        let mock = Self::default();
        mock.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), HashMap::new());
        mock
    }

    pub async fn start(&self) -> String {
        let router = Router::new()
            .route("/", post(dynamo_handler))
            .with_state(self.clone());
        format!("http://{}/", serve(router).await)
    }

    /// Stored item for `id`, if any.
    pub fn item(&self, table: &str, id: &str) -> Option<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|items| items.get(id).cloned())
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |items| items.len())
    }

    pub fn unsigned_requests(&self) -> usize {
        *self.unsigned_requests.lock().unwrap()
    }

    fn handle(&self, target: &str, request: &Value) -> (StatusCode, String) {
        let operation = target.rsplit('.').next().unwrap_or_default();
        let table_name = request["TableName"].as_str().unwrap_or_default();
        let mut tables = self.tables.lock().unwrap();
        let Some(table) = tables.get_mut(table_name) else {
            return dynamo_error("ResourceNotFoundException", "Requested resource not found");
        };

        match operation {
            "DescribeTable" => (
                StatusCode::OK,
                json!({ "Table": { "TableName": table_name, "TableStatus": "ACTIVE" } }).to_string(),
            ),
            "PutItem" => {
                let item = request["Item"].clone();
                let id = item["connectionId"]["S"].as_str().unwrap_or_default().to_string();
                if request["ConditionExpression"] == "attribute_not_exists(connectionId)"
                    && table.contains_key(&id)
                {
                    return dynamo_error(
                        "ConditionalCheckFailedException",
                        "The conditional request failed",
                    );
                }
                table.insert(id, item);
                (StatusCode::OK, "{}".to_string())
            }
            "GetItem" => {
                let id = request["Key"]["connectionId"]["S"].as_str().unwrap_or_default();
                match table.get(id) {
                    Some(item) => (StatusCode::OK, json!({ "Item": item }).to_string()),
                    None => (StatusCode::OK, "{}".to_string()),
                }
            }
            "DeleteItem" => {
                let id = request["Key"]["connectionId"]["S"].as_str().unwrap_or_default();
                table.remove(id);
                (StatusCode::OK, "{}".to_string())
            }
            other => dynamo_error("UnknownOperationException", other),
        }
    }
}

async fn dynamo_handler(
    State(mock): State<MockDynamo>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    if !headers.contains_key("authorization") {
        *mock.unsigned_requests.lock().unwrap() += 1;
    }
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    mock.handle(&target, &request)
}

/// Gateway management API that records frames and hang-ups.
#[derive(Clone, Default)]
pub struct MockManagementApi {
    posts: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    gone: Arc<Mutex<HashSet<String>>>,
}

impl MockManagementApi {
    /// Answer 410 for every call about `id`.
    pub fn mark_gone(&self, id: &str) {
        self.gone.lock().unwrap().insert(id.to_string());
    }

    /// Start serving; returns the stage endpoint.
    pub async fn start(&self) -> String {
        let router = Router::new()
            .route(
                "/{stage}/@connections/{id}",
                post(post_handler).delete(delete_handler),
            )
            .with_state(self.clone());
        format!("http://{}/prod", serve(router).await)
    }

    pub fn posts(&self) -> Vec<(String, Vec<u8>)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn is_gone(&self, id: &str) -> bool {
        self.gone.lock().unwrap().contains(id)
    }
}

async fn post_handler(
    State(mock): State<MockManagementApi>,
    Path((_stage, id)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    mock.posts.lock().unwrap().push((id.clone(), body.to_vec()));
    if mock.is_gone(&id) {
        StatusCode::GONE
    } else {
        StatusCode::OK
    }
}

async fn delete_handler(
    State(mock): State<MockManagementApi>,
    Path((_stage, id)): Path<(String, String)>,
) -> StatusCode {
    mock.deletes.lock().unwrap().push(id.clone());
    if mock.is_gone(&id) {
        StatusCode::GONE
    } else {
        StatusCode::NO_CONTENT
    }
}

/// Bridge configuration pointing at the mocks.
pub fn mock_config(dynamo_endpoint: &str, table: &str, management_endpoint: &str) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.store.backend = BackendKind::Dynamodb;
    config.store.region = Some("us-east-1".to_string());
    config.store.table_name = Some(table.to_string());
    config.store.endpoint = Some(dynamo_endpoint.to_string());
    config.websocket.management_endpoint = Some(management_endpoint.to_string());
    config
}

/// Replies `pong` to every `ping`, hangs up on `bye`, echoes everything else.
///
/// Ignores lifespan messages.
pub async fn ping_pong(
    _scope: ConnectionScope,
    inbound: Inbound,
    outbound: Outbound,
) -> Result<(), AppError> {
    while let Some(message) = inbound.receive().await {
        match message {
            InboundMessage::WebSocketConnect => {
                outbound
                    .send(OutboundMessage::WebSocketAccept { subprotocol: None })
                    .await?
            }
            InboundMessage::WebSocketReceive(Payload::Text(text)) if text == "ping" => {
                outbound
                    .send(OutboundMessage::WebSocketSend(Payload::Text("pong".into())))
                    .await?
            }
            InboundMessage::WebSocketReceive(Payload::Text(text)) if text == "bye" => {
                outbound
                    .send(OutboundMessage::WebSocketClose { code: 1000 })
                    .await?
            }
            InboundMessage::WebSocketReceive(other) => {
                outbound.send(OutboundMessage::WebSocketSend(other)).await?
            }
            InboundMessage::WebSocketDisconnect { .. } => break,
            _ => {}
        }
    }
    Ok(())
}

pub fn websocket_event(event_type: &str, connection_id: &str, body: Option<&str>) -> Value {
    let mut event = json!({
        "headers": { "Host": "ws.example.com", "X-Forwarded-Proto": "wss" },
        "requestContext": {
            "eventType": event_type,
            "connectionId": connection_id,
            "domainName": "ws.example.com",
            "stage": "prod",
            "identity": { "sourceIp": "198.51.100.7" }
        },
        "isBase64Encoded": false
    });
    if let Some(body) = body {
        event["body"] = Value::String(body.to_string());
    }
    event
}
