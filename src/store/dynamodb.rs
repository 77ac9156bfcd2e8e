//! DynamoDB-backed connection store.
//!
//! # Responsibilities
//! - Speak the DynamoDB JSON 1.0 protocol over HTTPS
//! - Verify the table exists before serving (fail fast)
//! - Conditional `PutItem` so a connection id is never overwritten
//!
//! One item per connection: `{connectionId: S, initial_scope: S}`.

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::aws::sigv4::{self, SignableRequest, SigningParams};
use crate::aws::Credentials;
use crate::config::StoreConfig;
use crate::store::{StoreError, StoreResult};

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "dynamodb";

/// Error kinds that indicate a transient condition rather than a bad setup.
const TRANSIENT_ERRORS: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
];

/// Failure of one DynamoDB API call.
#[derive(Debug, Error)]
enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("{kind} (HTTP {status}): {message}")]
    Service {
        status: u16,
        kind: String,
        message: String,
    },
}

impl ApiError {
    fn is(&self, expected: &str) -> bool {
        matches!(self, ApiError::Service { kind, .. } if kind == expected)
    }

    fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Service { kind, status, .. } => {
                *status >= 500 || TRANSIENT_ERRORS.contains(&kind.as_str())
            }
        }
    }
}

/// Connection store backed by a DynamoDB table.
pub struct DynamoDbStore {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    table_name: String,
    credentials: Credentials,
}

impl DynamoDbStore {
    /// Create a store and check that its table exists.
    ///
    /// # Returns
    /// `StoreError::Configuration` if parameters are missing, the table does
    /// not exist or the credentials are rejected; `BackendUnavailable` if the
    /// service cannot be reached.
    pub async fn connect(config: &StoreConfig, credentials: Credentials) -> StoreResult<Self> {
        let table_name = config
            .table_name
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StoreError::Configuration("a table name is required".to_string()))?;
        let region = config
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| StoreError::Configuration("a region is required".to_string()))?;
        let endpoint = match &config.endpoint {
            Some(endpoint) => Url::parse(endpoint),
            None => Url::parse(&format!("https://dynamodb.{}.amazonaws.com/", region)),
        }
        .map_err(|e| StoreError::Configuration(format!("invalid DynamoDB endpoint: {}", e)))?;

        let store = Self {
            client: reqwest::Client::new(),
            endpoint,
            region,
            table_name,
            credentials,
        };

        match store
            .call("DescribeTable", json!({ "TableName": store.table_name }))
            .await
        {
            Ok(_) => {
                tracing::debug!(
                    table = %store.table_name,
                    region = %store.region,
                    endpoint = %store.endpoint,
                    "DynamoDB connection store ready"
                );
                Ok(store)
            }
            Err(e) if e.is("ResourceNotFoundException") => Err(StoreError::Configuration(format!(
                "table '{}' does not exist",
                store.table_name
            ))),
            Err(e) if e.is_transient() => Err(StoreError::BackendUnavailable(e.to_string())),
            Err(e) => Err(StoreError::Configuration(e.to_string())),
        }
    }

    pub async fn create(&self, id: &str, scope: &str) -> StoreResult<()> {
        let body = json!({
            "TableName": self.table_name,
            "Item": {
                "connectionId": { "S": id },
                "initial_scope": { "S": scope },
            },
            "ConditionExpression": "attribute_not_exists(connectionId)",
        });
        match self.call("PutItem", body).await {
            Ok(_) => Ok(()),
            Err(e) if e.is("ConditionalCheckFailedException") => {
                Err(StoreError::DuplicateConnection(id.to_string()))
            }
            Err(e) => Err(StoreError::BackendUnavailable(e.to_string())),
        }
    }

    pub async fn fetch(&self, id: &str) -> StoreResult<String> {
        let body = json!({
            "TableName": self.table_name,
            "Key": { "connectionId": { "S": id } },
            "ConsistentRead": true,
        });
        let response = self
            .call("GetItem", body)
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        let item = match response.get("Item") {
            Some(item) => item,
            None => return Err(StoreError::ConnectionNotFound(id.to_string())),
        };
        item.pointer("/initial_scope/S")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Corrupt {
                id: id.to_string(),
                reason: "item has no initial_scope string".to_string(),
            })
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let body = json!({
            "TableName": self.table_name,
            "Key": { "connectionId": { "S": id } },
        });
        self.call("DeleteItem", body)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))
    }

    /// Perform one signed API call.
    async fn call(&self, operation: &str, body: Value) -> Result<Value, ApiError> {
        let payload = serde_json::to_vec(&body).map_err(|e| ApiError::Transport(e.to_string()))?;
        let headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            (
                "x-amz-target".to_string(),
                format!("{}.{}", TARGET_PREFIX, operation),
            ),
        ];
        let signed = sigv4::sign(
            &SignableRequest {
                method: "POST",
                url: &self.endpoint,
                headers: &headers,
                payload: &payload,
            },
            &SigningParams {
                credentials: &self.credentials,
                region: &self.region,
                service: SERVICE,
                time: Utc::now(),
            },
        );

        let mut request = self.client.post(self.endpoint.clone()).body(payload);
        for (name, value) in headers.iter().chain(signed.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if (200..300).contains(&status) {
            if text.trim().is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            serde_json::from_str(&text).map_err(|e| ApiError::Transport(e.to_string()))
        } else {
            Err(parse_error(status, &text))
        }
    }
}

/// Decode a DynamoDB error body (`{"__type": "...#Kind", "message": "..."}`).
fn parse_error(status: u16, text: &str) -> ApiError {
    let body: Value = serde_json::from_str(text).unwrap_or(Value::Null);
    let kind = body
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "UnknownError".to_string());
    let message = body
        .get("message")
        .or_else(|| body.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or(text)
        .to_string();
    ApiError::Service {
        status,
        kind,
        message,
    }
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("table_name", &self.table_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_strips_namespace() {
        let err = parse_error(
            400,
            r#"{"__type":"com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException","message":"The conditional request failed"}"#,
        );
        assert!(err.is("ConditionalCheckFailedException"));
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "ConditionalCheckFailedException (HTTP 400): The conditional request failed"
        );
    }

    #[test]
    fn test_parse_error_tolerates_non_json() {
        let err = parse_error(503, "upstream unavailable");
        assert!(err.is("UnknownError"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_throttling_is_transient() {
        let err = parse_error(400, r#"{"__type":"x#ThrottlingException","Message":"slow down"}"#);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connect_requires_table_name() {
        let config = StoreConfig {
            region: Some("us-east-1".into()),
            ..StoreConfig::default()
        };
        let err = DynamoDbStore::connect(&config, Credentials::new("a", "b", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
