//! Invocation response serialization.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::protocol::cycle::{BodyEncoding, CycleResult};

/// Header layout expected by the gateway that sent the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// REST API: `multiValueHeaders`.
    Rest,
    /// HTTP API: comma-joined `headers` plus a `cookies` list.
    HttpApi,
}

/// The JSON document returned to the function runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_base64_encoded: Option<bool>,
}

impl InvocationResponse {
    /// A bare status, as WebSocket routes return.
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    /// Serialize the result of an HTTP cycle.
    pub fn from_http(result: &CycleResult, format: ResponseFormat) -> Self {
        let mut response = Self::status(result.status);

        match format {
            ResponseFormat::Rest => {
                for (name, value) in &result.headers {
                    response
                        .multi_value_headers
                        .entry(name.to_ascii_lowercase())
                        .or_default()
                        .push(value.clone());
                }
            }
            ResponseFormat::HttpApi => {
                for (name, value) in &result.headers {
                    let name = name.to_ascii_lowercase();
                    if name == "set-cookie" {
                        response.cookies.push(value.clone());
                        continue;
                    }
                    response
                        .headers
                        .entry(name)
                        .and_modify(|joined| {
                            joined.push_str(", ");
                            joined.push_str(value);
                        })
                        .or_insert_with(|| value.clone());
                }
            }
        }

        let (body, encoded) = match result.encoding {
            BodyEncoding::Text => (String::from_utf8_lossy(&result.body).into_owned(), false),
            BodyEncoding::Base64 => (
                base64::engine::general_purpose::STANDARD.encode(&result.body),
                true,
            ),
        };
        response.body = Some(body);
        response.is_base64_encoded = Some(encoded);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(headers: &[(&str, &str)], body: &[u8], encoding: BodyEncoding) -> CycleResult {
        CycleResult {
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_vec(),
            encoding,
            failure: None,
        }
    }

    #[test]
    fn test_rest_keeps_every_header_value() {
        let result = result(
            &[
                ("content-type", "text/plain"),
                ("set-cookie", "a=1"),
                ("Set-Cookie", "b=2"),
            ],
            b"ok",
            BodyEncoding::Text,
        );
        let response = InvocationResponse::from_http(&result, ResponseFormat::Rest);

        assert_eq!(response.multi_value_headers["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(response.body.as_deref(), Some("ok"));
        assert_eq!(response.is_base64_encoded, Some(false));
    }

    #[test]
    fn test_http_api_splits_cookies_and_joins_headers() {
        let result = result(
            &[
                ("vary", "accept"),
                ("vary", "origin"),
                ("set-cookie", "a=1"),
            ],
            b"",
            BodyEncoding::Text,
        );
        let response = InvocationResponse::from_http(&result, ResponseFormat::HttpApi);

        assert_eq!(response.headers["vary"], "accept, origin");
        assert_eq!(response.cookies, vec!["a=1"]);
        assert!(response.multi_value_headers.is_empty());
    }

    #[test]
    fn test_binary_body_is_base64() {
        let result = result(&[("content-type", "image/png")], &[0xff, 0x00], BodyEncoding::Base64);
        let response = InvocationResponse::from_http(&result, ResponseFormat::Rest);

        assert_eq!(response.body.as_deref(), Some("/wA="));
        assert_eq!(response.is_base64_encoded, Some(true));
    }

    #[test]
    fn test_status_only_serializes_minimally() {
        let json = serde_json::to_value(InvocationResponse::status(200)).unwrap();
        assert_eq!(json, serde_json::json!({ "statusCode": 200 }));
    }
}
