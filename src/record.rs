use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};

/// Headers owned by the transport layer. They are re-derived by the host
/// on replay and must never be duplicated from the cache.
const TRANSPORT_HEADERS: [&str; 3] = ["content-type", "content-length", "transfer-encoding"];

/// Closed set of result shapes a handler can produce. Exclusion from
/// caching is decided by membership in
/// [`EngineOptions::excluded_result_kinds`](crate::config::EngineOptions),
/// never by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// A structured value: primitives, ordered lists, keyed maps.
    Structured,
    /// A streamed file payload; opaque to the codec.
    FileStream,
    /// A raw byte stream; opaque to the codec.
    ByteStream,
}

/// The outcome of a handler execution as seen by the engine.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
    pub shape: ResultShape,
}

impl HandlerResult {
    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            shape: ResultShape::Structured,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_shape(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }
}

/// A captured response: status, non-transport headers and a structured
/// body value. This is what a HIT replays, byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: serde_json::Value,
}

impl CachedResponse {
    /// Captures a handler result, dropping transport-managed headers.
    pub fn capture(result: &HandlerResult) -> Self {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in result.headers.iter() {
            let name = name.as_str();
            if TRANSPORT_HEADERS.contains(&name) {
                continue;
            }
            match value.to_str() {
                Ok(value) => headers
                    .entry(name.to_string())
                    .or_default()
                    .push(value.to_string()),
                Err(_) => {
                    warn!("header '{name}' has a non-textual value, dropped from capture");
                }
            }
        }

        Self {
            status: result.status.as_u16(),
            headers,
            body: result.body.clone(),
        }
    }

    /// Rebuilds a handler result for replay.
    pub fn into_handler_result(self) -> Result<HandlerResult> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| EngineError::Backend(anyhow!("cached status invalid: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, values) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EngineError::Backend(anyhow!("cached header name invalid: {e}")))?;
            for value in values {
                let value = HeaderValue::from_str(value).map_err(|e| {
                    EngineError::Backend(anyhow!("cached header value invalid: {e}"))
                })?;
                headers.append(name.clone(), value);
            }
        }

        Ok(HandlerResult {
            status,
            headers,
            body: self.body,
            shape: ResultShape::Structured,
        })
    }
}

/// The single mutual-exclusion unit per `(prefix, key)`.
///
/// The two phases are mutually exclusive: the `InProgress` to `Completed`
/// transition overwrites the record under the same key with a fresh TTL,
/// so a key never has two coexisting records. The fingerprint is fixed at
/// creation and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheRecord {
    InProgress {
        fingerprint: String,
        created_at: DateTime<Utc>,
    },
    Completed {
        fingerprint: String,
        response: CachedResponse,
        completed_at: DateTime<Utc>,
    },
}

impl CacheRecord {
    pub fn in_progress(fingerprint: impl Into<String>) -> Self {
        CacheRecord::InProgress {
            fingerprint: fingerprint.into(),
            created_at: Utc::now(),
        }
    }

    pub fn completed(fingerprint: impl Into<String>, response: CachedResponse) -> Self {
        CacheRecord::Completed {
            fingerprint: fingerprint.into(),
            response,
            completed_at: Utc::now(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            CacheRecord::InProgress { fingerprint, .. } => fingerprint,
            CacheRecord::Completed { fingerprint, .. } => fingerprint,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CacheRecord::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_strips_transport_headers() {
        let result = HandlerResult::json(StatusCode::CREATED, json!({"id": 1}))
            .with_header(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("application/json"),
            )
            .with_header(
                HeaderName::from_static("content-length"),
                HeaderValue::from_static("12"),
            )
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("req-1"),
            );

        let cached = CachedResponse::capture(&result);
        assert_eq!(cached.status, 201);
        assert!(!cached.headers.contains_key("content-type"));
        assert!(!cached.headers.contains_key("content-length"));
        assert_eq!(cached.headers["x-request-id"], vec!["req-1".to_string()]);
    }

    #[test]
    fn test_capture_keeps_multi_valued_headers() {
        let result = HandlerResult::json(StatusCode::OK, json!(null))
            .with_header(
                HeaderName::from_static("set-cookie"),
                HeaderValue::from_static("a=1"),
            )
            .with_header(
                HeaderName::from_static("set-cookie"),
                HeaderValue::from_static("b=2"),
            );

        let cached = CachedResponse::capture(&result);
        assert_eq!(
            cached.headers["set-cookie"],
            vec!["a=1".to_string(), "b=2".to_string()]
        );
    }

    #[test]
    fn test_capture_drops_non_textual_header_value() {
        let result = HandlerResult::json(StatusCode::OK, json!(null))
            .with_header(
                HeaderName::from_static("x-binary"),
                HeaderValue::from_bytes(b"\xffopaque").unwrap(),
            )
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("req-3"),
            );

        let cached = CachedResponse::capture(&result);
        assert!(!cached.headers.contains_key("x-binary"));
        assert_eq!(cached.headers["x-request-id"], vec!["req-3".to_string()]);
    }

    #[test]
    fn test_into_handler_result_round_trip() {
        let result = HandlerResult::json(StatusCode::OK, json!({"x": [1, 2, 3]})).with_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-2"),
        );

        let cached = CachedResponse::capture(&result);
        let replayed = cached.clone().into_handler_result().unwrap();

        assert_eq!(replayed.status, StatusCode::OK);
        assert_eq!(replayed.body, json!({"x": [1, 2, 3]}));
        assert_eq!(CachedResponse::capture(&replayed), cached);
    }

    #[test]
    fn test_record_phases() {
        let in_progress = CacheRecord::in_progress("fp-1");
        assert_eq!(in_progress.fingerprint(), "fp-1");
        assert!(!in_progress.is_completed());

        let response = CachedResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: json!({"ok": true}),
        };
        let completed = CacheRecord::completed("fp-1", response);
        assert!(completed.is_completed());
        assert_eq!(completed.fingerprint(), "fp-1");
    }
}
