//! The transport seam between the console and its backend.
//!
//! Every outbound call is an [`ApiRequest`] handed to a [`Transport`]. The
//! production implementation speaks HTTP; tests plug in an in-process
//! backend. Transports never interpret status codes: a 401 or a 500 is a
//! successful *transport* round trip and comes back as an [`ApiResponse`].
//! Only failures to obtain a response at all are a [`TransportError`].

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// HTTP verbs used by the backend contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound call. `path` is relative to the backend base URL and always
/// starts with `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Bearer token to send in the `Authorization` header, if any.
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

/// A completed round trip, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body. Empty bodies are `Null`; non-JSON bodies are
    /// carried as a JSON string.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401 and 403 both mean the session is no longer valid.
    pub fn is_session_expired(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("could not reach backend: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("could not read response body: {0}")]
    Body(String),
}

/// Sends [`ApiRequest`]s to a backend.
///
/// Implementations must be `Send + Sync`: one transport is shared by every
/// concurrent call of a console session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ApiResponse::new(204, Value::Null).is_success());
        assert!(!ApiResponse::new(302, Value::Null).is_success());
        assert!(ApiResponse::new(401, Value::Null).is_session_expired());
        assert!(ApiResponse::new(403, Value::Null).is_session_expired());
        assert!(!ApiResponse::new(404, Value::Null).is_session_expired());
    }

    #[test]
    fn test_request_builder() {
        let req = ApiRequest::new(Method::Post, "/parts")
            .with_body(serde_json::json!({"part_name": "Door"}))
            .with_bearer(Some("tok".into()));
        assert_eq!(req.method.to_string(), "POST");
        assert_eq!(req.bearer.as_deref(), Some("tok"));
        assert!(req.body.is_some());
    }
}
