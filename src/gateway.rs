//! Backend Gateway Client.
//!
//! The single point of outbound traffic. Every call goes through
//! [`Gateway::request`], which:
//!
//! 1. attaches the session's bearer token,
//! 2. hands the request to the configured [`Transport`],
//! 3. on 401/403 clears the session and notifies expiry observers, then
//!    still returns the failure to the caller,
//! 4. maps any other non-2xx status to [`GatewayError::Status`] carrying the
//!    backend's structured message when one is present.
//!
//! There is no retry and no queueing. Timeouts are whatever the transport
//! imposes.
//!
//! # Read flavors
//!
//! | Method | On failure | Used by |
//! |--------|------------|---------|
//! | [`Gateway::fetch_list`] | `Err` | class registry, aggregation |
//! | [`Gateway::list_or_empty`] | logs, returns `[]` | browse commands, order computation |
//!
//! Both decode through [`gt_console_core::envelope`], so a bare array,
//! `{ "data": [...] }`, and anything else (as `[]`) are handled in one place.

use async_trait::async_trait;
use gt_console_core::envelope::{self, decode_list};
use gt_console_core::transport::{
    ApiRequest, ApiResponse, Method, Transport, TransportError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::session::Session;

/// Errors surfaced by gateway calls. `op` names the operation
/// (e.g. `"create capture"`) so messages stay meaningful to an operator.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{op} failed: {source}")]
    Transport {
        op: String,
        #[source]
        source: TransportError,
    },

    #[error("{message}")]
    Status {
        op: String,
        status: u16,
        message: String,
    },

    #[error("session expired (HTTP {status}) during {op}: {message}")]
    SessionExpired {
        op: String,
        status: u16,
        message: String,
    },

    #[error("{op}: unexpected response: {detail}")]
    Decode { op: String, detail: String },
}

impl GatewayError {
    pub fn op(&self) -> &str {
        match self {
            GatewayError::Transport { op, .. }
            | GatewayError::Status { op, .. }
            | GatewayError::SessionExpired { op, .. }
            | GatewayError::Decode { op, .. } => op,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } | GatewayError::SessionExpired { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, GatewayError::SessionExpired { .. })
    }
}

/// Typed client over a [`Transport`], sharing one [`Session`].
///
/// Cloning is cheap: clones share the transport and the session.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        Self { transport, session }
    }

    /// Build an HTTP gateway from configuration, loading the session.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(
            &config.backend.base_url,
            Duration::from_secs(config.backend.timeout_secs),
        )?;
        let session = Session::init(&config.session)?;
        Ok(Self::new(Arc::new(transport), Arc::new(session)))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Shorthand for [`Session::on_session_expired`].
    pub fn on_session_expired<F>(&self, callback: F)
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.session.on_session_expired(callback);
    }

    /// Send one request and return the decoded JSON body on 2xx.
    pub async fn request(
        &self,
        op: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let mut request = ApiRequest::new(method, path).with_bearer(self.session.token());
        if let Some(body) = body {
            request = request.with_body(body);
        }

        debug!(%method, path, op, "backend request");
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|source| GatewayError::Transport {
                op: op.to_string(),
                source,
            })?;

        self.interpret(op, response)
    }

    fn interpret(&self, op: &str, response: ApiResponse) -> Result<Value, GatewayError> {
        if response.is_success() {
            return Ok(response.body);
        }

        let message =
            envelope::error_message(&response.body).unwrap_or_else(|| format!("{} failed", op));

        if response.is_session_expired() {
            warn!(status = response.status, op, "session rejected by backend");
            self.session.expire(response.status);
            return Err(GatewayError::SessionExpired {
                op: op.to_string(),
                status: response.status,
                message,
            });
        }

        Err(GatewayError::Status {
            op: op.to_string(),
            status: response.status,
            message,
        })
    }

    /// Strict list read.
    pub async fn fetch_list<T: DeserializeOwned>(
        &self,
        op: &str,
        path: &str,
    ) -> Result<Vec<T>, GatewayError> {
        self.fetch_list_nested(op, path, None).await
    }

    /// Strict list read that also accepts `{ "data": { "<key>": [...] } }`.
    pub async fn fetch_list_nested<T: DeserializeOwned>(
        &self,
        op: &str,
        path: &str,
        nested_key: Option<&str>,
    ) -> Result<Vec<T>, GatewayError> {
        let body = self.request(op, Method::Get, path, None).await?;
        let decoded = decode_list::<T>(&body, nested_key);
        if !decoded.recognized && !body.is_null() {
            debug!(op, path, "unrecognized list envelope, treating as empty");
        }
        for reason in &decoded.rejected {
            warn!(op, path, %reason, "skipping undecodable record");
        }
        Ok(decoded.items)
    }

    /// Lenient list read: any failure is logged and yields `[]`.
    pub async fn list_or_empty<T: DeserializeOwned>(&self, op: &str, path: &str) -> Vec<T> {
        match self.fetch_list(op, path).await {
            Ok(items) => items,
            Err(e) => {
                warn!(op, path, error = %e, "read failed, returning empty list");
                Vec::new()
            }
        }
    }

    /// POST a body and decode the created record.
    pub async fn post_record<T: DeserializeOwned>(
        &self,
        op: &str,
        path: &str,
        body: Value,
    ) -> Result<T, GatewayError> {
        let response = self.request(op, Method::Post, path, Some(body)).await?;
        decode_record(op, &response)
    }

    /// POST a body where the caller does not need a typed response.
    pub async fn post(&self, op: &str, path: &str, body: Value) -> Result<Value, GatewayError> {
        let response = self.request(op, Method::Post, path, Some(body)).await?;
        Ok(envelope::record_body(&response).clone())
    }

    /// DELETE a resource. Empty (204) and JSON bodies are both success.
    pub async fn delete(&self, op: &str, path: &str) -> Result<(), GatewayError> {
        self.request(op, Method::Delete, path, None).await?;
        Ok(())
    }
}

/// Decode a single-record response, unwrapping a `data` envelope.
pub fn decode_record<T: DeserializeOwned>(op: &str, body: &Value) -> Result<T, GatewayError> {
    serde_json::from_value(envelope::record_body(body).clone()).map_err(|e| {
        GatewayError::Decode {
            op: op.to_string(),
            detail: e.to_string(),
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP transport
// ═══════════════════════════════════════════════════════════════════════

/// [`Transport`] over HTTPS using `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(ApiResponse::new(status, parse_body(&text)))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(e.to_string())
    }
}

/// Empty bodies become `Null`; non-JSON bodies are kept as a JSON string so
/// error messages from proxies still reach the operator.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned responses and records what it was asked.
    struct Canned {
        responses: Mutex<Vec<Result<ApiResponse, TransportError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(responses: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn gateway(canned: Arc<Canned>, token: Option<&str>) -> Gateway {
        let session = match token {
            Some(t) => Session::with_token(t),
            None => Session::new(),
        };
        Gateway::new(canned, Arc::new(session))
    }

    #[tokio::test]
    async fn test_bearer_token_is_attached() {
        let canned = Canned::new(vec![Ok(ApiResponse::new(200, json!([])))]);
        let gw = gateway(canned.clone(), Some("tok-1"));
        gw.request("list variants", Method::Get, "/variants", None)
            .await
            .unwrap();
        let seen = canned.seen.lock().unwrap();
        assert_eq!(seen[0].bearer.as_deref(), Some("tok-1"));
        assert_eq!(seen[0].path, "/variants");
    }

    #[tokio::test]
    async fn test_unauthorized_clears_session_and_still_errors() {
        let canned = Canned::new(vec![Ok(ApiResponse::new(
            401,
            json!({"message": "jwt expired"}),
        ))]);
        let gw = gateway(canned, Some("tok-1"));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        gw.on_session_expired(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = gw
            .request("create part", Method::Post, "/parts", Some(json!({})))
            .await
            .unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("jwt expired"));
        assert!(!gw.session().is_authenticated());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_error_prefers_structured_message() {
        let canned = Canned::new(vec![
            Ok(ApiResponse::new(
                422,
                json!({"data": {"message": "index already used"}}),
            )),
            Ok(ApiResponse::new(500, Value::Null)),
        ]);
        let gw = gateway(canned, None);

        let err = gw
            .post("create capture item", "/captures/add-entry-to-report-table", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "index already used");

        let err = gw.post("create part", "/parts", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "create part failed");
        assert_eq!(err.op(), "create part");
    }

    #[tokio::test]
    async fn test_list_or_empty_swallows_failures() {
        let canned = Canned::new(vec![
            Err(TransportError::Connect("refused".into())),
            Ok(ApiResponse::new(500, json!({"message": "boom"}))),
        ]);
        let gw = gateway(canned, None);
        let a: Vec<Value> = gw.list_or_empty("list parts", "/parts/variant/v1").await;
        let b: Vec<Value> = gw.list_or_empty("list parts", "/parts/variant/v1").await;
        assert!(a.is_empty() && b.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_list_propagates_failures() {
        let canned = Canned::new(vec![Err(TransportError::Timeout)]);
        let gw = gateway(canned, None);
        let err = gw
            .fetch_list::<Value>("list classes", "/classes")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
        assert!(err.to_string().starts_with("list classes failed"));
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let canned = Canned::new(vec![Ok(ApiResponse::new(204, Value::Null))]);
        let gw = gateway(canned, None);
        gw.delete("delete part", "/parts/p1").await.unwrap();
    }

    #[test]
    fn test_decode_record_unwraps_data() {
        #[derive(serde::Deserialize)]
        struct Row {
            id: String,
        }
        let row: Row = decode_record("x", &json!({"data": {"id": "r1"}})).unwrap();
        assert_eq!(row.id, "r1");
        assert!(decode_record::<Row>("x", &json!({"nope": 1})).is_err());
    }

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn test_from_config_without_file() {
        let gw = Gateway::from_config(&Config::minimal("http://localhost:9000/api")).unwrap();
        assert!(gw.session().token_file().is_none());
    }

    #[test]
    fn test_http_transport_joins_url() {
        let t = HttpTransport::new("http://localhost:9000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(t.url("/variants"), "http://localhost:9000/api/variants");
    }
}
