//! Domain request channel: contract and reqwest adapter.

use crate::error::{ErrorKind, RequestFailure};
use crate::executor::Classification;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request descriptor. Replayed verbatim on the retry leg.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    /// Decode the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        T::deserialize(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Transport failures, classified for the executor.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Non-success status with the server's message, if any
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Http(error)
        }
    }
}

impl RequestFailure for TransportError {
    fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout | TransportError::Connect(_) | TransportError::Http(_) => {
                ErrorKind::IoError
            }
            TransportError::Status { status, .. } if (400..500).contains(status) => {
                ErrorKind::ServerRejected
            }
            _ => ErrorKind::Other,
        }
    }
}

/// Classify a transport error for the executor.
///
/// Only a 401 means the token itself was rejected. Timeouts are never
/// authorization failures.
pub fn classify_transport_error(error: &TransportError) -> Classification {
    match error {
        TransportError::Status { status: 401, .. } => Classification::AuthFailure,
        _ => Classification::Other,
    }
}

/// Opaque request/response channel carrying a bearer token.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, token: &str, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed [`Transport`] for the domain endpoints.
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, token: &str, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.base_url.join(&request.path)?;
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .http_client
            .request(request.method, url)
            .bearer_auth(token)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: failure_message(status, &text),
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Best-effort extraction of a displayable message from an error body.
fn failure_message(status: StatusCode, body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(Url::parse(&server.uri()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/journals"))
            .and(header("Authorization", "Bearer tok-1"))
            .and(body_json(json!({ "title": "Lisbon" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 42 })))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server)
            .send("tok-1", ApiRequest::post("v1/journals", json!({ "title": "Lisbon" })))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body["id"], 42);
    }

    #[tokio::test]
    async fn test_query_and_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/journals/7"))
            .and(query_param("hard", "false"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let response = transport(&server)
            .send(
                "tok",
                ApiRequest::delete("v1/journals/7").with_query("hard", "false"),
            )
            .await
            .unwrap();
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = transport(&server)
            .send("expired", ApiRequest::get("v1/journals"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(classify_transport_error(&err), Classification::AuthFailure);
    }

    #[tokio::test]
    async fn test_business_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({ "message": "Title is required" })),
            )
            .mount(&server)
            .await;

        let err = transport(&server)
            .send("tok", ApiRequest::put("v1/journals/1", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Title is required");
        assert_eq!(err.kind(), ErrorKind::ServerRejected);
        assert_eq!(classify_transport_error(&err), Classification::Other);
    }

    #[tokio::test]
    async fn test_timeout_is_never_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_timeout(
            Url::parse(&server.uri()).unwrap(),
            Duration::from_millis(50),
        )
        .unwrap();
        let err = transport
            .send("tok", ApiRequest::get("v1/journals"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout));
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(classify_transport_error(&err), Classification::Other);
    }

    #[test]
    fn test_decode_response() {
        #[derive(Deserialize)]
        struct Created {
            id: i64,
        }

        let response = ApiResponse {
            status: 200,
            body: json!({ "id": 42 }),
        };
        assert_eq!(response.json::<Created>().unwrap().id, 42);
        assert!(matches!(
            response.json::<Vec<i64>>(),
            Err(TransportError::Decode(_))
        ));
    }
}
