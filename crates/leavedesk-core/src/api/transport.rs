//! Transport seam under the request pipeline.
//!
//! The pipeline only sees `OutboundRequest` and `InboundResponse`, so it can be
//! exercised without a network. `HttpTransport` is the reqwest implementation.

use std::error::Error as StdError;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::ApiError;

/// No response was received for a request.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else if err.is_connect() {
            "Failed to connect to server".to_string()
        } else {
            "Failed to send request".to_string()
        };
        Self::with_source(message, err)
    }
}

/// An outbound call before dispatch. `path` is relative to the API base URL.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Credential carried in the Authorization header, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub body: String,
}

impl InboundResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = if self.body.trim().is_empty() { "null" } else { &self.body };
        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let base = Url::parse(&base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a request path against the base URL.
    ///
    /// Absolute URLs are accepted only on the base URL's origin, since the
    /// request may carry the session credential.
    fn url(&self, path: &str) -> Result<String, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let target = Url::parse(path)
                .map_err(|e| TransportError::with_source(format!("Invalid URL: {}", path), e))?;
            if target.origin() != self.base.origin() {
                return Err(TransportError::new(format!(
                    "Refusing to send request to {}: outside {}",
                    target.origin().ascii_serialization(),
                    self.base.origin().ascii_serialization()
                )));
            }
            return Ok(target.into());
        }
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let url = self.url(&request.path)?;
        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(InboundResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let transport = HttpTransport::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.url("/api/auth/me").unwrap(), "https://api.example.com/api/auth/me");
        assert_eq!(transport.url("api/auth/me").unwrap(), "https://api.example.com/api/auth/me");

        let transport = HttpTransport::new("https://api.example.com/v2", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.url("/leaves").unwrap(), "https://api.example.com/v2/leaves");
    }

    #[test]
    fn test_url_absolute_same_origin_allowed() {
        let transport = HttpTransport::new("https://api.example.com/v2", Duration::from_secs(5)).unwrap();
        assert_eq!(
            transport.url("https://api.example.com/other/x").unwrap(),
            "https://api.example.com/other/x"
        );
    }

    #[test]
    fn test_url_absolute_other_origin_rejected() {
        let transport = HttpTransport::new("https://api.example.com", Duration::from_secs(5)).unwrap();
        assert!(transport.url("https://other.example.com/x").is_err());
        assert!(transport.url("http://api.example.com/x").is_err());
        assert!(transport.url("https://api.example.com:8443/x").is_err());
    }

    #[test]
    fn test_invalid_base_url_is_error() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_send_to_other_origin_fails_without_dispatch() {
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
        let mut request = OutboundRequest::get("https://other.example.com/steal");
        request
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));

        let err = transport.send(request).await.unwrap_err();
        assert!(err.to_string().contains("Refusing to send request"));
    }

    #[test]
    fn test_response_json_empty_body_is_null() {
        let response = InboundResponse::new(StatusCode::NO_CONTENT, "");
        let value: Option<u32> = response.json().unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_response_json_invalid_body() {
        let response = InboundResponse::new(StatusCode::OK, "not json");
        let result: Result<Value, ApiError> = response.json();
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }

    #[test]
    fn test_bearer_token_reads_header() {
        let mut request = OutboundRequest::get("/x");
        assert_eq!(request.bearer_token(), None);
        request
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(request.bearer_token(), Some("abc"));
    }
}
