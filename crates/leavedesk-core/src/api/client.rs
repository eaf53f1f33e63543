//! Authenticated request pipeline.
//!
//! Every outbound call goes through `ApiClient::execute`, which runs the
//! stages in order: attach the current credential, dispatch, classify the
//! response, report failures (notification, forced logout on 401) and hand
//! the result back to the caller. Failures are never swallowed.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{self, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{Identity, SessionStore};
use crate::notify::NotificationBus;

use super::transport::{InboundResponse, OutboundRequest, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint, exchanges a credential request for a bearer credential
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Identity endpoint for the current credential
pub const IDENTITY_PATH: &str = "/api/auth/me";

/// Title of the notification published for a failed call
const ERROR_TITLE: &str = "Error";

fn default_credential_type() -> String {
    "bearer".to_string()
}

/// Credential request payload for the login endpoint.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "access_token")]
    pub credential: String,
    #[serde(rename = "token_type", default = "default_credential_type")]
    pub credential_type: String,
}

/// API client with the request pipeline built in.
/// Clone is cheap - clones share the transport, session and notification bus.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionStore>,
    notifications: NotificationBus,
}

impl ApiClient {
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        notifications: NotificationBus,
    ) -> Self {
        Self {
            transport,
            session,
            notifications,
        }
    }

    /// Run one request through the pipeline.
    pub async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, ApiError> {
        let method = request.method.clone();
        let path = request.path.clone();

        let outcome = match self.authorize(request) {
            Ok(request) => match self.transport.send(request).await {
                Ok(response) => Self::classify(response),
                Err(e) => Err(ApiError::from(e)),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                debug!(%method, path = %path, status = %response.status, "Request succeeded");
                Ok(response)
            }
            Err(error) => {
                self.report_failure(&method, &path, &error);
                Err(error)
            }
        }
    }

    /// Attach the credential held at dispatch time, if any.
    fn authorize(&self, mut request: OutboundRequest) -> Result<OutboundRequest, ApiError> {
        if let Some(credential) = self.session.credential() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", credential))
                .map_err(|_| ApiError::InvalidRequest("Credential is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            request.headers.insert(header::AUTHORIZATION, value);
        }
        Ok(request)
    }

    fn classify(response: InboundResponse) -> Result<InboundResponse, ApiError> {
        if response.is_success() {
            return Ok(response);
        }
        debug!(
            status = %response.status,
            body = %ApiError::truncate_body(&response.body),
            "Error response received"
        );
        Err(ApiError::from_status(response.status, &response.body))
    }

    /// Surface a failure exactly once and end the session on 401.
    fn report_failure(&self, method: &Method, path: &str, error: &ApiError) {
        warn!(%method, path = path, error = %error, "API request failed");
        self.notifications.error(error.user_message(), Some(ERROR_TITLE));
        if error.is_unauthorized() {
            info!(path = path, "Credential rejected, ending session");
            self.session.logout();
        }
    }

    // ===== Typed helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(OutboundRequest::get(path)).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = OutboundRequest::post(path).json(body)?;
        self.execute(request).await?.json()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = OutboundRequest::put(path).json(body)?;
        self.execute(request).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(OutboundRequest::delete(path)).await?;
        Ok(())
    }

    // ===== Auth endpoints =====

    /// Exchange a credential request for a bearer credential
    pub async fn authenticate<B: Serialize + ?Sized>(&self, payload: &B) -> Result<LoginResponse, ApiError> {
        self.post(LOGIN_PATH, payload).await
    }

    /// Fetch the identity behind the current credential
    pub async fn fetch_identity(&self) -> Result<Identity, ApiError> {
        self.get(IDENTITY_PATH).await
    }
}

// ============================================================================
// Tests
// ============================================================================
