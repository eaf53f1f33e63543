use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::transport::TransportError;

/// Shown when a failure carries no usable message of its own.
pub const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - credential may be expired or revoked")]
    Unauthorized { message: String },

    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited { message: String },

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull a human-readable message out of an error body.
    ///
    /// Uses the `detail` field when it is a string, or the `msg` entries of a
    /// validation error list. Anything else gets the generic fallback.
    pub fn extract_message(body: &str) -> String {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value.get("detail").cloned());

        match detail {
            Some(Value::String(message)) if !message.trim().is_empty() => message,
            Some(Value::Array(entries)) => {
                let messages: Vec<&str> = entries
                    .iter()
                    .filter_map(|entry| entry.get("msg").and_then(Value::as_str))
                    .collect();
                if messages.is_empty() {
                    FALLBACK_ERROR_MESSAGE.to_string()
                } else {
                    messages.join("; ")
                }
            }
            _ => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::extract_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized { message },
            403 => ApiError::AccessDenied { message },
            404 => ApiError::NotFound { message },
            429 => ApiError::RateLimited { message },
            code @ 500..=599 => ApiError::ServerError { status: code, message },
            code => ApiError::Status { status: code, message },
        }
    }

    /// HTTP status of the failed response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::AccessDenied { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::ServerError { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(_) | ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> &str {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::AccessDenied { message }
            | ApiError::NotFound { message }
            | ApiError::RateLimited { message }
            | ApiError::ServerError { message, .. }
            | ApiError::Status { message, .. } => message.as_str(),
            ApiError::Network(_) | ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) => {
                FALLBACK_ERROR_MESSAGE
            }
        }
    }
}
