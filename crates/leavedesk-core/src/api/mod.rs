//! REST API client module.
//!
//! This module provides the `ApiClient`, the single path every outbound call
//! takes. It attaches the session's bearer credential, reports failures on
//! the notification bus and ends the session when the server answers 401.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, LoginRequest, LoginResponse, IDENTITY_PATH, LOGIN_PATH};
pub use error::{ApiError, FALLBACK_ERROR_MESSAGE};
pub use transport::{HttpTransport, InboundResponse, OutboundRequest, Transport, TransportError};
