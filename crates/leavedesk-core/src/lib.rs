//! Core library for leavedesk.
//!
//! Client-side session lifecycle for the leave management dashboard:
//! - `auth`: persisted session store with a 7 day remember window
//! - `api`: request pipeline attaching the credential and triaging failures
//! - `guard`: route guard state machine for protected views
//! - `notify`: notification bus for user-facing messages
//! - `context`: the application-root object tying them together

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod guard;
pub mod notify;
pub mod utils;

pub use api::{ApiClient, ApiError, LoginRequest, LoginResponse};
pub use auth::{Identity, SessionData, SessionStore};
pub use config::Config;
pub use context::AuthContext;
pub use guard::{GuardConfig, GuardState, GuardView, RouteGuard};
pub use notify::{Notification, NotificationBus, NotificationKind};
