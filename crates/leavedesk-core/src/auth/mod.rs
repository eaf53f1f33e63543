//! Authentication module for the client-side session.
//!
//! This module provides:
//! - `SessionStore`: the credential holder with its expiry policy
//! - `SessionStorage`: durable backends for the session record (file, OS keychain, memory)
//!
//! Remembered sessions expire 7 days after login.

pub mod session;
pub mod storage;

pub use session::{Identity, LoginGeneration, SessionData, SessionStore, REMEMBER_SESSION_MS};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage, SESSION_STORAGE_KEY};
