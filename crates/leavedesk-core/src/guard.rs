//! Route guard for protected views.
//!
//! A guard starts in `Rehydrating` and makes no decision until the session
//! store signals that rehydration finished (bounded by a timeout). It then
//! settles on `Unauthenticated`, `Expired` or `Authenticated`, and re-evaluates
//! whenever the session credential changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{SessionData, SessionStore};

/// Login entry point that unauthenticated views redirect to
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Upper bound on waiting for rehydration before evaluating anyway
pub const DEFAULT_HYDRATION_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub login_path: String,
    pub hydration_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            hydration_timeout: DEFAULT_HYDRATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Rehydrating,
    Unauthenticated,
    Expired,
    Authenticated,
}

/// What the view layer should show for a guard state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView {
    Placeholder,
    Content,
    Redirect(String),
}

pub struct RouteGuard {
    session: Arc<SessionStore>,
    updates: watch::Receiver<SessionData>,
    config: GuardConfig,
    state: GuardState,
    seen_credential: Option<String>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionStore>, config: GuardConfig) -> Self {
        let updates = session.subscribe();
        Self {
            session,
            updates,
            config,
            state: GuardState::Rehydrating,
            seen_credential: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn view(&self) -> GuardView {
        match self.state {
            GuardState::Rehydrating => GuardView::Placeholder,
            GuardState::Authenticated => GuardView::Content,
            GuardState::Unauthenticated | GuardState::Expired => {
                GuardView::Redirect(self.config.login_path.clone())
            }
        }
    }

    /// Arm the guard for a view mount: wait for rehydration, then decide.
    pub async fn mount(&mut self) -> GuardState {
        self.state = GuardState::Rehydrating;
        let timeout = self.config.hydration_timeout;
        if tokio::time::timeout(timeout, self.session.wait_hydrated()).await.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "Session rehydration did not finish, evaluating in-memory state");
        }
        self.evaluate()
    }

    /// Decide from the current session. An expired session is logged out here.
    pub fn evaluate(&mut self) -> GuardState {
        // Clone so the watch borrow is released before logout writes to it
        let snapshot = self.updates.borrow_and_update().clone();

        let next = match snapshot.credential() {
            None => GuardState::Unauthenticated,
            Some(_) if snapshot.is_expired() => {
                info!("Session expired, logging out");
                self.session.logout();
                GuardState::Expired
            }
            Some(_) => GuardState::Authenticated,
        };

        self.seen_credential = self.session.credential();
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "Route guard transition");
        }
        self.state = next;
        next
    }

    /// Wait for the credential to change and re-evaluate.
    /// Returns the current state unchanged if the session store is gone.
    pub async fn next_change(&mut self) -> GuardState {
        if self.state == GuardState::Rehydrating {
            return self.mount().await;
        }
        loop {
            if self.updates.changed().await.is_err() {
                return self.state;
            }
            let credential = self.updates.borrow_and_update().credential().map(str::to_string);
            if credential != self.seen_credential {
                return self.evaluate();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;
    use chrono::{Duration as ChronoDuration, Utc};

    fn store(record: Option<SessionData>) -> (Arc<SessionStore>, Arc<MemoryStorage>) {
        let storage = Arc::new(match record {
            Some(data) => MemoryStorage::with_record(data),
            None => MemoryStorage::new(),
        });
        (Arc::new(SessionStore::new(storage.clone())), storage)
    }

    #[tokio::test]
    async fn test_starts_rehydrating_with_placeholder() {
        let (session, _) = store(None);
        let guard = RouteGuard::new(session, GuardConfig::default());
        assert_eq!(guard.state(), GuardState::Rehydrating);
        assert_eq!(guard.view(), GuardView::Placeholder);
    }

    #[tokio::test]
    async fn test_no_session_redirects_after_rehydration() {
        let (session, _) = store(None);
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());

        session.rehydrate().await;
        let state = guard.mount().await;

        assert_eq!(state, GuardState::Unauthenticated);
        assert_eq!(guard.view(), GuardView::Redirect("/login".to_string()));
    }

    #[tokio::test]
    async fn test_persisted_session_is_admitted() {
        let (session, _) = store(Some(SessionData::logged_in("tok", true, Utc::now())));
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());

        let rehydration = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.rehydrate().await })
        };
        let state = guard.mount().await;
        rehydration.await.unwrap();

        assert_eq!(state, GuardState::Authenticated);
        assert_eq!(guard.view(), GuardView::Content);
    }

    #[tokio::test]
    async fn test_expired_session_is_logged_out_and_redirected() {
        let login_at = Utc::now() - ChronoDuration::days(8);
        let (session, storage) = store(Some(SessionData::logged_in("old", true, login_at)));
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());

        session.rehydrate().await;
        let state = guard.mount().await;

        assert_eq!(state, GuardState::Expired);
        assert_eq!(guard.view(), GuardView::Redirect("/login".to_string()));
        assert!(session.credential().is_none());
        assert!(storage.record().is_none());
    }

    #[tokio::test]
    async fn test_old_unremembered_session_is_admitted() {
        let login_at = Utc::now() - ChronoDuration::days(30);
        let (session, _) = store(Some(SessionData::logged_in("tok", false, login_at)));
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());

        session.rehydrate().await;
        assert_eq!(guard.mount().await, GuardState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_rehydration_never_runs() {
        let (session, _) = store(Some(SessionData::logged_in("tok", true, Utc::now())));
        let config = GuardConfig {
            hydration_timeout: Duration::from_millis(100),
            ..GuardConfig::default()
        };
        let mut guard = RouteGuard::new(session, config);

        // Nothing rehydrates, so the in-memory (empty) session decides
        assert_eq!(guard.mount().await, GuardState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logout_while_mounted_redirects() {
        let (session, _) = store(None);
        session.rehydrate().await;
        session.login("tok".to_string(), true);
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());
        assert_eq!(guard.mount().await, GuardState::Authenticated);

        let waiter = tokio::spawn(async move {
            let state = guard.next_change().await;
            (state, guard.view())
        });
        tokio::task::yield_now().await;
        session.logout();

        let (state, view) = waiter.await.unwrap();
        assert_eq!(state, GuardState::Unauthenticated);
        assert_eq!(view, GuardView::Redirect("/login".to_string()));
    }

    #[tokio::test]
    async fn test_next_change_settles_on_latest_credential() {
        let (session, _) = store(None);
        session.rehydrate().await;
        session.login("tok".to_string(), true);
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());
        guard.mount().await;

        // Remember flag flips alone do not change the credential
        session.set_remember_session(false);
        session.set_remember_session(true);
        session.logout();

        assert_eq!(guard.next_change().await, GuardState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_remount_rearms() {
        let (session, _) = store(None);
        session.rehydrate().await;
        let mut guard = RouteGuard::new(Arc::clone(&session), GuardConfig::default());
        assert_eq!(guard.mount().await, GuardState::Unauthenticated);

        session.login("tok".to_string(), true);
        assert_eq!(guard.mount().await, GuardState::Authenticated);
    }

    #[tokio::test]
    async fn test_custom_login_path() {
        let (session, _) = store(None);
        session.rehydrate().await;
        let config = GuardConfig {
            login_path: "/auth/sign-in".to_string(),
            ..GuardConfig::default()
        };
        let mut guard = RouteGuard::new(session, config);
        guard.mount().await;
        assert_eq!(guard.view(), GuardView::Redirect("/auth/sign-in".to_string()));
    }
}
