use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::SessionStorage;

/// How long a remembered session stays valid after login (7 days).
pub const REMEMBER_SESSION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// User profile returned by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Identity {
    #[serde(rename = "userId", alias = "id")]
    pub id: String,
    #[serde(rename = "username", alias = "displayName")]
    pub display_name: String,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "Array<string>"))]
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

fn default_remember_session() -> bool {
    true
}

/// The persisted session record.
///
/// Fields are private so that a missing credential always implies a missing
/// identity and login timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    identity: Option<Identity>,
    #[serde(default = "default_remember_session")]
    remember_session: bool,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    login_timestamp: Option<DateTime<Utc>>,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            credential: None,
            identity: None,
            remember_session: true,
            login_timestamp: None,
        }
    }
}

impl SessionData {
    /// A freshly logged-in session with no identity yet
    pub fn logged_in(credential: impl Into<String>, remember_session: bool, at: DateTime<Utc>) -> Self {
        Self {
            credential: Some(credential.into()),
            identity: None,
            remember_session,
            login_timestamp: Some(at),
        }
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn remember_session(&self) -> bool {
        self.remember_session
    }

    pub fn login_timestamp(&self) -> Option<DateTime<Utc>> {
        self.login_timestamp
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remembered sessions expire strictly after the 7 day window.
    /// Sessions that are not remembered never expire by elapsed time.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expiry) => now > expiry,
            None => false,
        }
    }

    /// Instant after which the session counts as expired, if expiry applies
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.remember_session {
            return None;
        }
        self.login_timestamp
            .map(|at| at + Duration::milliseconds(REMEMBER_SESSION_MS))
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at().map(|expiry| expiry - Utc::now())
    }

    /// Drop identity and timestamp if there is no credential to back them.
    fn normalized(mut self) -> Self {
        if self.credential.is_none() && (self.identity.is_some() || self.login_timestamp.is_some()) {
            warn!("Persisted session has no credential, discarding identity and timestamp");
            self.identity = None;
            self.login_timestamp = None;
        }
        self
    }

    /// Reset to the logged-out state. Returns false if already logged out.
    fn clear(&mut self) -> bool {
        if self.credential.is_none() && self.identity.is_none() && self.login_timestamp.is_none() {
            return false;
        }
        self.credential = None;
        self.identity = None;
        self.login_timestamp = None;
        true
    }
}

/// Identifies one login so that late identity fetches can be matched to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginGeneration(u64);

/// Single source of truth for "is this client authenticated, and by whom".
///
/// State lives in a watch channel; every mutation and its persistence write
/// run under the channel's write lock, so mutations never interleave.
///
/// Storage writes are synchronous and happen under that lock. The record is
/// a few hundred bytes, and writing in lock order is what keeps the stored
/// record equal to the last in-memory state: a save can never land after
/// the clear of a later logout.
pub struct SessionStore {
    state: watch::Sender<SessionData>,
    hydrated: watch::Sender<bool>,
    storage: Arc<dyn SessionStorage>,
    generation: AtomicU64,
    /// A login or logout happened, so the persisted record must not replace memory
    touched: AtomicBool,
    /// Rehydration has dealt with the persisted record
    loaded: AtomicBool,
    /// Remember flag set before the persisted record was loaded
    pending_remember: Mutex<Option<bool>>,
}

impl SessionStore {
    /// Create an empty, not yet rehydrated store.
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let (state, _) = watch::channel(SessionData::default());
        let (hydrated, _) = watch::channel(false);
        Self {
            state,
            hydrated,
            storage,
            generation: AtomicU64::new(0),
            touched: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            pending_remember: Mutex::new(None),
        }
    }

    /// Load the persisted session into memory and signal completion.
    ///
    /// A login or logout made before the read finished wins over the
    /// persisted record. A remember flag set earlier is applied to the loaded
    /// record. The completion signal fires even if the read fails.
    pub async fn rehydrate(&self) {
        let storage = Arc::clone(&self.storage);
        let loaded = match tokio::task::spawn_blocking(move || storage.load()).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Session load task failed: {}", e)),
        };

        match loaded {
            Ok(Some(data)) => {
                let mut data = data.normalized();
                let applied = self.state.send_if_modified(|state| {
                    self.loaded.store(true, Ordering::SeqCst);
                    let pending = self.pending_remember.lock().take();
                    if self.touched.load(Ordering::SeqCst) {
                        return false;
                    }
                    if let Some(remember_session) = pending {
                        if data.remember_session != remember_session {
                            data.remember_session = remember_session;
                            self.persist(&data);
                        }
                    }
                    *state = data;
                    true
                });
                if applied {
                    debug!(authenticated = self.state.borrow().is_authenticated(), "Session rehydrated");
                } else {
                    debug!("Session changed before rehydration finished, keeping in-memory state");
                }
            }
            Ok(None) => debug!("No persisted session found"),
            Err(e) => warn!(error = %e, "Failed to rehydrate session, starting empty"),
        }
        self.state.send_if_modified(|_| {
            self.loaded.store(true, Ordering::SeqCst);
            self.pending_remember.lock().take();
            false
        });

        self.hydrated.send_replace(true);
    }

    pub fn is_hydrated(&self) -> bool {
        *self.hydrated.borrow()
    }

    /// Resolves once rehydration has completed.
    pub async fn wait_hydrated(&self) {
        let mut rx = self.hydrated.subscribe();
        // The sender lives as long as self, so this cannot observe a closed channel
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Record a new login. Any previous identity is dropped.
    pub fn login(&self, credential: String, remember_session: bool) -> LoginGeneration {
        let mut generation = 0;
        self.state.send_modify(|state| {
            self.touched.store(true, Ordering::SeqCst);
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = SessionData::logged_in(credential, remember_session, Utc::now());
            self.persist(state);
        });
        info!(remember_session, "Logged in");
        LoginGeneration(generation)
    }

    /// Attach a fetched identity to the login it was fetched for.
    /// Returns false if that login has since been replaced or ended.
    pub fn apply_identity(&self, generation: LoginGeneration, identity: Identity) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation.0 || state.credential.is_none() {
                return false;
            }
            state.identity = Some(identity);
            self.persist(state);
            true
        })
    }

    /// End the session and erase the persisted record.
    /// Returns false if there was nothing to clear.
    pub fn logout(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            self.touched.store(true, Ordering::SeqCst);
            let changed = state.clear();
            if changed {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            if let Err(e) = self.storage.clear() {
                warn!(error = %e, "Failed to erase persisted session");
            }
            changed
        });
        if changed {
            info!("Logged out");
        } else {
            debug!("Logout on an empty session, nothing to do");
        }
        changed
    }

    /// Change the remember flag without touching the login timestamp.
    ///
    /// Before rehydration the flag is held back and applied to the loaded
    /// record, so setting it never discards a persisted session.
    pub fn set_remember_session(&self, remember_session: bool) {
        self.state.send_if_modified(|state| {
            let settled = self.loaded.load(Ordering::SeqCst) || self.touched.load(Ordering::SeqCst);
            if !settled {
                *self.pending_remember.lock() = Some(remember_session);
            }
            if state.remember_session == remember_session {
                return false;
            }
            state.remember_session = remember_session;
            if settled {
                self.persist(state);
            }
            true
        });
    }

    /// The login the current credential belongs to, `None` when logged out.
    pub fn current_generation(&self) -> Option<LoginGeneration> {
        let state = self.state.borrow();
        state.credential.as_ref()?;
        Some(LoginGeneration(self.generation.load(Ordering::SeqCst)))
    }

    /// Pure check - callers decide whether to act on an expired session.
    pub fn is_expired(&self) -> bool {
        self.state.borrow().is_expired()
    }

    pub fn snapshot(&self) -> SessionData {
        self.state.borrow().clone()
    }

    pub fn credential(&self) -> Option<String> {
        self.state.borrow().credential.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<SessionData> {
        self.state.subscribe()
    }

    fn persist(&self, data: &SessionData) {
        if let Err(e) = self.storage.save(data) {
            warn!(error = %e, "Failed to persist session");
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

    fn identity(name: &str) -> Identity {
        Identity {
            id: format!("id-{}", name),
            display_name: name.to_string(),
            roles: ["employee".to_string()].into_iter().collect(),
        }
    }

    fn store_with(storage: Arc<MemoryStorage>) -> SessionStore {
        SessionStore::new(storage)
    }

    // -------------------------------------------------------------------------
    // Expiry policy
    // -------------------------------------------------------------------------

    #[test]
    fn test_remembered_session_expiry_boundary() {
        let t0 = Utc::now();
        let session = SessionData::logged_in("tok", true, t0);
        let window = Duration::milliseconds(REMEMBER_SESSION_MS);

        assert!(!session.is_expired_at(t0));
        assert!(!session.is_expired_at(t0 + window - Duration::milliseconds(1)));
        assert!(!session.is_expired_at(t0 + window));
        assert!(session.is_expired_at(t0 + window + Duration::milliseconds(1)));
        assert!(session.is_expired_at(t0 + Duration::days(8)));
    }

    #[test]
    fn test_unremembered_session_never_expires() {
        let t0 = Utc::now();
        let session = SessionData::logged_in("tok", false, t0);

        assert!(!session.is_expired_at(t0 + Duration::days(8)));
        assert!(!session.is_expired_at(t0 + Duration::days(3650)));
        assert_eq!(session.expires_at(), None);
    }

    #[test]
    fn test_empty_session_is_not_expired() {
        let session = SessionData::default();
        assert!(!session.is_expired_at(Utc::now() + Duration::days(30)));
        assert!(session.remember_session());
    }

    #[test]
    fn test_remember_constant_is_seven_days() {
        assert_eq!(REMEMBER_SESSION_MS, 604_800_000);
    }

    #[test]
    fn test_normalized_drops_orphaned_fields() {
        let json = r#"{"credential":null,"identity":{"userId":"1","username":"ann","roles":[]},"rememberSession":true,"loginTimestamp":"2026-01-01T00:00:00Z"}"#;
        let data: SessionData = serde_json::from_str(json).unwrap();
        let data = data.normalized();
        assert!(data.identity().is_none());
        assert!(data.login_timestamp().is_none());
    }

    #[test]
    fn test_parse_persisted_record() {
        let json = r#"{"credential":"abc","identity":{"id":"7","displayName":"Ann","roles":["admin"]},"loginTimestamp":"2026-01-01T00:00:00Z"}"#;
        let data: SessionData = serde_json::from_str(json).unwrap();
        assert_eq!(data.credential(), Some("abc"));
        // rememberSession defaults to true when absent
        assert!(data.remember_session());
        let identity = data.identity().unwrap();
        assert_eq!(identity.display_name, "Ann");
        assert!(identity.has_role("admin"));
    }

    // -------------------------------------------------------------------------
    // Store operations
    // -------------------------------------------------------------------------

    #[test]
    fn test_login_sets_fields_and_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(Arc::clone(&storage));

        store.login("tok-1".to_string(), true);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.credential(), Some("tok-1"));
        assert!(snapshot.login_timestamp().is_some());
        assert!(snapshot.identity().is_none());
        assert_eq!(storage.record(), Some(snapshot));
    }

    #[test]
    fn test_login_clears_previous_identity() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        let first = store.login("tok-1".to_string(), true);
        assert!(store.apply_identity(first, identity("ann")));

        store.login("tok-2".to_string(), true);
        assert!(store.identity().is_none());
    }

    #[test]
    fn test_stale_identity_is_ignored() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        let first = store.login("tok-1".to_string(), true);
        let second = store.login("tok-2".to_string(), true);

        assert!(!store.apply_identity(first, identity("ann")));
        assert!(store.identity().is_none());
        assert!(store.apply_identity(second, identity("bob")));
        assert_eq!(store.identity().unwrap().display_name, "bob");
    }

    #[test]
    fn test_identity_after_logout_is_ignored() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        let generation = store.login("tok".to_string(), true);
        store.logout();
        assert!(!store.apply_identity(generation, identity("ann")));
        assert!(store.snapshot().identity().is_none());
    }

    #[test]
    fn test_logout_clears_and_erases() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(Arc::clone(&storage));
        let generation = store.login("tok".to_string(), true);
        store.apply_identity(generation, identity("ann"));

        assert!(store.logout());

        let snapshot = store.snapshot();
        assert!(snapshot.credential().is_none());
        assert!(snapshot.identity().is_none());
        assert!(snapshot.login_timestamp().is_none());
        assert_eq!(storage.record(), None);
    }

    #[test]
    fn test_logout_is_idempotent() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        store.login("tok".to_string(), false);

        assert!(store.logout());
        let after_first = store.snapshot();
        assert!(!store.logout());
        assert_eq!(store.snapshot(), after_first);
    }

    #[test]
    fn test_second_logout_does_not_notify_observers() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        store.login("tok".to_string(), true);
        let mut rx = store.subscribe();

        store.logout();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.logout();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_set_remember_session_keeps_timestamp() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(Arc::clone(&storage));
        store.login("tok".to_string(), true);
        let before = store.snapshot().login_timestamp();

        store.set_remember_session(false);

        let snapshot = store.snapshot();
        assert!(!snapshot.remember_session());
        assert_eq!(snapshot.login_timestamp(), before);
        assert_eq!(storage.record().map(|r| r.remember_session()), Some(false));
    }

    // -------------------------------------------------------------------------
    // Rehydration
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_rehydrate_loads_persisted_session() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "persisted",
            true,
            Utc::now(),
        )));
        let store = store_with(storage);
        assert!(!store.is_hydrated());
        assert!(store.credential().is_none());

        store.rehydrate().await;

        assert!(store.is_hydrated());
        assert_eq!(store.credential().as_deref(), Some("persisted"));
    }

    #[tokio::test]
    async fn test_rehydrate_does_not_clobber_newer_login() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "old",
            true,
            Utc::now(),
        )));
        let store = store_with(storage);

        store.login("new".to_string(), true);
        store.rehydrate().await;

        assert_eq!(store.credential().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_logout_before_rehydration_prevents_resurrection() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "old",
            true,
            Utc::now(),
        )));
        let store = store_with(Arc::clone(&storage));

        store.logout();
        store.rehydrate().await;

        assert!(store.credential().is_none());
        assert_eq!(storage.record(), None);
    }

    #[tokio::test]
    async fn test_remember_flag_before_rehydration_keeps_persisted_session() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "persisted",
            true,
            Utc::now(),
        )));
        let store = store_with(Arc::clone(&storage));

        store.set_remember_session(false);
        store.rehydrate().await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.credential(), Some("persisted"));
        assert!(!snapshot.remember_session());
        let record = storage.record().unwrap();
        assert_eq!(record.credential(), Some("persisted"));
        assert!(!record.remember_session());
    }

    #[tokio::test]
    async fn test_unchanged_remember_flag_before_rehydration_is_harmless() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "persisted",
            true,
            Utc::now(),
        )));
        let store = store_with(Arc::clone(&storage));

        store.set_remember_session(true);
        store.rehydrate().await;

        assert_eq!(store.credential().as_deref(), Some("persisted"));
        assert_eq!(storage.record().and_then(|r| r.credential().map(str::to_string)), Some("persisted".to_string()));
    }

    #[tokio::test]
    async fn test_remember_flag_after_rehydration_persists() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "persisted",
            true,
            Utc::now(),
        )));
        let store = store_with(Arc::clone(&storage));
        store.rehydrate().await;

        store.set_remember_session(false);

        assert_eq!(storage.record().map(|r| r.remember_session()), Some(false));
    }

    #[test]
    fn test_persisted_record_follows_mutation_order() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(Arc::clone(&storage));

        let first = store.login("a".to_string(), true);
        store.apply_identity(first, identity("ann"));
        store.logout();
        store.login("b".to_string(), false);
        assert_eq!(storage.record(), Some(store.snapshot()));

        store.logout();
        assert_eq!(storage.record(), None);
    }

    #[tokio::test]
    async fn test_current_generation_tracks_credential() {
        let storage = Arc::new(MemoryStorage::with_record(SessionData::logged_in(
            "persisted",
            true,
            Utc::now(),
        )));
        let store = store_with(storage);
        assert_eq!(store.current_generation(), None);

        store.rehydrate().await;
        let rehydrated = store.current_generation().unwrap();
        assert!(store.apply_identity(rehydrated, identity("ann")));

        let login = store.login("new".to_string(), true);
        assert_eq!(store.current_generation(), Some(login));
        assert!(!store.apply_identity(rehydrated, identity("stale")));

        store.logout();
        assert_eq!(store.current_generation(), None);
    }

    #[tokio::test]
    async fn test_wait_hydrated_resolves_after_rehydrate() {
        let store = Arc::new(store_with(Arc::new(MemoryStorage::new())));
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_hydrated().await })
        };

        store.rehydrate().await;
        waiter.await.unwrap();
        assert!(store.is_hydrated());
    }
}
