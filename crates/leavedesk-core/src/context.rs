//! Application-root auth context.
//!
//! `AuthContext` owns the session store, the request pipeline and the
//! notification bus, and is handed to whatever needs them. Clone is cheap.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, HttpTransport, Transport};
use crate::auth::{Identity, LoginGeneration, SessionData, SessionStorage, SessionStore};
use crate::config::Config;
use crate::guard::{GuardConfig, RouteGuard};
use crate::notify::NotificationBus;

#[derive(Clone)]
pub struct AuthContext {
    session: Arc<SessionStore>,
    api: ApiClient,
    notifications: NotificationBus,
    guard: GuardConfig,
}

impl AuthContext {
    /// Build a context from configuration: configured storage, HTTP transport.
    pub fn new(config: &Config) -> Result<Self> {
        let storage = config.session_storage()?;
        let transport = HttpTransport::new(config.api_base_url.clone(), config.request_timeout())?;
        Ok(Self::with_parts(storage, Arc::new(transport), config))
    }

    pub fn with_parts(
        storage: Arc<dyn SessionStorage>,
        transport: Arc<dyn Transport>,
        config: &Config,
    ) -> Self {
        let session = Arc::new(SessionStore::new(storage));
        let notifications = NotificationBus::new(config.notification_capacity);
        let api = ApiClient::with_transport(transport, Arc::clone(&session), notifications.clone());
        Self {
            session,
            api,
            notifications,
            guard: config.guard_config(),
        }
    }

    /// Start loading the persisted session in the background.
    /// Guards wait for this to finish before deciding.
    pub fn rehydrate(&self) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move { session.rehydrate().await })
    }

    /// Record a login and fetch the identity behind it in the background.
    ///
    /// The handle resolves to the identity once it has been attached, or
    /// `None` if the fetch failed or a newer login/logout superseded it. A
    /// failed fetch does not end the session; a 401 from it does, through
    /// the pipeline.
    pub fn login(&self, credential: impl Into<String>, remember_session: bool) -> JoinHandle<Option<Identity>> {
        let generation = self.session.login(credential.into(), remember_session);
        self.spawn_identity_fetch(generation)
    }

    /// Fetch the identity again for the current session.
    ///
    /// Recovers a session whose first fetch failed or that was rehydrated
    /// without one. Resolves to `None` when logged out, when the fetch fails
    /// or when a login/logout happened while it was in flight.
    pub fn refresh_identity(&self) -> JoinHandle<Option<Identity>> {
        match self.session.current_generation() {
            Some(generation) => self.spawn_identity_fetch(generation),
            None => {
                debug!("No session to refresh the identity for");
                tokio::spawn(async { None })
            }
        }
    }

    fn spawn_identity_fetch(&self, generation: LoginGeneration) -> JoinHandle<Option<Identity>> {
        let api = self.api.clone();
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            match api.fetch_identity().await {
                Ok(identity) => {
                    if session.apply_identity(generation, identity.clone()) {
                        debug!(user = %identity.display_name, "Identity attached to session");
                        Some(identity)
                    } else {
                        debug!("Session changed while fetching identity, discarding it");
                        None
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to fetch identity");
                    None
                }
            }
        })
    }

    /// Call the login endpoint with `payload`, then log in with the credential it returns.
    pub async fn sign_in<B: Serialize + ?Sized>(
        &self,
        payload: &B,
        remember_session: bool,
    ) -> Result<JoinHandle<Option<Identity>>, ApiError> {
        let response = self.api.authenticate(payload).await?;
        if !response.credential_type.eq_ignore_ascii_case("bearer") {
            warn!(credential_type = %response.credential_type, "Unexpected credential type, sending as bearer");
        }
        Ok(self.login(response.credential, remember_session))
    }

    pub fn logout(&self) -> bool {
        self.session.logout()
    }

    pub fn set_remember_session(&self, remember_session: bool) {
        self.session.set_remember_session(remember_session);
    }

    pub fn is_expired(&self) -> bool {
        self.session.is_expired()
    }

    pub fn credential(&self) -> Option<String> {
        self.session.credential()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    pub fn snapshot(&self) -> SessionData {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionData> {
        self.session.subscribe()
    }

    /// A fresh guard for one protected view
    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(Arc::clone(&self.session), self.guard.clone())
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }
}
