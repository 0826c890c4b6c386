//! Access/refresh token lifecycle.
//!
//! The session state is never stored as such. It is derived on demand from the
//! session store and the clock:
//!
//! - `NoSession`: nothing stored
//! - `Active`: stored and the access token expiry is in the future
//! - `Expired`: stored and the access token expiry has passed
//!
//! After every login or refresh a renewal task is scheduled to run
//! `refresh_buffer` before the new access token expires. At most one renewal
//! task is pending at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::models::TokenPair;

use super::clock::{Clock, SystemClock};
use super::error::AuthError;
use super::navigator::{LogNavigator, Navigator};
use super::scheduler::{Scheduler, Task, TaskHandle, TokioScheduler};
use super::store::{SessionRecord, SessionStore};
use super::token;

/// Renew this long before the access token expires
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active,
    Expired,
}

/// Handle to the session manager. Clone is cheap and all clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    api: ApiClient,
    store: Arc<dyn SessionStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    navigator: Arc<dyn Navigator>,
    refresh_buffer: Duration,
    renewal: Mutex<Option<TaskHandle>>,
    // Serializes login, refresh and logout
    session_lock: tokio::sync::Mutex<()>,
    // Bumped on every committed session change
    generation: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pending = self
            .renewal
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = pending {
            self.scheduler.cancel(handle);
        }
    }
}

pub struct SessionManagerBuilder {
    api: ApiClient,
    store: Arc<dyn SessionStore>,
    scheduler: Option<Arc<dyn Scheduler>>,
    clock: Option<Arc<dyn Clock>>,
    navigator: Option<Arc<dyn Navigator>>,
    refresh_buffer: Duration,
    eager_refresh: bool,
}

impl SessionManagerBuilder {
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Whether to refresh once right after construction (default: on).
    /// A pending renewal does not survive a restart; this re-arms it.
    pub fn eager_refresh(mut self, enabled: bool) -> Self {
        self.eager_refresh = enabled;
        self
    }

    /// Build the manager. With the default `TokioScheduler` and eager refresh
    /// enabled this must be called from within a tokio runtime.
    pub fn build(self) -> SessionManager {
        let manager = SessionManager {
            inner: Arc::new(Inner {
                api: self.api,
                store: self.store,
                scheduler: self
                    .scheduler
                    .unwrap_or_else(|| Arc::new(TokioScheduler::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                navigator: self.navigator.unwrap_or_else(|| Arc::new(LogNavigator)),
                refresh_buffer: self.refresh_buffer,
                renewal: Mutex::new(None),
                session_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        };

        if self.eager_refresh {
            debug!("Scheduling startup refresh");
            manager.arm_renewal(std::time::Duration::ZERO);
        }

        manager
    }
}

/// The deferred refresh. Holds only a weak reference so a pending renewal
/// does not keep a dropped manager alive.
///
/// `armed_at` is the session generation the renewal was scheduled for. A
/// renewal that already fired cannot be cancelled, so it checks the
/// generation itself and does nothing once a login, refresh or logout has
/// committed since.
fn renewal_task(inner: Weak<Inner>, armed_at: u64) -> Task {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let manager = SessionManager { inner };
        if let Err(e) = manager.renew(armed_at).await {
            warn!(error = %e, "Scheduled token renewal failed");
        }
    })
}

impl SessionManager {
    pub fn builder(api: ApiClient, store: Arc<dyn SessionStore>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            api,
            store,
            scheduler: None,
            clock: None,
            navigator: None,
            refresh_buffer: Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
            eager_refresh: true,
        }
    }

    /// The API client this manager authenticates against
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.inner.refresh_buffer
    }

    fn commit(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Authenticate and start a new session.
    ///
    /// Nothing is written unless the server accepts the credentials and the
    /// returned access token decodes.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let _guard = self.inner.session_lock.lock().await;

        let tokens = self
            .inner
            .api
            .login(email, password)
            .await
            .map_err(AuthError::from_login)?;
        let claims = token::decode(&tokens.access_token)?;

        self.inner.store.set(&SessionRecord {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_token_expiry: claims.expiry,
        })?;
        self.commit();
        self.schedule_renewal(claims.expiry);

        info!(expiry = %claims.expiry, "Logged in");
        Ok(tokens)
    }

    /// End the session.
    ///
    /// The server is asked to invalidate the refresh token, then the local
    /// session is cleared and renewal cancelled whatever the server said. A
    /// failed server call is still reported to the caller.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.inner.session_lock.lock().await;

        let refresh_token = self.inner.store.refresh_token().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read refresh token for logout");
            None
        });
        let remote = self.inner.api.logout(refresh_token.as_deref()).await;

        self.cancel_renewal();
        let cleared = self.inner.store.clear();
        self.commit();

        match remote {
            Ok(()) => info!("Logged out"),
            Err(ref e) => warn!(error = %e, "Server logout failed, local session cleared anyway"),
        }
        remote.map_err(AuthError::from_session_call)?;
        cleared?;
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Without a refresh token the user is sent to login, and the server is
    /// still asked (with a `null` token). A failed refresh leaves the stored
    /// session as it was.
    ///
    /// Concurrent calls are serialized. A call that waited while another
    /// login or refresh committed a new access token returns that token
    /// without asking the server again.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let observed = self.inner.generation.load(Ordering::SeqCst);
        let _guard = self.inner.session_lock.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != observed {
            if let Some(access_token) = self.inner.store.access_token()? {
                debug!("Session changed while waiting, reusing the new access token");
                return Ok(access_token);
            }
        }

        self.refresh_locked().await
    }

    async fn renew(&self, armed_at: u64) -> Result<(), AuthError> {
        let _guard = self.inner.session_lock.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != armed_at {
            debug!("Session changed since renewal was scheduled, skipping");
            return Ok(());
        }

        self.refresh_locked().await.map(|_| ())
    }

    /// Caller must hold `session_lock`
    async fn refresh_locked(&self) -> Result<String, AuthError> {
        let refresh_token = self.inner.store.refresh_token()?;
        if refresh_token.is_none() {
            warn!("No refresh token stored, redirecting to login");
            self.inner.navigator.navigate_to_login();
        }

        let access_token = self
            .inner
            .api
            .refresh_token(refresh_token.as_deref())
            .await
            .map_err(AuthError::from_session_call)?;
        let claims = token::decode(&access_token)?;

        self.inner
            .store
            .update_access_token(&access_token, claims.expiry)?;
        self.commit();
        self.schedule_renewal(claims.expiry);

        info!(expiry = %claims.expiry, "Access token refreshed");
        Ok(access_token)
    }

    /// Schedule a refresh `refresh_buffer` before `expiry`, replacing any
    /// pending renewal. Runs immediately if that moment has already passed.
    pub fn schedule_renewal(&self, expiry: DateTime<Utc>) {
        let delay = (expiry - self.inner.clock.now()) - self.inner.refresh_buffer;
        let delay = delay.to_std().unwrap_or(std::time::Duration::ZERO);
        debug!(%expiry, delay_secs = delay.as_secs(), "Scheduling token renewal");
        self.arm_renewal(delay);
    }

    fn arm_renewal(&self, delay: std::time::Duration) {
        let armed_at = self.inner.generation.load(Ordering::SeqCst);
        let task = renewal_task(Arc::downgrade(&self.inner), armed_at);
        let mut slot = self.inner.renewal.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            self.inner.scheduler.cancel(previous);
        }
        *slot = Some(self.inner.scheduler.schedule(delay, task));
    }

    /// Cancel the pending renewal, if any.
    pub fn cancel_renewal(&self) {
        let pending = self
            .inner
            .renewal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = pending {
            self.inner.scheduler.cancel(handle);
            debug!("Token renewal cancelled");
        }
    }

    pub fn state(&self) -> SessionState {
        match self.inner.store.get() {
            Ok(Some(record)) if record.access_token_expiry > self.inner.clock.now() => {
                SessionState::Active
            }
            Ok(Some(_)) => SessionState::Expired,
            Ok(None) => SessionState::NoSession,
            Err(e) => {
                warn!(error = %e, "Failed to read session, treating as absent");
                SessionState::NoSession
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn is_expired(&self) -> bool {
        self.state() == SessionState::Expired
    }

    pub fn access_token_expiration(&self) -> Option<DateTime<Utc>> {
        match self.inner.store.get() {
            Ok(record) => record.map(|r| r.access_token_expiry),
            Err(e) => {
                warn!(error = %e, "Failed to read session");
                None
            }
        }
    }
}
