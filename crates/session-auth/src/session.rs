//! Session management with FSM-based state tracking and single-flight refresh.
//!
//! `SessionManager` is the one owner of the session: its state machine, the
//! current identity, and the persisted token pair. It is a cheap `Clone` handle
//! over shared state and is meant to be created once per process and passed
//! to whoever needs it.

use crate::authenticator::{Authenticator, Credentials, RefreshedTokens};
use crate::claims::TokenClaims;
use crate::session_fsm::{
    RefreshConfig, SessionMachine, SessionMachineInput, SessionState, SessionStateChanged,
    SessionStatus,
};
use crate::transport::{ApiTransport, HttpTransport};
use crate::validation::RegistrationProfile;
use crate::{AuthError, AuthResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use leadgen_config::{Config, Paths};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use token_store::{TokenPair, TokenStore, UserIdentity};
use tracing::{debug, info, warn};

/// Callback type for session state change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

type RefreshFuture = Shared<BoxFuture<'static, Result<String, Arc<AuthError>>>>;

/// The in-flight refresh every concurrent 401 waits on.
struct PendingRefresh {
    id: u64,
    epoch: u64,
    future: RefreshFuture,
}

/// Mutable session state, guarded by one lock so that transitions, the
/// identity, the epoch, and token store writes change together.
struct SessionSlot {
    machine: SessionMachine,
    user: Option<UserIdentity>,
    /// Bumped on every local teardown. Async completions carrying an older
    /// epoch are discarded.
    epoch: u64,
    /// Set once the startup restore has run or been superseded.
    initialized: bool,
}

impl SessionSlot {
    fn status(&self) -> SessionStatus {
        SessionStatus::from(self.machine.state())
    }

    fn consume(&mut self, input: &SessionMachineInput) -> AuthResult<()> {
        self.machine.consume(input).map(|_| ()).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                self.machine.state()
            ))
        })
    }

    fn payload(&self) -> SessionStateChanged {
        SessionStateChanged {
            state: self.status(),
            user_id: self
                .user
                .as_ref()
                .and_then(|u| u.id.as_ref())
                .map(|id| id.to_string()),
            username: self.user.as_ref().map(|u| u.display_name().to_string()),
        }
    }
}

struct Inner {
    store: TokenStore,
    authenticator: Authenticator,
    refresh_config: RefreshConfig,
    session: Mutex<SessionSlot>,
    pending_refresh: Mutex<Option<PendingRefresh>>,
    next_refresh_id: AtomicU64,
    closed: AtomicBool,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

/// Session manager.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a new session manager. The session starts in `Authenticating`
    /// until [`initialize`](Self::initialize) consults the store.
    pub fn new(store: TokenStore, authenticator: Authenticator) -> Self {
        Self::with_refresh_config(store, authenticator, RefreshConfig::default())
    }

    /// Create a new session manager with custom refresh configuration.
    pub fn with_refresh_config(
        store: TokenStore,
        authenticator: Authenticator,
        refresh_config: RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                authenticator,
                refresh_config,
                session: Mutex::new(SessionSlot {
                    machine: SessionMachine::new(),
                    user: None,
                    epoch: 0,
                    initialized: false,
                }),
                pending_refresh: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                state_callback: Mutex::new(None),
            }),
        }
    }

    /// Build the production stack: HTTP transport and file-backed store.
    ///
    /// Returns the transport too, so an `AuthorizedClient` can share it.
    pub fn from_config(
        config: &Config,
        paths: &Paths,
    ) -> AuthResult<(Self, Arc<dyn ApiTransport>)> {
        let transport: Arc<dyn ApiTransport> = Arc::new(HttpTransport::from_config(config)?);
        let authenticator = Authenticator::from_config(transport.clone(), config);
        let store = token_store::create_token_store(paths);
        let manager = Self::with_refresh_config(store, authenticator, RefreshConfig::from(config));
        Ok((manager, transport))
    }

    /// Set a callback to be notified of session state changes.
    ///
    /// The callback runs on the thread that caused the change and must not
    /// call back into `set_state_callback`.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.inner.state_callback.lock() = Some(callback);
    }

    /// Current state, with the identity when authenticated.
    pub fn state(&self) -> SessionState {
        let slot = self.inner.session.lock();
        match slot.status() {
            SessionStatus::Unauthenticated => SessionState::Unauthenticated,
            SessionStatus::Authenticating => SessionState::Authenticating,
            SessionStatus::Refreshing => SessionState::Refreshing,
            SessionStatus::Authenticated => match &slot.user {
                Some(user) => SessionState::Authenticated(user.clone()),
                None => SessionState::Unauthenticated,
            },
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.session.lock().status()
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.inner.session.lock().user.clone()
    }

    /// True while a login or the startup restore is in progress.
    pub fn is_loading(&self) -> bool {
        self.status() == SessionStatus::Authenticating
    }

    /// True while a token pair is live, including during a refresh.
    pub fn is_authenticated(&self) -> bool {
        let slot = self.inner.session.lock();
        slot.status().has_session() && slot.user.is_some()
    }

    /// Access token to attach to the next request.
    pub fn access_token(&self) -> Option<String> {
        self.inner.store.load().map(|pair| pair.access_token)
    }

    /// Access token for an outgoing request, with the epoch of the session
    /// it belongs to. Hand both back to `refresh_access_token` on a 401.
    pub(crate) fn request_token(&self) -> Option<(String, u64)> {
        let slot = self.inner.session.lock();
        self.inner
            .store
            .load()
            .map(|pair| (pair.access_token, slot.epoch))
    }

    /// Claims of the stored access token, for display purposes only.
    pub fn access_token_claims(&self) -> Option<TokenClaims> {
        self.access_token()
            .and_then(|token| TokenClaims::decode(&token))
    }

    fn ensure_open(&self) -> AuthResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AuthError::SessionClosed);
        }
        Ok(())
    }

    /// Run `f` under the session lock and notify the callback if the state changed.
    fn with_session<T>(&self, f: impl FnOnce(&mut SessionSlot) -> AuthResult<T>) -> AuthResult<T> {
        let (result, change) = self.with_session_deferred(f);
        self.announce(change);
        result
    }

    /// Like `with_session`, but hands the state change back to the caller so
    /// it can be announced once other locks are released.
    fn with_session_deferred<T>(
        &self,
        f: impl FnOnce(&mut SessionSlot) -> AuthResult<T>,
    ) -> (AuthResult<T>, Option<StateChange>) {
        let mut slot = self.inner.session.lock();
        let old_state = slot.status();
        let result = f(&mut slot);
        let change = (old_state != slot.status()).then(|| StateChange {
            old_state,
            payload: slot.payload(),
        });
        (result, change)
    }

    fn announce(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        debug!(
            old_state = ?change.old_state,
            new_state = ?change.payload.state,
            "Session state transition"
        );

        let cb = self.inner.state_callback.lock();
        if let Some(callback) = cb.as_ref() {
            callback(change.payload);
        }
    }

    /// Drop the local session: clear the store and identity, bump the epoch,
    /// and apply `input` unless already unauthenticated. Returns the token
    /// pair that was stored, if any.
    fn teardown(&self, slot: &mut SessionSlot, input: &SessionMachineInput) -> Option<TokenPair> {
        let pair = self.inner.store.load();
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        slot.user = None;
        slot.epoch += 1;
        slot.initialized = true;

        if slot.status() != SessionStatus::Unauthenticated {
            if let Err(e) = slot.consume(input) {
                warn!(error = %e, "Unexpected state during teardown");
            }
        }
        pair
    }

    /// Restore the session persisted by a previous run.
    ///
    /// Makes no network call. A stored token pair with a derivable identity
    /// (cached, else from the access token claims) is trusted provisionally;
    /// the first authorized request revalidates it. Anything less is cleared.
    pub fn initialize(&self) -> AuthResult<SessionState> {
        self.ensure_open()?;

        self.with_session(|slot| {
            if slot.initialized {
                return Ok(());
            }
            slot.initialized = true;

            let restored = self.inner.store.load().and_then(|pair| {
                self.inner.store.load_identity().or_else(|| {
                    TokenClaims::decode(&pair.access_token).and_then(|claims| claims.identity())
                })
            });

            match restored {
                Some(user) => {
                    info!(user = %user.display_name(), "Restored persisted session");
                    slot.user = Some(user);
                    slot.consume(&SessionMachineInput::SessionRestored)
                }
                None => {
                    if let Err(e) = self.inner.store.clear() {
                        warn!(error = %e, "Failed to clear incomplete session");
                    }
                    info!("No persisted session found");
                    slot.consume(&SessionMachineInput::NoSession)
                }
            }
        })?;

        Ok(self.state())
    }

    /// Log in with credentials.
    ///
    /// An existing session is torn down locally first. On success the token
    /// pair is persisted; the identity is persisted only when `remember` is set.
    pub async fn login(&self, credentials: Credentials, remember: bool) -> AuthResult<UserIdentity> {
        self.ensure_open()?;

        let epoch = self.with_session(|slot| {
            if slot.status().has_session() {
                info!("Replacing existing session");
                self.teardown(slot, &SessionMachineInput::Logout);
            } else if !slot.initialized {
                // Logging in before the startup restore replaces whatever was stored
                self.teardown(slot, &SessionMachineInput::Logout);
            }
            slot.consume(&SessionMachineInput::LoginAttempt)?;
            Ok(slot.epoch)
        })?;
        self.inner.pending_refresh.lock().take();
        let mut attempt = LoginAttempt {
            manager: self,
            epoch,
            settled: false,
        };

        let result = self.inner.authenticator.login(&credentials).await;

        if self.inner.closed.load(Ordering::SeqCst) {
            debug!("Discarding login result after shutdown");
            return Err(AuthError::SessionClosed);
        }

        attempt.settled = true;
        self.with_session(|slot| {
            if slot.epoch != epoch {
                debug!("Discarding login result after logout");
                return Err(AuthError::NotLoggedIn);
            }

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Login failed");
                    slot.consume(&SessionMachineInput::LoginFailed)?;
                    return Err(e);
                }
            };

            if let Err(e) = self
                .inner
                .store
                .save(&outcome.tokens, Some(&outcome.user), remember)
            {
                warn!(error = %e, "Failed to persist session");
                let _ = self.inner.store.clear();
                slot.consume(&SessionMachineInput::LoginFailed)?;
                return Err(e.into());
            }

            slot.user = Some(outcome.user.clone());
            slot.consume(&SessionMachineInput::LoginSuccess)?;
            info!(user = %outcome.user.display_name(), remember, "Login successful");
            Ok(outcome.user)
        })
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, profile: &RegistrationProfile) -> AuthResult<UserIdentity> {
        self.ensure_open()?;
        let user = self.inner.authenticator.register(profile).await?;
        info!(user = %user.display_name(), "Account registered");
        Ok(user)
    }

    /// Create an account, then log in with the same username and password.
    pub async fn register_and_login(
        &self,
        profile: &RegistrationProfile,
        remember: bool,
    ) -> AuthResult<UserIdentity> {
        self.register(profile).await?;
        let credentials = Credentials::new(profile.username.trim(), profile.password.clone());
        self.login(credentials, remember).await
    }

    /// End the session locally. Safe to call repeatedly.
    ///
    /// If a revoke endpoint is configured, the refresh token is revoked on a
    /// detached task; the outcome is only logged.
    pub fn logout(&self) {
        let pair = self
            .with_session(|slot| Ok(self.teardown(slot, &SessionMachineInput::Logout)))
            .ok()
            .flatten();
        self.inner.pending_refresh.lock().take();
        info!("Logged out");

        if let Some(pair) = pair {
            self.spawn_revoke(pair.refresh_token);
        }
    }

    fn spawn_revoke(&self, refresh_token: String) {
        if !self.inner.authenticator.has_revoke_endpoint() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, skipping token revocation");
            return;
        };

        let manager = self.clone();
        handle.spawn(async move {
            match manager.inner.authenticator.revoke(&refresh_token).await {
                Ok(()) => debug!("Refresh token revoked"),
                Err(e) => warn!(error = %e, "Failed to revoke refresh token"),
            }
        });
    }

    /// Stop accepting work. Late login and refresh completions become no-ops.
    /// The persisted session is kept for the next run.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.pending_refresh.lock().take();
        info!("Session manager shut down");
    }

    /// Obtain a fresh access token after `rejected`, issued in session
    /// `epoch`, was refused with a 401.
    ///
    /// Concurrent callers share a single refresh. If `rejected` has already
    /// been replaced by a completed refresh in the same session, the current
    /// token is returned without refreshing again. A token from an earlier
    /// session gets `NotLoggedIn`.
    pub(crate) async fn refresh_access_token(
        &self,
        rejected: &str,
        epoch: u64,
    ) -> Result<String, Arc<AuthError>> {
        self.ensure_open()?;

        match self.join_or_start_refresh(rejected, epoch) {
            RefreshJoin::Wait(future) => future.await,
            RefreshJoin::Done(result) => result,
        }
    }

    /// Join the in-flight refresh, or register a new one.
    fn join_or_start_refresh(&self, rejected: &str, epoch: u64) -> RefreshJoin {
        let mut pending = self.inner.pending_refresh.lock();
        if let Some(existing) = pending.as_ref().filter(|p| p.epoch == epoch) {
            return RefreshJoin::Wait(existing.future.clone());
        }

        let (start, change) =
            self.with_session_deferred(|slot| self.begin_refresh(slot, rejected, epoch));
        let join = match start {
            Ok(RefreshStart::Started {
                epoch,
                refresh_token,
            }) => {
                let id = self.inner.next_refresh_id.fetch_add(1, Ordering::SeqCst);
                let manager = self.clone();
                let future = async move { manager.run_refresh(id, epoch, refresh_token).await }
                    .boxed()
                    .shared();
                *pending = Some(PendingRefresh {
                    id,
                    epoch,
                    future: future.clone(),
                });
                RefreshJoin::Wait(future)
            }
            Ok(RefreshStart::Superseded(current)) => RefreshJoin::Done(Ok(current)),
            Err(e) => RefreshJoin::Done(Err(Arc::new(e))),
        };
        drop(pending);

        // Callbacks may call back into the manager, so announce without locks held
        self.announce(change);
        join
    }

    /// Decide whether a refresh is needed and enter `Refreshing` if so.
    fn begin_refresh(
        &self,
        slot: &mut SessionSlot,
        rejected: &str,
        epoch: u64,
    ) -> AuthResult<RefreshStart> {
        if !slot.status().has_session() {
            return Err(AuthError::NotLoggedIn);
        }
        if slot.epoch != epoch {
            debug!("Rejected token belongs to a previous session");
            return Err(AuthError::NotLoggedIn);
        }

        let Some(pair) = self.inner.store.load() else {
            warn!("Access token rejected and no refresh token stored, ending session");
            self.teardown(slot, &SessionMachineInput::Logout);
            return Err(AuthError::SessionExpired);
        };

        if pair.access_token != rejected {
            debug!("Rejected token already replaced, retrying with current token");
            return Ok(RefreshStart::Superseded(pair.access_token));
        }

        if slot.status() == SessionStatus::Authenticated {
            slot.consume(&SessionMachineInput::TokenExpired)?;
        }
        info!("Access token rejected, refreshing");
        Ok(RefreshStart::Started {
            epoch: slot.epoch,
            refresh_token: pair.refresh_token,
        })
    }

    async fn run_refresh(
        self,
        id: u64,
        epoch: u64,
        refresh_token: String,
    ) -> Result<String, Arc<AuthError>> {
        let result = self.refresh_with_backoff(epoch, &refresh_token).await;
        let outcome = self.complete_refresh(epoch, result);

        let mut pending = self.inner.pending_refresh.lock();
        if pending.as_ref().is_some_and(|p| p.id == id) {
            pending.take();
        }
        drop(pending);

        outcome.map_err(Arc::new)
    }

    /// Refresh with exponential backoff on transient failures.
    async fn refresh_with_backoff(&self, epoch: u64, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        let attempts = self.inner.refresh_config.attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.inner.authenticator.refresh(refresh_token).await {
                Ok(tokens) => return Ok(tokens),
                Err(e) if e.is_transient() => {
                    last_error = Some(e);

                    if attempt + 1 < attempts {
                        let still_current = self.with_session(|slot| {
                            if slot.epoch != epoch || self.inner.closed.load(Ordering::SeqCst) {
                                return Ok(false);
                            }
                            slot.consume(&SessionMachineInput::RefreshRetry)?;
                            Ok(true)
                        });
                        if !matches!(still_current, Ok(true)) {
                            break;
                        }

                        let delay = self.inner.refresh_config.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed with non-transient error");
                    return Err(e);
                }
            }
        }

        warn!(attempts, "Refresh failed after all attempts");
        Err(last_error.unwrap_or(AuthError::SessionExpired))
    }

    /// Apply a refresh result, unless the session it belongs to is gone.
    fn complete_refresh(&self, epoch: u64, result: AuthResult<RefreshedTokens>) -> AuthResult<String> {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!("Discarding refresh result after shutdown");
            return Err(AuthError::SessionClosed);
        }

        self.with_session(|slot| {
            if slot.epoch != epoch {
                debug!("Discarding refresh result from a previous session");
                return Err(AuthError::NotLoggedIn);
            }

            let tokens = match result {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(error = %e, "Session expired, logging out");
                    self.teardown(slot, &SessionMachineInput::RefreshFailed);
                    return Err(e);
                }
            };

            if let Err(e) = self
                .inner
                .store
                .update_access_token(&tokens.access, tokens.refresh.as_deref())
            {
                warn!(error = %e, "Failed to persist refreshed token, logging out");
                self.teardown(slot, &SessionMachineInput::RefreshFailed);
                return Err(e.into());
            }

            slot.consume(&SessionMachineInput::RefreshSuccess)?;
            info!(rotated = tokens.refresh.is_some(), "Access token refreshed");
            Ok(tokens.access)
        })
    }
}

/// Fails a login attempt whose future is dropped before the exchange completes.
struct LoginAttempt<'a> {
    manager: &'a SessionManager,
    epoch: u64,
    settled: bool,
}

impl Drop for LoginAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let epoch = self.epoch;
        let result = self.manager.with_session(|slot| {
            if slot.epoch == epoch && slot.status() == SessionStatus::Authenticating {
                debug!("Login abandoned before completion");
                slot.consume(&SessionMachineInput::LoginFailed)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to reset abandoned login");
        }
    }
}

struct StateChange {
    old_state: SessionStatus,
    payload: SessionStateChanged,
}

enum RefreshJoin {
    Wait(RefreshFuture),
    Done(Result<String, Arc<AuthError>>),
}

enum RefreshStart {
    /// The rejected token was already replaced; retry with this one.
    Superseded(String),
    Started { epoch: u64, refresh_token: String },
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
