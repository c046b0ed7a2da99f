//! The session manager.
//!
//! Owns the session state machine, the persisted credential, the renewal
//! timer, and the observer registry. All state writes go through one lock
//! and observers are notified after it is released, so concurrent
//! operations see writes in completion order and never mid-mutation.

use crate::api::{IdentityApi, RegistrationRequest};
use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;
use crate::observer::{ObserverRegistry, Subscription};
use crate::renewal::{SingleFlight, TimerSlot};
use crate::retry::with_retry;
use crate::session_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::state::{AuthOutcome, SessionState};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Machine and observable snapshot, updated together under one lock.
struct EngineCore {
    machine: SessionMachine,
    state: SessionState,
}

struct Inner {
    api: Arc<dyn IdentityApi>,
    store: credential_store::CredentialStore,
    config: SessionConfig,
    core: Mutex<EngineCore>,
    observers: Arc<ObserverRegistry>,
    timer: TimerSlot,
    flight: Arc<SingleFlight>,
    /// Bumped on every successful login and every logout. A refresh only
    /// applies its result if the generation it started under is still
    /// current, so a stale renewal can never resurrect a cleared session.
    generation: AtomicU64,
    /// Consecutive renewal failures since the last success.
    refresh_retries: AtomicU32,
    bootstrapped: AtomicBool,
}

/// Client-side session manager.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a session manager over the given identity API and store.
    pub fn new(
        api: Arc<dyn IdentityApi>,
        store: credential_store::CredentialStore,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                config,
                core: Mutex::new(EngineCore {
                    machine: SessionMachine::new(),
                    state: SessionState::new(),
                }),
                observers: Arc::new(ObserverRegistry::new()),
                timer: TimerSlot::new(),
                flight: Arc::new(SingleFlight::new()),
                generation: AtomicU64::new(0),
                refresh_retries: AtomicU32::new(0),
                bootstrapped: AtomicBool::new(false),
            }),
        }
    }

    /// Production wiring: HTTP identity API from the environment-derived
    /// config, credential file under the home directory.
    pub fn from_env() -> AuthResult<Self> {
        let config = SessionConfig::from_env();
        config.api_url()?;
        let api = Arc::new(crate::api::HttpIdentityApi::new(config.base_url.clone()));
        let store = credential_store::create_store()?;
        Ok(Self::new(api, store, config))
    }

    /// Register an observer for state changes.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.inner.observers.add(observer);
        Subscription::new(Arc::clone(&self.inner.observers), id)
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.lock_core().state.clone()
    }

    /// Synchronous authentication check; never touches the network.
    pub fn is_authenticated(&self) -> bool {
        let core = self.lock_core();
        core.state.phase.is_authenticated() && core.state.credential.is_some()
    }

    /// Restore the session from the persisted credential.
    ///
    /// Run once at process start; later calls return the current snapshot
    /// without doing any work. A missing or rejected stored credential is
    /// expected on a fresh start and settles to `Anonymous` with no error.
    pub async fn init(&self) -> SessionState {
        if self.inner.bootstrapped.swap(true, Ordering::SeqCst) {
            debug!("init() already ran, returning current state");
            return self.state();
        }

        if let Err(e) = self.transition(&SessionMachineInput::OperationStarted, |_| {}) {
            warn!(error = %e, "Could not enter loading state on init");
            return self.state();
        }

        let stored = match self.inner.store.get_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Could not read persisted credential");
                None
            }
        };

        let token = match stored {
            Some(token) => token,
            None => {
                info!("No persisted credential, starting anonymous");
                self.settle_anonymous(None);
                return self.state();
            }
        };

        let api = Arc::clone(&self.inner.api);
        let result = with_retry(&self.inner.config.retry, "validate_credential", || {
            let api = Arc::clone(&api);
            let token = token.clone();
            async move { api.fetch_identity(&token).await }
        })
        .await;

        match result {
            Ok(payload) => {
                let identity = Identity::from_payload(&payload);
                info!(user_id = %identity.id, "Session restored from persisted credential");
                self.settle_authenticated(identity, token);
                self.arm_renewal_timer();
            }
            Err(e) => {
                // Expired credentials are routine on startup; clear quietly.
                info!(error = %e, "Persisted credential rejected, clearing");
                if let Err(store_err) = self.inner.store.clear() {
                    warn!(error = %store_err, "Could not clear rejected credential");
                }
                self.settle_anonymous(None);
            }
        }
        self.state()
    }

    /// Create an account and sign in with the same credentials.
    ///
    /// Registration alone yields no credential, so a successful submission
    /// is followed by a login round-trip. Never panics or propagates raw
    /// transport errors; always settles into an [`AuthOutcome`].
    pub async fn register(&self, request: RegistrationRequest) -> AuthOutcome {
        if let Err(e) = self.transition(&SessionMachineInput::OperationStarted, |_| {}) {
            return AuthOutcome::failure(&e);
        }

        // Fire-once: resubmitting a registration has side effects.
        let payload = match self.inner.api.register(&request).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Registration failed");
                self.settle_anonymous(Some(&e));
                return AuthOutcome::failure(&e);
            }
        };

        let registered = Identity::from_payload(&payload);
        if !registered.has_id() {
            let e = AuthError::Unknown("registration response carried no identity id".to_string());
            warn!("Registration response carried no identity id");
            self.settle_anonymous(Some(&e));
            return AuthOutcome::failure(&e);
        }

        info!(user_id = %registered.id, "Registration succeeded, signing in");
        match self.complete_login(&request.email, &request.password).await {
            Ok(identity) => AuthOutcome::ok(Some(identity)),
            Err(e) => AuthOutcome::failure(&e),
        }
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> AuthOutcome {
        if let Err(e) = self.transition(&SessionMachineInput::OperationStarted, |_| {}) {
            return AuthOutcome::failure(&e);
        }
        match self.complete_login(email, password).await {
            Ok(identity) => AuthOutcome::ok(Some(identity)),
            Err(e) => AuthOutcome::failure(&e),
        }
    }

    /// Token exchange plus identity fetch, assuming the machine is already
    /// in `Loading`. On failure the stored credential is left untouched.
    async fn complete_login(&self, email: &str, password: &str) -> AuthResult<Identity> {
        // Fire-once: a failed credential submission surfaces immediately.
        let token_response = match self.inner.api.login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.settle_anonymous(Some(&e));
                return Err(e);
            }
        };
        let token = token_response.access_token;

        // The token response does not carry the full profile; fetch it.
        let api = Arc::clone(&self.inner.api);
        let result = with_retry(&self.inner.config.retry, "fetch_identity", || {
            let api = Arc::clone(&api);
            let token = token.clone();
            async move { api.fetch_identity(&token).await }
        })
        .await;

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Identity fetch after login failed");
                self.settle_anonymous(Some(&e));
                return Err(e);
            }
        };
        let identity = Identity::from_payload(&payload);

        if let Err(e) = self.inner.store.set_token(&token) {
            // The in-memory session still works; only restarts lose it.
            warn!(error = %e, "Could not persist credential");
        }

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh_retries.store(0, Ordering::SeqCst);

        info!(user_id = %identity.id, "Login successful");
        self.settle_authenticated(identity.clone(), token);
        self.arm_renewal_timer();
        Ok(identity)
    }

    /// Sign out.
    ///
    /// The server is notified best-effort; client-side teardown happens
    /// unconditionally, so logout always succeeds and is idempotent.
    pub async fn logout(&self) -> AuthOutcome {
        let token = self
            .lock_core()
            .state
            .credential
            .clone()
            .or_else(|| self.inner.store.get_token().ok().flatten());

        if let Some(token) = token {
            if let Err(e) = self.inner.api.logout(&token).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        self.clear_session(None);
        info!("Logged out");
        AuthOutcome::ok(None)
    }

    /// Update onboarding progress on the current identity.
    ///
    /// Requires an existing credential. A failed update leaves the session
    /// authenticated; it only records the error.
    pub async fn update_onboarding(
        &self,
        step: i64,
        form_data: Option<Value>,
        completed: bool,
    ) -> AuthOutcome {
        let token = match self.lock_core().state.credential.clone() {
            Some(token) => token,
            None => {
                let e = AuthError::Authentication(
                    "no credential held; sign in before updating onboarding".to_string(),
                );
                return AuthOutcome::failure(&e);
            }
        };

        if let Err(e) = self.transition(&SessionMachineInput::OperationStarted, |_| {}) {
            return AuthOutcome::failure(&e);
        }

        let mut fields = match form_data {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        fields["onboarding_step"] = json!(step);
        fields["onboarding_completed"] = json!(completed);

        let api = Arc::clone(&self.inner.api);
        let result = with_retry(&self.inner.config.retry, "update_identity", || {
            let api = Arc::clone(&api);
            let token = token.clone();
            let fields = fields.clone();
            async move { api.update_identity(&token, &fields).await }
        })
        .await;

        match result {
            Ok(payload) => {
                let identity = Identity::from_payload(&payload);
                debug!(step = step, completed = completed, "Onboarding updated");
                self.settle_authenticated(identity.clone(), token);
                AuthOutcome::ok(Some(identity))
            }
            Err(e) => {
                // An update failure is not proof the session is invalid.
                warn!(error = %e, "Onboarding update failed, keeping session");
                if let Err(t) = self.transition(&SessionMachineInput::AuthConfirmed, |state| {
                    state.last_error = Some(e.to_string());
                    state.last_error_kind = Some(e.kind());
                }) {
                    warn!(error = %t, "Could not settle after failed update");
                }
                AuthOutcome::failure(&e)
            }
        }
    }

    /// Renew the credential now, joining any renewal already in flight.
    ///
    /// Returns true if the renewal applied. Safe to call concurrently with
    /// the timer; both callers share one network round-trip.
    pub async fn refresh_now(&self) -> bool {
        let this = self.clone();
        Arc::clone(&self.inner.flight)
            .run(move || this.run_refresh())
            .await
    }

    /// One renewal pass: re-validate the held credential, apply the fresh
    /// identity, and re-arm the timer. Results are discarded if the session
    /// generation changed while the call was in flight.
    ///
    /// Boxed because the retry arm schedules a task that calls back into
    /// `refresh_now`; type erasure keeps the future type finite.
    fn run_refresh(self) -> BoxFuture<'static, bool> {
        async move {
            let generation = self.inner.generation.load(Ordering::SeqCst);
            let token = match self.lock_core().state.credential.clone() {
                Some(token) => token,
                None => {
                    debug!("No credential held, skipping renewal");
                    return false;
                }
            };

            let api = Arc::clone(&self.inner.api);
            let result = with_retry(&self.inner.config.retry, "renew_credential", || {
                let api = Arc::clone(&api);
                let token = token.clone();
                async move { api.fetch_identity(&token).await }
            })
            .await;

            if self.inner.generation.load(Ordering::SeqCst) != generation {
                debug!("Session changed while renewing, discarding result");
                return false;
            }

            match result {
                Ok(payload) => {
                    let identity = Identity::from_payload(&payload);
                    self.inner.refresh_retries.store(0, Ordering::SeqCst);
                    debug!(user_id = %identity.id, "Credential renewed");

                    // Already authenticated; update the identity in place.
                    let snapshot = {
                        let mut core = self.lock_core();
                        core.state.identity = Some(identity);
                        core.state.last_error = None;
                        core.state.last_error_kind = None;
                        core.state.clone()
                    };
                    self.inner.observers.notify(&snapshot);
                    self.arm_renewal_timer();
                    true
                }
                Err(e) => {
                    let retries = self.inner.refresh_retries.fetch_add(1, Ordering::SeqCst) + 1;
                    if retries >= self.inner.config.refresh_max_retries {
                        warn!(
                            retries = retries,
                            error = %e,
                            "Renewal retries exhausted, tearing down session"
                        );
                        self.clear_session(Some(&e));
                        false
                    } else {
                        let delay = self.inner.config.refresh_delay_for(retries);
                        warn!(
                            retries = retries,
                            max_retries = self.inner.config.refresh_max_retries,
                            delay_ms = delay.as_millis() as u64,
                            transient = e.is_transient(),
                            error = %e,
                            "Renewal failed, scheduling retry"
                        );
                        let this = self.clone();
                        self.inner.timer.arm(tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            this.refresh_now().await;
                        }));
                        false
                    }
                }
            }
        }
        .boxed()
    }

    /// Schedule the next renewal, replacing any previously armed timer.
    fn arm_renewal_timer(&self) {
        let delay = self.inner.config.renew_after();
        debug!(delay_secs = delay.as_secs(), "Arming renewal timer");
        let this = self.clone();
        self.inner.timer.arm(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.refresh_now().await;
        }));
    }

    /// Unconditional client-side teardown: cancel the timer, invalidate
    /// in-flight work, drop the persisted credential, settle to anonymous.
    fn clear_session(&self, error: Option<&AuthError>) {
        self.inner.timer.cancel();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh_retries.store(0, Ordering::SeqCst);

        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Could not clear persisted credential");
        }

        if let Err(e) = self.transition(&SessionMachineInput::SessionCleared, |state| {
            state.identity = None;
            state.credential = None;
            state.last_error = error.map(|e| e.to_string());
            state.last_error_kind = error.map(AuthError::kind);
        }) {
            warn!(error = %e, "Could not settle cleared session");
        }
    }

    fn settle_authenticated(&self, identity: Identity, token: String) {
        if let Err(e) = self.transition(&SessionMachineInput::AuthConfirmed, |state| {
            state.identity = Some(identity);
            state.credential = Some(token);
            state.last_error = None;
            state.last_error_kind = None;
        }) {
            warn!(error = %e, "Could not settle authenticated session");
        }
    }

    /// Settle a failed or empty operation. The stored credential is not
    /// touched here; callers that need it cleared do so explicitly.
    fn settle_anonymous(&self, error: Option<&AuthError>) {
        if let Err(e) = self.transition(&SessionMachineInput::AuthCleared, |state| {
            state.identity = None;
            state.last_error = error.map(|e| e.to_string());
            state.last_error_kind = error.map(AuthError::kind);
        }) {
            warn!(error = %e, "Could not settle anonymous session");
        }
    }

    /// Apply one machine transition and state mutation atomically, then
    /// notify observers outside the lock.
    fn transition(
        &self,
        input: &SessionMachineInput,
        apply: impl FnOnce(&mut SessionState),
    ) -> AuthResult<()> {
        let snapshot = {
            let mut core = self.lock_core();
            let old_phase = core.state.phase;
            core.machine.consume(input).map_err(|_| {
                AuthError::InvalidStateTransition(format!(
                    "cannot apply {:?} in state {:?}",
                    input,
                    core.machine.state()
                ))
            })?;
            core.state.phase = SessionPhase::from(core.machine.state());
            apply(&mut core.state);
            debug!(
                old_phase = ?old_phase,
                new_phase = ?core.state.phase,
                "Session state transition"
            );
            core.state.clone()
        };
        self.inner.observers.notify(&snapshot);
        Ok(())
    }

    fn lock_core(&self) -> MutexGuard<'_, EngineCore> {
        self.inner.core.lock().unwrap_or_else(|e| e.into_inner())
    }
}
