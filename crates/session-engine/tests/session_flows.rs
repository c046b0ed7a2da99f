//! End-to-end session lifecycle tests against a scripted identity API.
//!
//! Every test runs on a paused-clock runtime, so timer and backoff delays
//! are exercised deterministically without real waiting.

use credential_store::{CredentialStorage, CredentialStore, MemoryStorage, StorageResult};
use serde_json::{json, Value};
use session_engine::{
    AuthError, AuthResult, ErrorKind, IdentityApi, RegistrationRequest, RetryPolicy,
    SessionConfig, SessionManager, SessionPhase, TokenResponse,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Storage handle the test keeps alongside the manager, for seeding and
/// inspecting the persisted credential.
#[derive(Clone)]
struct SharedStorage(Arc<MemoryStorage>);

impl SharedStorage {
    fn new() -> Self {
        Self(Arc::new(MemoryStorage::new()))
    }

    fn store(&self) -> CredentialStore {
        CredentialStore::new(Box::new(self.clone()))
    }

    fn persisted_token(&self) -> Option<String> {
        self.0.get("hearth_access_token").unwrap()
    }

    fn seed_token(&self, token: &str) {
        self.0.set("hearth_access_token", token).unwrap();
    }
}

impl CredentialStorage for SharedStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.0.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.0.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.0.delete(key)
    }
}

/// Scripted identity API.
///
/// Each operation pops the next queued response; `fetch_identity` falls
/// back to a standing payload when its queue runs dry, and can be given an
/// artificial delay for race tests.
#[derive(Default)]
struct ScriptedApi {
    register_responses: Mutex<VecDeque<AuthResult<Value>>>,
    login_responses: Mutex<VecDeque<AuthResult<TokenResponse>>>,
    identity_responses: Mutex<VecDeque<AuthResult<Value>>>,
    update_responses: Mutex<VecDeque<AuthResult<Value>>>,
    logout_responses: Mutex<VecDeque<AuthResult<()>>>,
    identity_fallback: Mutex<Option<Value>>,
    identity_delay: Mutex<Option<Duration>>,
    identity_calls: AtomicUsize,
    update_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl ScriptedApi {
    fn new() -> Self {
        Self::default()
    }

    fn script_register(&self, response: AuthResult<Value>) {
        self.register_responses.lock().unwrap().push_back(response);
    }

    fn script_login(&self, response: AuthResult<TokenResponse>) {
        self.login_responses.lock().unwrap().push_back(response);
    }

    fn script_identity(&self, response: AuthResult<Value>) {
        self.identity_responses.lock().unwrap().push_back(response);
    }

    fn script_update(&self, response: AuthResult<Value>) {
        self.update_responses.lock().unwrap().push_back(response);
    }

    fn script_logout(&self, response: AuthResult<()>) {
        self.logout_responses.lock().unwrap().push_back(response);
    }

    fn set_identity_fallback(&self, payload: Value) {
        *self.identity_fallback.lock().unwrap() = Some(payload);
    }

    fn set_identity_delay(&self, delay: Duration) {
        *self.identity_delay.lock().unwrap() = Some(delay);
    }

    fn clear_identity_delay(&self) {
        *self.identity_delay.lock().unwrap() = None;
    }

    fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityApi for ScriptedApi {
    async fn register(&self, _request: &RegistrationRequest) -> AuthResult<Value> {
        self.register_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Network("unscripted register call".to_string())))
    }

    async fn login(&self, _email: &str, _password: &str) -> AuthResult<TokenResponse> {
        self.login_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Network("unscripted login call".to_string())))
    }

    async fn fetch_identity(&self, _token: &str) -> AuthResult<Value> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.identity_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.identity_responses.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => match self.identity_fallback.lock().unwrap().clone() {
                Some(payload) => Ok(payload),
                None => Err(AuthError::Network("unscripted identity call".to_string())),
            },
        }
    }

    async fn update_identity(&self, _token: &str, _fields: &Value) -> AuthResult<Value> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.update_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Network("unscripted update call".to_string())))
    }

    async fn logout(&self, _token: &str) -> AuthResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

fn user_payload(id: &str) -> Value {
    json!({
        "id": id,
        "email": format!("{id}@example.com"),
        "is_active": true,
        "is_verified": true,
        "first_name": "Ada",
        "onboarding_completed": false,
        "onboarding_step": 0
    })
}

fn token_response(token: &str) -> TokenResponse {
    serde_json::from_value(json!({"access_token": token, "token_type": "bearer"})).unwrap()
}

/// Fast deterministic config: one transport attempt per call, short
/// renewal cycle, linear renewal backoff from one second.
fn test_config() -> SessionConfig {
    SessionConfig {
        base_url: "https://api.test.invalid".to_string(),
        token_ttl: Duration::from_secs(30 * 60),
        renewal_lead: Duration::from_secs(5 * 60),
        retry: RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        },
        refresh_max_retries: 3,
        refresh_base_delay: Duration::from_secs(1),
    }
}

fn manager_with(api: Arc<ScriptedApi>, storage: &SharedStorage, config: SessionConfig) -> SessionManager {
    SessionManager::new(api, storage.store(), config)
}

async fn signed_in_manager(
    api: &Arc<ScriptedApi>,
    storage: &SharedStorage,
    config: SessionConfig,
) -> SessionManager {
    api.script_login(Ok(token_response("tok-1")));
    api.script_identity(Ok(user_payload("user-1")));
    let manager = manager_with(Arc::clone(api), storage, config);
    let outcome = manager.login("user-1@example.com", "pw").await;
    assert!(outcome.success);
    manager
}

#[tokio::test(start_paused = true)]
async fn init_without_credential_settles_anonymous() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = manager_with(Arc::clone(&api), &storage, test_config());

    let state = manager.init().await;
    assert_eq!(state.phase, SessionPhase::Anonymous);
    assert!(state.last_error.is_none());
    assert!(!manager.is_authenticated());
    assert_eq!(api.identity_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn init_restores_session_from_persisted_credential() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    storage.seed_token("tok-persisted");
    api.script_identity(Ok(user_payload("user-7")));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let state = manager.init().await;

    assert_eq!(state.phase, SessionPhase::Authenticated);
    assert_eq!(state.identity.as_ref().unwrap().id, "user-7");
    assert_eq!(state.credential.as_deref(), Some("tok-persisted"));
    assert!(manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn init_with_rejected_credential_clears_it_quietly() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    storage.seed_token("tok-expired");
    api.script_identity(Err(AuthError::Authentication("expired".to_string())));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let state = manager.init().await;

    // An expired credential on startup is routine, not an error.
    assert_eq!(state.phase, SessionPhase::Anonymous);
    assert!(state.last_error.is_none());
    assert_eq!(storage.persisted_token(), None);
}

#[tokio::test(start_paused = true)]
async fn init_retries_transient_failures() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    storage.seed_token("tok-flaky");
    api.script_identity(Err(AuthError::Network("reset".to_string())));
    api.script_identity(Err(AuthError::Network("reset".to_string())));
    api.script_identity(Ok(user_payload("user-3")));

    let config = SessionConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        },
        ..test_config()
    };
    let manager = manager_with(Arc::clone(&api), &storage, config);
    let state = manager.init().await;

    assert_eq!(state.phase, SessionPhase::Authenticated);
    assert_eq!(api.identity_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn init_runs_only_once() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    storage.seed_token("tok-once");
    api.script_identity(Ok(user_payload("user-1")));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    manager.init().await;
    let calls_after_first = api.identity_calls();

    let state = manager.init().await;
    assert_eq!(api.identity_calls(), calls_after_first);
    assert_eq!(state.phase, SessionPhase::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn login_persists_credential_and_authenticates() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_login(Ok(token_response("tok-abc")));
    api.script_identity(Ok(user_payload("user-1")));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let outcome = manager.login("user-1@example.com", "pw").await;

    assert!(outcome.success);
    assert_eq!(outcome.user.unwrap().id, "user-1");
    assert!(manager.is_authenticated());
    assert_eq!(storage.persisted_token().as_deref(), Some("tok-abc"));
}

#[tokio::test(start_paused = true)]
async fn login_failure_surfaces_classified_error_without_persisting() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_login(Err(AuthError::Authentication("bad password".to_string())));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let outcome = manager.login("user-1@example.com", "wrong").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Authentication));
    assert!(outcome.error.unwrap().contains("bad password"));
    assert!(!manager.is_authenticated());
    assert_eq!(storage.persisted_token(), None);

    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Anonymous);
    assert_eq!(state.last_error_kind, Some(ErrorKind::Authentication));
}

#[tokio::test(start_paused = true)]
async fn identity_fetch_failure_after_login_fails_the_operation() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_login(Ok(token_response("tok-abc")));
    api.script_identity(Err(AuthError::Api {
        status: 500,
        body: "boom".to_string(),
    }));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let outcome = manager.login("user-1@example.com", "pw").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Api));
    assert!(!manager.is_authenticated());
    // No usable session, so nothing is persisted.
    assert_eq!(storage.persisted_token(), None);
}

#[tokio::test(start_paused = true)]
async fn register_chains_into_login() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_register(Ok(user_payload("user-new")));
    api.script_login(Ok(token_response("tok-new")));
    api.script_identity(Ok(user_payload("user-new")));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let outcome = manager
        .register(RegistrationRequest {
            email: "user-new@example.com".to_string(),
            password: "pw".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone: None,
            company: None,
        })
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.user.unwrap().id, "user-new");
    assert!(manager.is_authenticated());
    assert_eq!(storage.persisted_token().as_deref(), Some("tok-new"));
}

#[tokio::test(start_paused = true)]
async fn register_rejection_settles_to_error_state() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_register(Err(AuthError::Validation("email taken".to_string())));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let outcome = manager
        .register(RegistrationRequest {
            email: "dup@example.com".to_string(),
            password: "pw".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            phone: None,
            company: None,
        })
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Validation));
    assert!(!manager.is_authenticated());
    assert_eq!(manager.state().phase, SessionPhase::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn logout_clears_everything_and_is_idempotent() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    assert!(manager.is_authenticated());

    let outcome = manager.logout().await;
    assert!(outcome.success);
    assert!(!manager.is_authenticated());
    assert_eq!(storage.persisted_token(), None);
    assert_eq!(manager.state().phase, SessionPhase::Anonymous);
    assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);

    // Logging out again is a no-op, not an error.
    let outcome = manager.logout().await;
    assert!(outcome.success);
    assert_eq!(manager.state().phase, SessionPhase::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn logout_succeeds_even_when_the_server_call_fails() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    api.script_logout(Err(AuthError::Api {
        status: 503,
        body: "down".to_string(),
    }));

    let outcome = manager.logout().await;
    assert!(outcome.success);
    assert!(!manager.is_authenticated());
    assert_eq!(storage.persisted_token(), None);
}

#[tokio::test(start_paused = true)]
async fn update_onboarding_replaces_identity_and_keeps_credential() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;

    let mut updated = user_payload("user-1");
    updated["onboarding_step"] = json!(3);
    updated["company"] = json!("Acme");
    api.script_update(Ok(updated));

    let outcome = manager
        .update_onboarding(3, Some(json!({"company": "Acme"})), false)
        .await;

    assert!(outcome.success);
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Authenticated);
    assert_eq!(state.identity.as_ref().unwrap().onboarding_step, 3);
    assert_eq!(state.identity.as_ref().unwrap().company.as_deref(), Some("Acme"));
    assert_eq!(state.credential.as_deref(), Some("tok-1"));
    assert_eq!(storage.persisted_token().as_deref(), Some("tok-1"));
}

#[tokio::test(start_paused = true)]
async fn update_onboarding_failure_does_not_force_logout() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    api.script_update(Err(AuthError::Api {
        status: 500,
        body: "flaky".to_string(),
    }));

    let outcome = manager.update_onboarding(2, None, false).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Api));

    // The session survives; only the error is recorded.
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Authenticated);
    assert!(manager.is_authenticated());
    assert_eq!(state.last_error_kind, Some(ErrorKind::Api));
    assert_eq!(storage.persisted_token().as_deref(), Some("tok-1"));
}

#[tokio::test(start_paused = true)]
async fn update_onboarding_without_credential_is_an_authentication_failure() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    manager.init().await;

    let outcome = manager.update_onboarding(1, None, false).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Authentication));
    assert_eq!(api.update_calls.load(Ordering::SeqCst), 0);
    // No loading flicker for an operation that never started.
    assert_eq!(manager.state().phase, SessionPhase::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn renewal_timer_fires_before_expiry_and_rearms() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    assert_eq!(api.identity_calls(), 1);

    let mut renewed = user_payload("user-1");
    renewed["first_name"] = json!("Renewed");
    api.set_identity_fallback(renewed);

    // Five minutes before the 30 minute expiry.
    tokio::time::sleep(Duration::from_secs(25 * 60 + 1)).await;
    assert_eq!(api.identity_calls(), 2);
    let state = manager.state();
    assert_eq!(state.identity.as_ref().unwrap().first_name.as_deref(), Some("Renewed"));
    assert!(manager.is_authenticated());

    // The cycle continues from each successful renewal.
    tokio::time::sleep(Duration::from_secs(25 * 60 + 1)).await;
    assert_eq!(api.identity_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_share_one_network_call() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    let calls_after_login = api.identity_calls();

    api.set_identity_fallback(user_payload("user-1"));
    api.set_identity_delay(Duration::from_secs(2));

    let mut joins = Vec::new();
    for _ in 0..3 {
        let manager = manager.clone();
        joins.push(tokio::spawn(async move { manager.refresh_now().await }));
    }
    for join in joins {
        assert!(join.await.unwrap());
    }

    assert_eq!(api.identity_calls(), calls_after_login + 1);
    assert!(manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn logout_wins_race_against_inflight_refresh() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;

    api.set_identity_fallback(user_payload("user-1"));
    api.set_identity_delay(Duration::from_secs(10));

    let refresh = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.refresh_now().await })
    };
    // Let the refresh reach its network suspension point.
    tokio::task::yield_now().await;

    let outcome = manager.logout().await;
    assert!(outcome.success);
    assert!(!manager.is_authenticated());

    // The refresh completes later, but its result is stale and discarded.
    let applied = refresh.await.unwrap();
    assert!(!applied);
    assert!(!manager.is_authenticated());
    assert_eq!(manager.state().phase, SessionPhase::Anonymous);
    assert_eq!(storage.persisted_token(), None);
}

#[tokio::test(start_paused = true)]
async fn logout_during_timer_refresh_does_not_kill_later_renewals() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;
    assert_eq!(api.identity_calls(), 1);

    api.set_identity_fallback(user_payload("user-1"));
    api.set_identity_delay(Duration::from_secs(60));

    // Let the timer fire and its refresh reach the network.
    tokio::time::sleep(Duration::from_secs(25 * 60 + 1)).await;
    assert_eq!(api.identity_calls(), 2);

    let outcome = manager.logout().await;
    assert!(outcome.success);
    assert!(!manager.is_authenticated());

    // Sign back in; the interrupted flight must not block the new session's
    // renewal cycle.
    api.clear_identity_delay();
    api.script_login(Ok(token_response("tok-2")));
    let outcome = manager.login("user-1@example.com", "pw").await;
    assert!(outcome.success);
    assert_eq!(api.identity_calls(), 3);

    tokio::time::sleep(Duration::from_secs(25 * 60 + 2)).await;
    assert_eq!(api.identity_calls(), 4);
    assert!(manager.is_authenticated());

    tokio::time::sleep(Duration::from_secs(25 * 60 + 2)).await;
    assert_eq!(api.identity_calls(), 5);
    assert!(manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn exhausted_renewal_retries_force_logout() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;

    // Every renewal attempt from here on fails.
    let applied = manager.refresh_now().await;
    assert!(!applied);
    assert!(manager.is_authenticated());

    // Scheduled retries run at one second, then two seconds out; the
    // third consecutive failure hits the cap and tears the session down.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!manager.is_authenticated());
    let state = manager.state();
    assert_eq!(state.phase, SessionPhase::Anonymous);
    assert!(state.last_error.is_some());
    assert_eq!(storage.persisted_token(), None);
}

#[tokio::test(start_paused = true)]
async fn renewal_failure_under_the_cap_keeps_the_session() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    let manager = signed_in_manager(&api, &storage, test_config()).await;

    // One failure, then recovery on the scheduled retry.
    api.script_identity(Err(AuthError::Network("blip".to_string())));
    api.set_identity_fallback(user_payload("user-1"));

    let applied = manager.refresh_now().await;
    assert!(!applied);
    assert!(manager.is_authenticated());

    // The retry fires one second later and succeeds.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(manager.is_authenticated());
    assert!(manager.state().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn observers_see_ordered_transitions() {
    let api = Arc::new(ScriptedApi::new());
    let storage = SharedStorage::new();
    api.script_login(Ok(token_response("tok-1")));
    api.script_identity(Ok(user_payload("user-1")));

    let manager = manager_with(Arc::clone(&api), &storage, test_config());
    let phases = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let phases = Arc::clone(&phases);
        manager.subscribe(move |state| phases.lock().unwrap().push(state.phase))
    };

    manager.login("user-1@example.com", "pw").await;
    manager.logout().await;

    assert_eq!(
        *phases.lock().unwrap(),
        vec![
            SessionPhase::Loading,
            SessionPhase::Authenticated,
            SessionPhase::Anonymous
        ]
    );

    subscription.unsubscribe();
    api.script_login(Ok(token_response("tok-2")));
    api.script_identity(Ok(user_payload("user-1")));
    manager.login("user-1@example.com", "pw").await;

    // Nothing recorded after unsubscribing.
    assert_eq!(phases.lock().unwrap().len(), 3);
}
