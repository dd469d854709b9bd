//! Owner of the session state machine.
//!
//! One `SessionManager` is built at startup and cloned (cheap `Arc` handle)
//! into whatever needs it. It is the only writer of the credential store.
//!
//! Refresh is single-flight: the first caller installs a [`Flight`] and does
//! the network call, everyone arriving meanwhile blocks on the same flight
//! and receives a clone of its outcome. Every session write is tagged with a
//! generation number that logout and login bump, so a refresh that resolves
//! after the session it started from has ended is discarded instead of
//! resurrecting it.

use super::timer::{refresh_delay, RefreshTimer};
use super::{decode_auth_response, LoginRequest, RegisterRequest, Session, SessionState, User};
use crate::audit::AuditLog;
use crate::error::{ApiError, AuthError, StoreError};
use crate::http::{join_url, HttpRequest, HttpTransport, Method};
use crate::store::{CredentialStore, REFRESH_TOKEN_KEY, SESSION_KEYS, TOKEN_KEY, USER_ID_KEY, USER_KEY};
use crate::token;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

pub struct SessionOptions {
    pub base_url: String,
    /// How long before token expiry the proactive refresh fires
    pub refresh_margin: Duration,
    pub audit: Option<AuditLog>,
}

impl SessionOptions {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            audit: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    refresh_margin: Duration,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<State>,
    flight: Mutex<Option<Arc<Flight>>>,
    audit: Option<Mutex<AuditLog>>,
}

struct State {
    phase: SessionState,
    session: Option<Session>,
    generation: u64,
    timer: Option<RefreshTimer>,
}

/// A refresh in progress that late callers wait on
struct Flight {
    outcome: Mutex<Option<Result<Session, AuthError>>>,
    ready: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<Session, AuthError> {
        let mut outcome = lock(&self.outcome);
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            outcome = self
                .ready
                .wait(outcome)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn complete(&self, result: Result<Session, AuthError>) {
        *lock(&self.outcome) = Some(result);
        self.ready.notify_all();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    /// Build the manager and restore any complete session left in `store`
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(Inner {
                base_url: options.base_url,
                refresh_margin: options.refresh_margin,
                transport,
                store,
                state: Mutex::new(State {
                    phase: SessionState::Unauthenticated,
                    session: None,
                    generation: 0,
                    timer: None,
                }),
                flight: Mutex::new(None),
                audit: options.audit.map(Mutex::new),
            }),
        };
        manager.restore();
        manager
    }

    pub fn state(&self) -> SessionState {
        self.lock_state().phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().session.is_some()
    }

    pub fn session(&self) -> Option<Session> {
        self.lock_state().session.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.lock_state().session.as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.lock_state().session.as_ref().map(|s| s.user.clone())
    }

    /// Read-only view of the credential store for consumers of published keys
    pub fn store(&self) -> &dyn CredentialStore {
        self.inner.store.as_ref()
    }

    pub fn login(&self, credentials: &LoginRequest) -> Result<Session, AuthError> {
        let session = self.authenticate(LOGIN_PATH, credentials)?;
        info!(email = %session.user.email, role = %session.user.role, "logged in");
        self.audit(|log| log.login(&session.user.email, &session.user.role));
        Ok(session)
    }

    pub fn register(&self, data: &RegisterRequest) -> Result<Session, AuthError> {
        let session = self.authenticate(REGISTER_PATH, data)?;
        info!(email = %session.user.email, "registered");
        self.audit(|log| log.register(&session.user.email));
        Ok(session)
    }

    /// Notify the server (best effort) and drop the local session.
    ///
    /// The in-memory session is always dropped. `Err` means the stored
    /// credentials could not be removed and would come back on restart.
    pub fn logout(&self) -> Result<(), AuthError> {
        let notified = match self.token() {
            Some(token) => {
                let request = self.request(LOGOUT_PATH).bearer(&token);
                match self.inner.transport.execute(&request) {
                    Ok(resp) if resp.is_success() => true,
                    Ok(resp) => {
                        warn!(status = resp.status, "logout notification rejected");
                        false
                    }
                    Err(e) => {
                        warn!(error = %e, "logout notification failed");
                        false
                    }
                }
            }
            None => false,
        };

        let cleared = {
            let mut state = self.lock_state();
            self.clear_locked(&mut state)
        };
        info!("logged out");
        self.audit(|log| log.logout(notified));
        cleared.map_err(AuthError::from)
    }

    /// Exchange the refresh token for a new session.
    ///
    /// Concurrent callers share one network call and its outcome. Any failure
    /// ends the session.
    pub fn refresh(&self) -> Result<Session, AuthError> {
        let (flight, leader) = {
            let mut slot = lock(&self.inner.flight);
            match slot.as_ref() {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    *slot = Some(flight.clone());
                    (flight, true)
                }
            }
        };

        if !leader {
            debug!("joining in-flight refresh");
            return flight.wait();
        }

        let outcome = self.run_refresh();
        *lock(&self.inner.flight) = None;
        flight.complete(outcome.clone());
        outcome
    }

    /// Record that a request was rejected with no way to recover the session
    pub fn note_session_expired(&self, url: &str) {
        warn!(url = %url, "session expired");
        self.audit(|log| log.session_expired(url));
    }

    /// Arm the proactive refresh for the current token. Returns the delay if a timer was armed.
    pub fn schedule_proactive_refresh(&self) -> Option<Duration> {
        let mut state = self.lock_state();
        self.arm_timer(&mut state)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::new(Method::Post, join_url(&self.inner.base_url, path))
            .header("Accept", "application/json")
    }

    fn audit<F>(&self, f: F)
    where
        F: FnOnce(&mut AuditLog) -> anyhow::Result<()>,
    {
        if let Some(audit) = &self.inner.audit {
            if let Err(e) = f(&mut lock(audit)) {
                warn!(error = %e, "failed to write audit log");
            }
        }
    }

    /// Send `request` and validate the reply as an auth payload
    fn exchange(&self, request: &HttpRequest) -> Result<Session, AuthError> {
        debug!(url = %request.url, "auth request");
        let resp = self.inner.transport.execute(request)?;
        if !resp.is_success() {
            return Err(AuthError::Api(ApiError::from_response(resp.status, &resp.body)));
        }
        decode_auth_response(&resp.body)
    }

    fn authenticate<B: Serialize>(&self, path: &str, body: &B) -> Result<Session, AuthError> {
        let body = serde_json::to_string(body).map_err(|e| AuthError::Encode(e.to_string()))?;
        let request = self
            .request(path)
            .header("Content-Type", "application/json")
            .json_body(body);

        let previous = std::mem::replace(&mut self.lock_state().phase, SessionState::Authenticating);
        let result = self.exchange(&request);

        let mut state = self.lock_state();
        let session = match result.and_then(|session| {
            self.persist(&session)?;
            Ok(session)
        }) {
            Ok(session) => session,
            Err(e) => {
                // leave the phase alone if a refresh moved it meanwhile
                if state.phase == SessionState::Authenticating {
                    state.phase = previous;
                }
                return Err(e);
            }
        };

        state.generation += 1;
        state.session = Some(session.clone());
        state.phase = SessionState::Authenticated;
        self.arm_timer(&mut state);
        Ok(session)
    }

    fn run_refresh(&self) -> Result<Session, AuthError> {
        let (refresh_token, generation) = {
            let mut state = self.lock_state();
            let refresh_token = match state.session.as_ref() {
                Some(session) => session.refresh_token.clone(),
                None => return Err(AuthError::NotAuthenticated),
            };
            state.phase = SessionState::Refreshing;
            (refresh_token, state.generation)
        };

        let request = self.request(REFRESH_PATH).bearer(&refresh_token);
        let result = self.exchange(&request);

        let mut state = self.lock_state();
        if state.generation != generation {
            debug!("discarding refresh result for a session that already ended");
            return Err(AuthError::Superseded);
        }

        let result = result.and_then(|session| {
            self.persist(&session)?;
            Ok(session)
        });

        match result {
            Ok(session) => {
                state.session = Some(session.clone());
                state.phase = SessionState::Authenticated;
                self.arm_timer(&mut state);
                drop(state);
                info!("session refreshed");
                self.audit(|log| log.refresh_ok(&session.user.email));
                Ok(session)
            }
            Err(e) => {
                if let Err(store_err) = self.clear_locked(&mut state) {
                    warn!(error = %store_err, "stored credentials survived a failed refresh");
                }
                drop(state);
                warn!(error = %e, "token refresh failed, session cleared");
                self.audit(|log| log.refresh_failed(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Write all session keys in one batch
    fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let user = serde_json::to_string(&session.user)?;
        self.inner.store.write_batch(&[
            (TOKEN_KEY, Some(session.token.as_str())),
            (REFRESH_TOKEN_KEY, Some(session.refresh_token.as_str())),
            (USER_KEY, Some(user.as_str())),
            (USER_ID_KEY, session.user.id.as_deref()),
        ])
    }

    /// Drop the in-memory session, then the stored one. When the keyed
    /// removal fails the whole store is wiped instead.
    fn clear_locked(&self, state: &mut State) -> Result<(), StoreError> {
        state.generation += 1;
        state.session = None;
        state.phase = SessionState::Unauthenticated;
        state.timer = None;
        let removals: Vec<(&str, Option<&str>)> = SESSION_KEYS.iter().map(|k| (*k, None)).collect();
        if let Err(e) = self.inner.store.write_batch(&removals) {
            warn!(error = %e, "failed to remove session keys, wiping credential store");
            self.inner.store.clear()?;
        }
        Ok(())
    }

    /// Replace the proactive timer. The previous one is cancelled by the drop.
    fn arm_timer(&self, state: &mut State) -> Option<Duration> {
        state.timer = None;

        let session = state.session.as_ref()?;
        let Some(exp) = token::expiry(&session.token) else {
            debug!("token has no decodable expiry, proactive refresh disabled");
            return None;
        };
        let Some(delay) = refresh_delay(exp, Utc::now().timestamp_millis(), self.inner.refresh_margin)
        else {
            debug!("token is inside the refresh margin, relying on reactive refresh");
            return None;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = RefreshTimer::spawn(delay, move || {
            if let Some(inner) = weak.upgrade() {
                let manager = SessionManager { inner };
                if let Err(e) = manager.refresh() {
                    debug!(error = %e, "proactive refresh did not complete");
                }
            }
        });

        match timer {
            Ok(timer) => {
                debug!(delay_ms = delay.as_millis() as u64, "proactive refresh armed");
                state.timer = Some(timer);
                Some(delay)
            }
            Err(e) => {
                warn!(error = %e, "failed to arm proactive refresh timer");
                None
            }
        }
    }

    fn restore(&self) {
        match self.read_stored() {
            Ok(Some(session)) => {
                info!(email = %session.user.email, "restored stored session");
                let mut state = self.lock_state();
                state.session = Some(session);
                state.phase = SessionState::Authenticated;
                self.arm_timer(&mut state);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "discarding unusable stored session");
                let mut state = self.lock_state();
                if let Err(e) = self.clear_locked(&mut state) {
                    warn!(error = %e, "failed to discard stored session");
                }
            }
        }
    }

    fn read_stored(&self) -> Result<Option<Session>, AuthError> {
        let store = &self.inner.store;
        let token = store.get(TOKEN_KEY)?;
        let refresh_token = store.get(REFRESH_TOKEN_KEY)?;
        let user = store.get(USER_KEY)?;

        match (token, refresh_token, user) {
            (None, None, None) => Ok(None),
            (Some(token), Some(refresh_token), Some(user)) => {
                let mut user: User = serde_json::from_str(&user)
                    .map_err(|e| AuthError::Store(format!("stored profile is unreadable: {}", e)))?;
                user.role = user.role.to_lowercase();
                Ok(Some(Session {
                    token,
                    refresh_token,
                    user,
                }))
            }
            _ => Err(AuthError::Store(
                "credential store holds a partial session".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{MockTransport, Reply};
    use crate::http::HttpResponse;
    use crate::store::{FileStore, MemoryStore};
    use serde_json::json;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    const BASE: &str = "http://api.test";

    fn setup() -> (Arc<MockTransport>, Arc<MemoryStore>, SessionManager) {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(SessionOptions::new(BASE), transport.clone(), store.clone());
        (transport, store, manager)
    }

    fn auth_body(token: &str, refresh: &str, role: &str) -> String {
        json!({
            "token": token,
            "refreshToken": refresh,
            "email": "a@x.com",
            "role": role,
            "firstName": "A",
            "lastName": "B",
            "userId": "u1"
        })
        .to_string()
    }

    fn login(transport: &MockTransport, manager: &SessionManager) -> Session {
        transport.respond(LOGIN_PATH, 200, &auth_body("t1", "r1", "USER"));
        manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap()
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn ok(body: String) -> HttpResponse {
        HttpResponse { status: 200, body }
    }

    #[test]
    fn test_login_persists_session() {
        let (transport, store, manager) = setup();
        assert_eq!(manager.state(), SessionState::Unauthenticated);

        let session = login(&transport, &manager);
        assert_eq!(session.token, "t1");
        assert!(manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("t1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
        assert_eq!(store.get(USER_ID_KEY).unwrap().as_deref(), Some("u1"));

        let calls = transport.calls_to(LOGIN_PATH);
        assert_eq!(calls.len(), 1);
        let sent: serde_json::Value =
            serde_json::from_str(calls[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({ "username": "a", "password": "b" }));
        assert_eq!(calls[0].url, "http://api.test/auth/login");
    }

    #[test]
    fn test_role_is_stored_lowercase() {
        let (transport, store, manager) = setup();
        transport.respond(LOGIN_PATH, 200, &auth_body("t1", "r1", "ADMIN"));
        manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap();

        let stored: User = serde_json::from_str(&store.get(USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.role, "admin");
        assert_eq!(manager.user().unwrap().role, "admin");
    }

    #[test]
    fn test_login_rejects_malformed_response() {
        let (transport, store, manager) = setup();
        transport.respond(
            LOGIN_PATH,
            200,
            r#"{"token":"t1","email":"a@x.com","role":"user","firstName":"A","lastName":"B"}"#,
        );
        let err = manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[test]
    fn test_login_surfaces_api_and_network_errors() {
        let (transport, store, manager) = setup();
        let creds = LoginRequest {
            username: "a".to_string(),
            password: "wrong".to_string(),
        };

        transport.respond(LOGIN_PATH, 401, r#"{"message":"Bad credentials"}"#);
        match manager.login(&creds).unwrap_err() {
            AuthError::Api(api) => {
                assert_eq!(api.status, 401);
                assert_eq!(api.message, "Bad credentials");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        transport.fail(LOGIN_PATH, "connection refused");
        assert!(matches!(manager.login(&creds), Err(AuthError::Network(_))));
        assert_eq!(transport.calls_to(LOGIN_PATH).len(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_register_uses_register_endpoint() {
        let (transport, store, manager) = setup();
        transport.respond(REGISTER_PATH, 201, &auth_body("t9", "r9", "User"));
        let session = manager
            .register(&RegisterRequest {
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                email: "a@x.com".to_string(),
                password: "pw".to_string(),
                phone: None,
            })
            .unwrap();

        assert_eq!(session.user.role, "user");
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("t9"));
        let calls = transport.calls_to(REGISTER_PATH);
        let sent: serde_json::Value =
            serde_json::from_str(calls[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(sent["firstName"], "A");
        assert!(sent.get("phone").is_none());
    }

    #[test]
    fn test_refresh_replaces_session() {
        let (transport, store, manager) = setup();
        login(&transport, &manager);

        transport.respond(REFRESH_PATH, 200, &auth_body("t2", "r2", "USER"));
        let session = manager.refresh().unwrap();
        assert_eq!(session.token, "t2");
        assert_eq!(manager.token().as_deref(), Some("t2"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r2"));

        let calls = transport.calls_to(REFRESH_PATH);
        assert_eq!(calls[0].header_value("Authorization"), Some("Bearer r1"));
    }

    #[test]
    fn test_failed_refresh_clears_everything() {
        for (status, body) in [(500, "oops"), (200, r#"{"token":"t2"}"#)] {
            let (transport, store, manager) = setup();
            login(&transport, &manager);

            transport.respond(REFRESH_PATH, status, body);
            assert!(manager.refresh().is_err());
            assert!(!manager.is_authenticated());
            assert_eq!(manager.state(), SessionState::Unauthenticated);
            assert!(store.is_empty(), "store not cleared after {}", status);
        }
    }

    #[test]
    fn test_refresh_without_session() {
        let (transport, _store, manager) = setup();
        assert!(matches!(manager.refresh(), Err(AuthError::NotAuthenticated)));
        assert!(transport.calls_to(REFRESH_PATH).is_empty());
    }

    #[test]
    fn test_concurrent_refresh_is_single_flight() {
        const CALLERS: usize = 8;
        let (transport, _store, manager) = setup();
        login(&transport, &manager);

        let (release, gate) = mpsc::channel();
        transport.push(REFRESH_PATH, Reply::Gated(gate, ok(auth_body("t2", "r2", "USER"))));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let m = manager.clone();
                thread::spawn(move || m.refresh())
            })
            .collect();

        // slot + one clone per caller
        wait_until("all callers to join the flight", || {
            lock(&manager.inner.flight)
                .as_ref()
                .map(|f| Arc::strong_count(f) == CALLERS + 1)
                .unwrap_or(false)
        });
        release.send(()).unwrap();

        for h in handles {
            assert_eq!(h.join().unwrap().unwrap().token, "t2");
        }
        assert_eq!(transport.calls_to(REFRESH_PATH).len(), 1);
        assert!(lock(&manager.inner.flight).is_none());
    }

    #[test]
    fn test_logout_during_refresh_wins() {
        let (transport, store, manager) = setup();
        login(&transport, &manager);

        let (release, gate) = mpsc::channel();
        transport.push(REFRESH_PATH, Reply::Gated(gate, ok(auth_body("t2", "r2", "USER"))));
        transport.respond(LOGOUT_PATH, 204, "");

        let m = manager.clone();
        let refreshing = thread::spawn(move || m.refresh());
        wait_until("refresh to reach the server", || {
            transport.calls_to(REFRESH_PATH).len() == 1
        });
        assert_eq!(manager.state(), SessionState::Refreshing);

        manager.logout().unwrap();
        assert!(store.is_empty());
        assert!(!manager.is_authenticated());

        release.send(()).unwrap();
        assert!(matches!(refreshing.join().unwrap(), Err(AuthError::Superseded)));
        assert!(store.is_empty());
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_logout_clears_even_when_notify_fails() {
        let (transport, store, manager) = setup();
        login(&transport, &manager);

        transport.fail(LOGOUT_PATH, "connection reset");
        manager.logout().unwrap();

        assert!(store.is_empty());
        assert!(!manager.is_authenticated());
        let calls = transport.calls_to(LOGOUT_PATH);
        assert_eq!(calls[0].header_value("Authorization"), Some("Bearer t1"));
    }

    #[test]
    fn test_logout_wipes_file_store_when_batch_write_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(FileStore::open(&path).unwrap());
        let manager = SessionManager::new(SessionOptions::new(BASE), transport.clone(), store);
        login(&transport, &manager);

        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        transport.respond(LOGOUT_PATH, 204, "");
        manager.logout().unwrap();
        assert!(!manager.is_authenticated());

        let reopened = Arc::new(FileStore::open(&path).unwrap());
        let next = SessionManager::new(SessionOptions::new(BASE), transport, reopened);
        assert!(!next.is_authenticated());
        assert_eq!(next.token(), None);
    }

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("read-only").into())
        }
        fn clear(&self) -> Result<(), StoreError> {
            Err(std::io::Error::other("read-only").into())
        }
    }

    #[test]
    fn test_logout_reports_credentials_it_could_not_remove() {
        let transport = Arc::new(MockTransport::new());
        let manager =
            SessionManager::new(SessionOptions::new(BASE), transport.clone(), Arc::new(BrokenStore));
        login(&transport, &manager);
        transport.respond(LOGOUT_PATH, 204, "");

        assert!(matches!(manager.logout(), Err(AuthError::Store(_))));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_failed_login_during_refresh_keeps_refreshing_phase() {
        let (transport, _store, manager) = setup();
        login(&transport, &manager);

        let (release, gate) = mpsc::channel();
        transport.push(REFRESH_PATH, Reply::Gated(gate, ok(auth_body("t2", "r2", "USER"))));
        let m = manager.clone();
        let refreshing = thread::spawn(move || m.refresh());
        wait_until("refresh to reach the server", || {
            transport.calls_to(REFRESH_PATH).len() == 1
        });

        transport.respond(LOGIN_PATH, 401, r#"{"message":"Bad credentials"}"#);
        let err = manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "wrong".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::Api(_)));
        assert_eq!(manager.state(), SessionState::Refreshing);

        release.send(()).unwrap();
        assert_eq!(refreshing.join().unwrap().unwrap().token, "t2");
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_logout_without_session_skips_notify() {
        let (transport, _store, manager) = setup();
        manager.logout().unwrap();
        assert!(transport.calls_to(LOGOUT_PATH).is_empty());
    }

    #[test]
    fn test_restore_complete_session() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "t1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        store
            .set(
                USER_KEY,
                r#"{"email":"a@x.com","firstName":"A","lastName":"B","role":"Admin"}"#,
            )
            .unwrap();

        let manager = SessionManager::new(SessionOptions::new(BASE), transport, store);
        assert!(manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(manager.user().unwrap().role, "admin");
    }

    #[test]
    fn test_restore_discards_partial_session() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "t1").unwrap();
        store.set(USER_ID_KEY, "u1").unwrap();

        let manager = SessionManager::new(SessionOptions::new(BASE), transport, store.clone());
        assert!(!manager.is_authenticated());
        assert!(store.is_empty());
    }

    #[test]
    fn test_schedule_requires_future_expiry() {
        let (transport, _store, manager) = setup();
        assert_eq!(manager.schedule_proactive_refresh(), None);

        // opaque token, no expiry
        login(&transport, &manager);
        assert_eq!(manager.schedule_proactive_refresh(), None);

        let expired = token::encode_unsigned(&json!({ "exp": Utc::now().timestamp() + 30 }));
        transport.respond(LOGIN_PATH, 200, &auth_body(&expired, "r1", "user"));
        manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap();
        assert_eq!(manager.schedule_proactive_refresh(), None);

        let later = token::encode_unsigned(&json!({ "exp": Utc::now().timestamp() + 3600 }));
        transport.respond(LOGIN_PATH, 200, &auth_body(&later, "r1", "user"));
        manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap();
        let delay = manager.schedule_proactive_refresh().unwrap();
        assert!(delay > Duration::from_secs(3400) && delay <= Duration::from_secs(3540));
    }

    #[test]
    fn test_proactive_refresh_fires_once() {
        let (transport, store, manager) = setup();
        let soon = token::encode_unsigned(&json!({ "exp": Utc::now().timestamp() + 62 }));
        transport.respond(LOGIN_PATH, 200, &auth_body(&soon, "r1", "user"));
        transport.respond(REFRESH_PATH, 200, &auth_body("t2", "r2", "user"));

        manager
            .login(&LoginRequest {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .unwrap();
        // re-arming replaces the timer armed by login
        assert!(manager.schedule_proactive_refresh().is_some());
        assert!(manager.schedule_proactive_refresh().is_some());

        wait_until("proactive refresh", || {
            store.get(TOKEN_KEY).unwrap().as_deref() == Some("t2")
        });
        thread::sleep(Duration::from_millis(1500));
        assert_eq!(transport.calls_to(REFRESH_PATH).len(), 1);
        assert!(manager.is_authenticated());
    }
}
