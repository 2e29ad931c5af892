//! Authentication state machine.
//!
//! `AuthSessionController` owns the only path by which a session is created,
//! renewed or destroyed. State is published on a `watch` channel so views can
//! follow it without polling. Storage failures never escape as panics: they
//! surface as `LoginError::Storage`, `false` or a forced logout.

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use desk_proto::{
    AuthToken, LoginRequest, LoginResponse, ProfileUpdate, RefreshRequest, RefreshResponse,
    UserProfile,
};
use desk_store::SessionRepository;

use crate::client::AuthClient;
use crate::error::LoginError;

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the fallback token lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated { user: UserProfile, token: AuthToken },
    Unauthenticated,
}

impl SessionState {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&AuthToken> {
        match self {
            SessionState::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Loading => "loading",
            SessionState::Authenticated { .. } => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    default_token_ttl: Duration,
    refresh_check_interval: Duration,
}

impl ControllerOptions {
    pub fn new(default_token_ttl: Duration, refresh_check_interval: Duration) -> Self {
        Self {
            default_token_ttl: default_token_ttl.min(MAX_TOKEN_TTL),
            refresh_check_interval: refresh_check_interval.max(MIN_CHECK_INTERVAL),
        }
    }

    pub fn default_token_ttl(&self) -> Duration {
        self.default_token_ttl
    }

    pub fn refresh_check_interval(&self) -> Duration {
        self.refresh_check_interval
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(60))
    }
}

struct Inner {
    repo: SessionRepository,
    client: Arc<dyn AuthClient>,
    options: ControllerOptions,
    state: watch::Sender<SessionState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every logout, login and init; async work started under an
    /// older epoch is discarded when it completes.
    epoch: AtomicU64,
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_generation: AtomicU64,
    last_refresh_ok: AtomicBool,
}

pub struct AuthSessionController {
    inner: Arc<Inner>,
}

impl AuthSessionController {
    pub fn new(
        repo: SessionRepository,
        client: Arc<dyn AuthClient>,
        options: ControllerOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                repo,
                client,
                options,
                state,
                timer: Mutex::new(None),
                epoch: AtomicU64::new(0),
                refresh_gate: tokio::sync::Mutex::new(()),
                refresh_generation: AtomicU64::new(0),
                last_refresh_ok: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn repository(&self) -> &SessionRepository {
        &self.inner.repo
    }

    /// Restore the persisted session, if it is still valid.
    pub async fn init(&self) -> SessionState {
        let inner = &self.inner;
        if !inner.try_enter_loading() {
            debug!("[session] init skipped: login in progress");
            return self.snapshot();
        }
        inner.stop_timer();
        let epoch = inner.next_epoch();
        let pending = LoadingGuard::new(inner, epoch);

        let reader = Arc::clone(inner);
        let stored =
            tokio::task::spawn_blocking(move || (reader.repo.get_user(), reader.repo.get_token()))
                .await;
        pending.disarm();

        if inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("[session] init: superseded by logout");
            return self.snapshot();
        }
        let (user, token) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "[session] init: store read task failed");
                inner.state.send_replace(SessionState::Unauthenticated);
                return self.snapshot();
            }
        };

        let restored = match (user, token) {
            (Some(user), Some(token)) if token.is_valid_at(inner.repo.now_millis()) => {
                Some((user, token))
            }
            _ => None,
        };

        match restored {
            Some((user, token)) => {
                info!(user_id = %user.id, "[session] init: restored session");
                inner.state.send_replace(SessionState::Authenticated { user, token });
                inner.start_timer();
            }
            None => {
                if inner.repo.has_token() {
                    info!("[session] init: stored session expired, clearing");
                }
                if !inner.repo.clear_all() {
                    warn!("[session] init: failed to clear stale session");
                }
                inner.state.send_replace(SessionState::Unauthenticated);
            }
        }
        self.snapshot()
    }

    /// Authenticate against the auth service and persist the session.
    ///
    /// A call made while another login (or init) is in flight is ignored and
    /// returns [`LoginError::InProgress`] without touching state or storage.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, LoginError> {
        let inner = &self.inner;
        if !inner.try_enter_loading() {
            warn!("[session] login: ignored, another attempt is in flight");
            return Err(LoginError::InProgress);
        }
        inner.stop_timer();
        let epoch = inner.next_epoch();
        let pending = LoadingGuard::new(inner, epoch);
        info!("[session] login: email={}", email);

        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let outcome = inner.client.login(&request).await;
        pending.disarm();

        if inner.epoch.load(Ordering::SeqCst) != epoch {
            info!("[session] login: result discarded after logout");
            return Err(LoginError::Cancelled);
        }

        let payload = match outcome {
            Ok(LoginResponse {
                status: true,
                payload: Some(payload),
                ..
            }) => payload,
            Ok(res) => {
                let message = res.message.unwrap_or_else(|| "Login failed".to_string());
                warn!("[session] login: rejected: {}", message);
                inner.fail_login();
                return Err(LoginError::Rejected(message));
            }
            Err(e) => {
                error!(error = %e, "[session] login: transport failure");
                inner.fail_login();
                return Err(LoginError::Transport(e));
            }
        };

        let now = inner.repo.now_millis();
        let expires_at = payload
            .expires_at
            .unwrap_or_else(|| now.saturating_add(inner.ttl_millis()));
        let token = AuthToken::bearer(payload.access_token, payload.refresh_token, expires_at);
        if !token.is_valid_at(now) {
            warn!("[session] login: service issued an already expired token");
            inner.fail_login();
            return Err(LoginError::Rejected("Received an expired session".into()));
        }

        let mut user = payload.user;
        if user.last_login.is_none() {
            user.last_login = Utc.timestamp_millis_opt(now).single();
        }

        if !inner.repo.save_session(&user, &token) {
            error!(user_id = %user.id, "[session] login: failed to persist session");
            inner.fail_login();
            return Err(LoginError::Storage);
        }

        info!(user_id = %user.id, role = %user.role, "[session] login: authenticated");
        inner.state.send_replace(SessionState::Authenticated {
            user: user.clone(),
            token,
        });
        inner.start_timer();
        Ok(user)
    }

    /// Drop the session. Idempotent; storage failures are logged only.
    pub fn logout(&self) {
        self.inner.logout();
    }

    /// Renew the access token. Any failure ends the session.
    pub async fn refresh(&self) -> bool {
        self.inner.refresh().await
    }

    pub fn update_profile(&self, update: ProfileUpdate) -> bool {
        let inner = &self.inner;
        let Some(mut user) = inner.state.borrow().user().cloned() else {
            debug!("[session] update_profile: not authenticated");
            return false;
        };
        if update.is_empty() {
            return true;
        }
        update.apply_to(&mut user);
        if !inner.repo.save_user(&user) {
            warn!(user_id = %user.id, "[session] update_profile: persist failed");
            return false;
        }
        inner.state.send_if_modified(|state| match state {
            SessionState::Authenticated { user: current, .. } => {
                *current = user;
                true
            }
            _ => false,
        })
    }

    /// Bearer value for API calls while the session is live.
    pub fn access_token(&self) -> Option<String> {
        let now = self.inner.repo.now_millis();
        self.inner
            .state
            .borrow()
            .token()
            .filter(|t| t.is_valid_at(now))
            .map(|t| t.access_token.clone())
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated() && self.inner.repo.is_authenticated()
    }

    pub fn refresh_timer_active(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop background work. The stored session is left intact.
    pub fn shutdown(&self) {
        self.inner.stop_timer();
    }
}

impl Drop for AuthSessionController {
    fn drop(&mut self) {
        self.inner.stop_timer();
    }
}

impl Inner {
    fn try_enter_loading(&self) -> bool {
        let mut entered = false;
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Loading) {
                return false;
            }
            *state = SessionState::Loading;
            entered = true;
            true
        });
        entered
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.options.default_token_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn fail_login(&self) {
        if !self.repo.clear_all() {
            warn!("[session] login: failed to clear previous session");
        }
        self.state.send_replace(SessionState::Unauthenticated);
    }

    fn logout(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_timer();
        if !self.repo.clear_all() {
            error!("[session] logout: failed to clear stored session");
        }
        let was = self.state.send_replace(SessionState::Unauthenticated);
        if let Some(user) = was.user() {
            info!(user_id = %user.id, "[session] logout");
        }
    }

    /// Coalesces concurrent callers: whoever waited on the gate while another
    /// refresh ran gets that refresh's outcome.
    async fn refresh(&self) -> bool {
        let seen = self.refresh_generation.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_generation.load(Ordering::SeqCst) != seen {
            return self.last_refresh_ok.load(Ordering::SeqCst);
        }
        let ok = self.refresh_once().await;
        self.last_refresh_ok.store(ok, Ordering::SeqCst);
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        ok
    }

    async fn refresh_once(&self) -> bool {
        if matches!(*self.state.borrow(), SessionState::Loading) {
            debug!("[session] refresh: skipped while a session is loading");
            return false;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(current) = self.repo.get_token() else {
            warn!("[session] refresh: no stored token");
            self.logout();
            return false;
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!("[session] refresh: no refresh token");
            self.logout();
            return false;
        };

        let outcome = self.client.refresh(&RefreshRequest { refresh_token }).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("[session] refresh: result discarded, session replaced");
            return false;
        }

        let payload = match outcome {
            Ok(RefreshResponse {
                status: true,
                payload: Some(payload),
                ..
            }) => payload,
            Ok(res) => {
                warn!(
                    "[session] refresh: rejected: {}",
                    res.message.as_deref().unwrap_or("no reason given")
                );
                self.logout();
                return false;
            }
            Err(e) => {
                warn!(error = %e, "[session] refresh: transport failure");
                self.logout();
                return false;
            }
        };

        let now = self.repo.now_millis();
        let token = AuthToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.or(current.refresh_token),
            expires_at: payload
                .expires_at
                .unwrap_or_else(|| now.saturating_add(self.ttl_millis())),
            token_type: current.token_type,
        };
        if !token.is_valid_at(now) {
            warn!("[session] refresh: service issued an already expired token");
            self.logout();
            return false;
        }
        let Some(user) = self.repo.get_user() else {
            warn!("[session] refresh: stored user missing");
            self.logout();
            return false;
        };
        if !self.repo.save_token(&token) {
            error!(user_id = %user.id, "[session] refresh: failed to persist token");
            self.logout();
            return false;
        }

        info!(user_id = %user.id, "[session] refresh: token renewed");
        self.state
            .send_replace(SessionState::Authenticated { user, token });
        true
    }

    fn start_timer(self: &Arc<Self>) {
        let handle = spawn_refresh_check(Arc::downgrade(self), self.options.refresh_check_interval);
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            debug!("[session] refresh timer stopped");
        }
    }
}

/// Returns the state to `Unauthenticated` if a login or init future is
/// dropped while it still owns `Loading`.
struct LoadingGuard<'a> {
    inner: &'a Inner,
    epoch: u64,
    armed: bool,
}

impl<'a> LoadingGuard<'a> {
    fn new(inner: &'a Inner, epoch: u64) -> Self {
        Self {
            inner,
            epoch,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || self.inner.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        let reset = self.inner.state.send_if_modified(|state| {
            if matches!(state, SessionState::Loading) {
                *state = SessionState::Unauthenticated;
                return true;
            }
            false
        });
        if reset {
            warn!("[session] pending load abandoned, state reset");
        }
    }
}

/// Periodic expiry check. Holds only a weak reference so a dropped controller
/// ends the loop on its next tick.
fn spawn_refresh_check(inner: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.repo.has_token() {
                debug!("[session] refresh check: token gone, stopping");
                break;
            }
            if inner.repo.needs_refresh() {
                debug!("[session] refresh check: token near expiry");
                inner.refresh().await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DemoAuthClient, DEMO_PASSWORD};
    use desk_crypto::FixedProbe;
    use desk_store::{ManualClock, MemoryKv};

    const NOW: i64 = 1_750_000_000_000;

    fn controller() -> (AuthSessionController, Arc<MemoryKv>, Arc<DemoAuthClient>) {
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let repo = SessionRepository::new(kv.clone(), Arc::new(FixedProbe::default()), clock.clone());
        let client = Arc::new(DemoAuthClient::new(clock));
        let ctl = AuthSessionController::new(repo, client.clone(), ControllerOptions::default());
        (ctl, kv, client)
    }

    #[test]
    fn state_helpers() {
        assert_eq!(SessionState::Loading.label(), "loading");
        assert!(SessionState::Unauthenticated.user().is_none());
        assert!(!SessionState::Uninitialized.is_authenticated());
    }

    #[test]
    fn options_clamp_interval_and_ttl() {
        let opts = ControllerOptions::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(opts.refresh_check_interval(), MIN_CHECK_INTERVAL);

        let opts = ControllerOptions::new(Duration::from_secs(u64::MAX / 2), Duration::from_secs(60));
        assert_eq!(opts.default_token_ttl(), MAX_TOKEN_TTL);
    }

    #[tokio::test]
    async fn login_publishes_state_and_sets_last_login() {
        let (ctl, _kv, _client) = controller();
        let mut rx = ctl.subscribe();
        assert_eq!(*rx.borrow_and_update(), SessionState::Uninitialized);

        let user = ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user(), Some(&user));
        assert_eq!(user.last_login.map(|t| t.timestamp_millis()), Some(NOW));
        assert!(ctl.access_token().unwrap().starts_with("demo-access-"));
        assert!(ctl.refresh_timer_active());
    }

    #[tokio::test]
    async fn update_profile_requires_session() {
        let (ctl, _kv, _client) = controller();
        assert!(!ctl.update_profile(ProfileUpdate {
            name: Some("X".into()),
            ..ProfileUpdate::default()
        }));

        ctl.login("agent@x.com", DEMO_PASSWORD).await.unwrap();
        assert!(ctl.update_profile(ProfileUpdate {
            name: Some("Renamed".into()),
            ..ProfileUpdate::default()
        }));
        assert_eq!(ctl.current_user().unwrap().name, "Renamed");
        assert_eq!(ctl.repository().get_user().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn update_profile_reports_storage_failure() {
        let (ctl, kv, _client) = controller();
        ctl.login("agent@x.com", DEMO_PASSWORD).await.unwrap();
        kv.set_fail_writes(true);
        assert!(!ctl.update_profile(ProfileUpdate {
            avatar: Some("a.png".into()),
            ..ProfileUpdate::default()
        }));
        assert!(ctl.current_user().unwrap().avatar.is_none());
    }

    #[tokio::test]
    async fn shutdown_keeps_session_but_stops_timer() {
        let (ctl, _kv, _client) = controller();
        ctl.login("admin@x.com", DEMO_PASSWORD).await.unwrap();
        ctl.shutdown();
        assert!(!ctl.refresh_timer_active());
        assert!(ctl.is_authenticated());
        assert!(ctl.repository().has_token());
    }
}
