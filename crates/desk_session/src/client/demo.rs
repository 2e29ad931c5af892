use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use desk_proto::{
    LoginPayload, LoginRequest, LoginResponse, RefreshPayload, RefreshRequest, RefreshResponse,
    Role, UserProfile,
};
use desk_store::Clock;

use super::AuthClient;
use crate::error::ClientError;

pub const DEMO_PASSWORD: &str = "password123";

const ACCESS_PREFIX: &str = "demo-access-";
const REFRESH_PREFIX: &str = "demo-refresh-";
const TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

/// In-process stand-in for the auth service with three seeded accounts.
///
/// Refresh accepts any refresh token carrying the demo issuer prefix, so a
/// session persisted by one process can be refreshed by the next.
pub struct DemoAuthClient {
    accounts: Vec<UserProfile>,
    clock: Arc<dyn Clock>,
    latency: Duration,
    offline: AtomicBool,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

fn account(id: &str, email: &str, name: &str, role: Role) -> UserProfile {
    UserProfile {
        id: id.into(),
        email: email.into(),
        name: name.into(),
        role,
        avatar: None,
        preferences: None,
        last_login: None,
    }
}

impl DemoAuthClient {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: vec![
                account("usr-admin-1", "admin@x.com", "Ada Admin", Role::Admin),
                account("usr-agent-1", "agent@x.com", "Sam Agent", Role::Agent),
                account("usr-cust-1", "demo@x.com", "Demo Customer", Role::Customer),
            ],
            clock,
            latency: Duration::ZERO,
            offline: AtomicBool::new(false),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency`, simulating a slow network.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> Result<(), ClientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Offline);
        }
        Ok(())
    }

    fn expiry(&self) -> i64 {
        self.clock.now_millis() + TOKEN_TTL_MS
    }
}

#[async_trait]
impl AuthClient for DemoAuthClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let email = request.email.trim().to_ascii_lowercase();
        let user = self
            .accounts
            .iter()
            .find(|u| u.email == email)
            .filter(|_| request.password == DEMO_PASSWORD);
        let Some(user) = user else {
            return Ok(LoginResponse::rejected("Invalid email or password"));
        };

        info!("[session] demo login accepted for {}", user.email);
        Ok(LoginResponse::accepted(LoginPayload {
            user: user.clone(),
            access_token: format!("{ACCESS_PREFIX}{}", Uuid::new_v4()),
            refresh_token: Some(format!("{REFRESH_PREFIX}{}", Uuid::new_v4())),
            expires_at: Some(self.expiry()),
        }))
    }

    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ClientError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        if !request.refresh_token.starts_with(REFRESH_PREFIX) {
            return Ok(RefreshResponse::rejected("Invalid refresh token"));
        }
        Ok(RefreshResponse::accepted(RefreshPayload {
            access_token: format!("{ACCESS_PREFIX}{}", Uuid::new_v4()),
            refresh_token: None,
            expires_at: Some(self.expiry()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use desk_store::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn client() -> DemoAuthClient {
        DemoAuthClient::new(Arc::new(ManualClock::new(NOW)))
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn seeded_accounts_log_in_with_their_roles() {
        let c = client();
        for (email, role) in [
            ("admin@x.com", Role::Admin),
            ("agent@x.com", Role::Agent),
            ("Demo@X.com ", Role::Customer),
        ] {
            let res = c.login(&login(email, DEMO_PASSWORD)).await.unwrap();
            assert!(res.status, "{email}");
            let payload = res.payload.unwrap();
            assert_eq!(payload.user.role, role);
            assert!(payload.access_token.starts_with(ACCESS_PREFIX));
            assert_eq!(payload.expires_at, Some(NOW + TOKEN_TTL_MS));
        }
        assert_eq!(c.login_calls(), 3);
    }

    #[tokio::test]
    async fn wrong_credentials_are_rejected() {
        let c = client();
        for (email, password) in [("demo@x.com", "nope"), ("ghost@x.com", DEMO_PASSWORD)] {
            let res = c.login(&login(email, password)).await.unwrap();
            assert!(!res.status);
            assert!(res.payload.is_none());
            assert_eq!(res.message.as_deref(), Some("Invalid email or password"));
        }
    }

    #[tokio::test]
    async fn refresh_only_honours_demo_tokens() {
        let c = client();
        let ok = c
            .refresh(&RefreshRequest {
                refresh_token: format!("{REFRESH_PREFIX}abc"),
            })
            .await
            .unwrap();
        assert!(ok.status);
        assert!(ok.payload.unwrap().refresh_token.is_none());

        let bad = c
            .refresh(&RefreshRequest {
                refresh_token: "forged".into(),
            })
            .await
            .unwrap();
        assert!(!bad.status);
        assert_eq!(c.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn offline_client_fails_with_transport_error() {
        let c = client();
        c.set_offline(true);
        assert!(matches!(
            c.login(&login("demo@x.com", DEMO_PASSWORD)).await,
            Err(ClientError::Offline)
        ));
        c.set_offline(false);
        assert!(c.login(&login("demo@x.com", DEMO_PASSWORD)).await.is_ok());
    }
}
