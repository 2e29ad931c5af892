use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use desk_proto::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};

use super::AuthClient;
use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

enum Reply<T> {
    Body(T),
    Rejected(String),
}

/// reqwest-backed client for `POST {base}/auth/login` and
/// `POST {base}/auth/refresh`.
#[derive(Clone)]
pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("deskline-session/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B, fallback: &str) -> Result<Reply<T>, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("[session] POST {}", url);
        let res = self.client.post(&url).json(body).send().await?;
        let status = res.status();
        let text = res.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map(Reply::Body)
                .map_err(|e| ClientError::Decode(e.to_string()));
        }

        let message = error_message(&text).unwrap_or_else(|| fallback.to_string());
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            warn!("[session] {} rejected with {}: {}", path, status, message);
            return Ok(Reply::Rejected(message));
        }
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Pull a human-readable reason out of an error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError> {
        match self.post("/auth/login", request, "Login failed").await? {
            Reply::Body(res) => Ok(res),
            Reply::Rejected(msg) => Ok(LoginResponse::rejected(msg)),
        }
    }

    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ClientError> {
        match self.post("/auth/refresh", request, "Token refresh failed").await? {
            Reply::Body(res) => Ok(res),
            Reply::Rejected(msg) => Ok(RefreshResponse::rejected(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use desk_proto::Role;
    use mockito::Matcher;
    use serde_json::json;

    fn login_request() -> LoginRequest {
        LoginRequest {
            email: "agent@x.com".into(),
            password: "password123".into(),
        }
    }

    #[tokio::test]
    async fn login_success_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(json!({
                "email": "agent@x.com",
                "password": "password123"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "payload": {
                        "user": {"id": "a1", "email": "agent@x.com", "name": "Agent", "role": "staff"},
                        "accessToken": "at",
                        "refreshToken": "rt",
                        "expiresAt": 1_900_000_000_000i64
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpAuthClient::new(format!("{}/", server.url())).unwrap();
        assert_eq!(client.base_url(), server.url());
        let res = client.login(&login_request()).await.unwrap();
        mock.assert_async().await;

        assert!(res.status);
        let payload = res.payload.unwrap();
        assert_eq!(payload.user.role, Role::Agent);
        assert_eq!(payload.expires_at, Some(1_900_000_000_000));
    }

    #[tokio::test]
    async fn client_error_body_becomes_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(r#"{"error":"Invalid email or password"}"#)
            .create_async()
            .await;

        let client = HttpAuthClient::new(server.url()).unwrap();
        let res = client.login(&login_request()).await.unwrap();
        assert!(!res.status);
        assert_eq!(res.message.as_deref(), Some("Invalid email or password"));
    }

    #[tokio::test]
    async fn unreadable_rejection_uses_fallback_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = HttpAuthClient::new(server.url()).unwrap();
        let res = client
            .refresh(&RefreshRequest {
                refresh_token: "rt".into(),
            })
            .await
            .unwrap();
        assert!(!res.status);
        assert_eq!(res.message.as_deref(), Some("Token refresh failed"));
    }

    #[tokio::test]
    async fn server_error_is_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(503)
            .with_body(r#"{"message":"maintenance"}"#)
            .create_async()
            .await;

        let client = HttpAuthClient::new(server.url()).unwrap();
        let err = client
            .refresh(&RefreshRequest {
                refresh_token: "rt".into(),
            })
            .await
            .unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_success_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = HttpAuthClient::new(server.url()).unwrap();
        let err = client.login(&login_request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn error_message_prefers_message_field() {
        assert_eq!(
            error_message(r#"{"message":"a","error":"b"}"#).as_deref(),
            Some("a")
        );
        assert_eq!(error_message(r#"{"error":"b"}"#).as_deref(), Some("b"));
        assert_eq!(error_message(r#"{"message":5}"#), None);
        assert_eq!(error_message("nope"), None);
    }
}
