//! Authentication service contract and its implementations.

mod demo;
mod http;

use async_trait::async_trait;

use desk_proto::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};

use crate::error::ClientError;

pub use demo::{DemoAuthClient, DEMO_PASSWORD};
pub use http::HttpAuthClient;

/// Login and refresh endpoints. `Ok` with `status: false` is a rejection by
/// the service; `Err` means the service could not be reached or answered
/// with something unreadable.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError>;
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ClientError>;
}
