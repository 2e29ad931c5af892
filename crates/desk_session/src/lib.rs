//! desk_session: Deskline authentication session lifecycle.
//!
//! Wires the encrypted store to an auth service and exposes:
//! - `AuthSessionController`: login, logout, refresh, profile updates and a
//!   background expiry check, with state published on a watch channel.
//! - `AccessGate`: role-based route decisions.
//! - `SessionSettings` / `paths`: on-disk configuration.

pub mod bootstrap;
pub mod client;
pub mod controller;
pub mod error;
pub mod gate;
pub mod paths;
pub mod settings;

pub use bootstrap::open_controller;
pub use client::{AuthClient, DemoAuthClient, HttpAuthClient, DEMO_PASSWORD};
pub use controller::{AuthSessionController, ControllerOptions, SessionState, MAX_TOKEN_TTL};
pub use error::{ClientError, LoginError, SessionError};
pub use gate::{decide, default_dashboard_for, AccessDecision, AccessGate, LOGIN_PATH};
pub use settings::SessionSettings;
