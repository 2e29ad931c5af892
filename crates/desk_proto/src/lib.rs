//! desk_proto: Deskline session data model and auth API contracts.
//!
//! All types map directly to JSON bodies, either on the wire (login and
//! refresh endpoints) or inside the encrypted session slots.

pub mod api;
pub mod model;

pub use api::{
    LoginPayload, LoginRequest, LoginResponse, RefreshPayload, RefreshRequest, RefreshResponse,
};
pub use model::{AuthToken, ProfileUpdate, Role, UserProfile, DEFAULT_TOKEN_TYPE};
