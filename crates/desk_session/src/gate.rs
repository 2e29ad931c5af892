//! Role-based route gating. Pure functions of the required role set and the
//! current user; no I/O.

use std::collections::BTreeSet;

use desk_proto::{Role, UserProfile};

use crate::controller::SessionState;

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    RedirectTo(String),
    /// Session still initialising or a login is in flight.
    Pending,
}

pub fn default_dashboard_for(role: Role) -> &'static str {
    match role {
        Role::Admin => "/admin",
        Role::Agent => "/agent",
        Role::Customer => "/customer",
        Role::Unknown => "/",
    }
}

pub fn decide(required: &BTreeSet<Role>, user: Option<&UserProfile>) -> AccessDecision {
    if required.is_empty() {
        return AccessDecision::Allow;
    }
    match user {
        None => AccessDecision::RedirectTo(LOGIN_PATH.to_string()),
        Some(u) if !required.contains(&u.role) => {
            AccessDecision::RedirectTo(default_dashboard_for(u.role).to_string())
        }
        Some(_) => AccessDecision::Allow,
    }
}

/// Guard for one route: the roles allowed through it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessGate {
    required: BTreeSet<Role>,
}

impl AccessGate {
    /// Any visitor, signed in or not.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            required: roles.into_iter().collect(),
        }
    }

    pub fn decide(&self, user: Option<&UserProfile>) -> AccessDecision {
        decide(&self.required, user)
    }

    pub fn decide_for(&self, state: &SessionState) -> AccessDecision {
        if self.required.is_empty() {
            return AccessDecision::Allow;
        }
        match state {
            SessionState::Uninitialized | SessionState::Loading => AccessDecision::Pending,
            _ => self.decide(state.user()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use desk_proto::AuthToken;

    fn user(role: Role) -> UserProfile {
        UserProfile {
            id: "u".into(),
            email: "u@x.com".into(),
            name: "U".into(),
            role,
            avatar: None,
            preferences: None,
            last_login: None,
        }
    }

    fn set(roles: &[Role]) -> BTreeSet<Role> {
        roles.iter().copied().collect()
    }

    #[test]
    fn empty_requirement_allows_everyone() {
        assert_eq!(decide(&set(&[]), None), AccessDecision::Allow);
        assert_eq!(decide(&set(&[]), Some(&user(Role::Unknown))), AccessDecision::Allow);
    }

    #[test]
    fn anonymous_goes_to_login() {
        assert_eq!(
            decide(&set(&[Role::Admin]), None),
            AccessDecision::RedirectTo("/login".into())
        );
    }

    #[test]
    fn wrong_role_goes_to_own_dashboard() {
        let admin_only = set(&[Role::Admin]);
        for (role, target) in [
            (Role::Customer, "/customer"),
            (Role::Agent, "/agent"),
            (Role::Unknown, "/"),
        ] {
            assert_eq!(
                decide(&admin_only, Some(&user(role))),
                AccessDecision::RedirectTo(target.into())
            );
        }
        assert_eq!(
            decide(&set(&[Role::Customer]), Some(&user(Role::Admin))),
            AccessDecision::RedirectTo("/admin".into())
        );
    }

    #[test]
    fn matching_role_is_allowed() {
        let staff = set(&[Role::Admin, Role::Agent]);
        assert_eq!(decide(&staff, Some(&user(Role::Agent))), AccessDecision::Allow);
        assert_eq!(decide(&staff, Some(&user(Role::Admin))), AccessDecision::Allow);
    }

    #[test]
    fn gate_reads_session_state() {
        let gate = AccessGate::roles([Role::Agent]);
        assert_eq!(gate.decide_for(&SessionState::Loading), AccessDecision::Pending);
        assert_eq!(
            gate.decide_for(&SessionState::Unauthenticated),
            AccessDecision::RedirectTo(LOGIN_PATH.into())
        );
        let authed = SessionState::Authenticated {
            user: user(Role::Agent),
            token: AuthToken::bearer("a".into(), None, i64::MAX),
        };
        assert_eq!(gate.decide_for(&authed), AccessDecision::Allow);
        assert_eq!(AccessGate::open().decide_for(&SessionState::Loading), AccessDecision::Allow);
    }
}
