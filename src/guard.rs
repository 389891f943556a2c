//! Access guard for protected routes.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every navigation runs `evaluate` against a fresh `SessionView`. Nothing is
//! cached, so a logout or guest entry takes effect on the next navigation.

use crate::state::session::{Identity, SessionView};

/// Where unauthenticated visitors are sent.
pub const LOGIN_PATH: &str = "/login";
/// Where guests and non-admins land when a route is off-limits to them.
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Access rules attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequirement {
    pub requires_auth: bool,
    pub allow_guest: bool,
    pub requires_admin: bool,
}

impl RouteRequirement {
    pub const PUBLIC: Self = Self { requires_auth: false, allow_guest: true, requires_admin: false };
    pub const GUEST_OK: Self = Self { requires_auth: true, allow_guest: true, requires_admin: false };
    pub const MEMBER: Self = Self { requires_auth: true, allow_guest: false, requires_admin: false };
    pub const ADMIN: Self = Self { requires_auth: true, allow_guest: false, requires_admin: true };
}

impl Default for RouteRequirement {
    fn default() -> Self {
        Self::MEMBER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session is still rehydrating; show a neutral loading state.
    Pending,
    Render,
    Redirect(&'static str),
}

/// Decide what a protected route shows for the current session.
///
/// Checks run in a fixed order: public routes, loading, anonymous, guest,
/// admin. An anonymous visitor is sent to login even when the route would
/// also refuse guests or non-admins.
#[must_use]
pub fn evaluate(view: &SessionView, requirement: RouteRequirement) -> GuardDecision {
    if !requirement.requires_auth {
        return GuardDecision::Render;
    }
    if view.is_loading() {
        return GuardDecision::Pending;
    }
    match &view.identity {
        Identity::Anonymous => GuardDecision::Redirect(LOGIN_PATH),
        Identity::Guest(_) if !requirement.allow_guest => GuardDecision::Redirect(DASHBOARD_PATH),
        _ if requirement.requires_admin && !view.is_admin() => GuardDecision::Redirect(DASHBOARD_PATH),
        _ => GuardDecision::Render,
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
