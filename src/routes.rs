//! Static route table and the navigation menu derived from it.
//!
//! SYSTEM CONTEXT
//! ==============
//! Pages attach their access rules here instead of checking identity
//! themselves. `navigate` runs the access guard; `nav_items` hides links the
//! current identity could not open anyway.

use crate::guard::{self, GuardDecision, RouteRequirement};
use crate::state::session::{Identity, SessionView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub requirement: RouteRequirement,
    /// Menu label; `None` keeps the route out of the navigation menu.
    pub nav_label: Option<&'static str>,
}

const fn route(path: &'static str, requirement: RouteRequirement, nav_label: Option<&'static str>) -> Route {
    Route { path, requirement, nav_label }
}

pub const ROUTES: &[Route] = &[
    route("/", RouteRequirement::PUBLIC, None),
    route("/login", RouteRequirement::PUBLIC, None),
    route("/register", RouteRequirement::PUBLIC, None),
    route("/forgot-password", RouteRequirement::PUBLIC, None),
    route("/rules", RouteRequirement::PUBLIC, None),
    route("/faq", RouteRequirement::PUBLIC, None),
    route("/privacy", RouteRequirement::PUBLIC, None),
    route("/terms", RouteRequirement::PUBLIC, None),
    route("/dashboard", RouteRequirement::GUEST_OK, Some("Battles")),
    route("/leaderboard", RouteRequirement::GUEST_OK, Some("Leaderboard")),
    route("/tournament", RouteRequirement::GUEST_OK, Some("Tournament")),
    route("/submit", RouteRequirement::MEMBER, Some("Submit")),
    route("/my-submissions", RouteRequirement::MEMBER, Some("My Submissions")),
    route("/profile", RouteRequirement::MEMBER, Some("Profile")),
    route("/admin", RouteRequirement::ADMIN, Some("Admin")),
];

/// Outcome of a navigation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Pending,
    Render(&'static Route),
    Redirect { from: &'static str, to: &'static str },
    NotFound,
}

/// Look up a route by path. A single trailing slash is ignored.
#[must_use]
pub fn find(path: &str) -> Option<&'static Route> {
    let trimmed = path.trim();
    let normalized = match trimmed.strip_suffix('/') {
        Some(rest) if !rest.is_empty() => rest,
        _ => trimmed,
    };
    ROUTES.iter().find(|r| r.path == normalized)
}

#[must_use]
pub fn navigate(view: &SessionView, path: &str) -> Navigation {
    let Some(route) = find(path) else {
        tracing::debug!(path, "no such route");
        return Navigation::NotFound;
    };
    match guard::evaluate(view, route.requirement) {
        GuardDecision::Pending => Navigation::Pending,
        GuardDecision::Render => Navigation::Render(route),
        GuardDecision::Redirect(to) => {
            tracing::debug!(from = route.path, to, "guard redirected");
            Navigation::Redirect { from: route.path, to }
        }
    }
}

/// Menu entries the current identity may open, in table order.
#[must_use]
pub fn nav_items(view: &SessionView) -> Vec<&'static Route> {
    if matches!(view.identity, Identity::Anonymous) {
        return Vec::new();
    }
    ROUTES
        .iter()
        .filter(|r| r.nav_label.is_some())
        .filter(|r| guard::evaluate(view, r.requirement) == GuardDecision::Render)
        .collect()
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
