//! Route guard for protected views.
//!
//! Every activation of a protected view is checked against the current session:
//! anonymous visitors go to the login page, logged-in users lacking the role or
//! branch go home, everyone else renders. Decisions are never cached.

use crate::config::RouteConfig;
use crate::session::{Role, Session};

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// Placeholder whose segment supplies the required branch id
pub const BRANCH_PLACEHOLDER: &str = "branchId";

/// Outcome of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Render,
    RedirectToLogin,
    RedirectToHome,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::RedirectToLogin => "redirect_to_login",
            Self::RedirectToHome => "redirect_to_home",
        }
    }

    /// Where to navigate instead, if anywhere
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            Self::Render => None,
            Self::RedirectToLogin => Some(LOGIN_PATH),
            Self::RedirectToHome => Some(HOME_PATH),
        }
    }
}

/// Decide whether a view requiring `required_roles` (empty = any logged-in
/// user) and optionally `required_branch` may render for `session`.
/// The anonymous check comes first so anonymous visitors always land on login.
pub fn evaluate(session: &Session, required_roles: &[Role], required_branch: Option<i64>) -> Decision {
    if !session.is_authenticated() {
        return Decision::RedirectToLogin;
    }

    if !required_roles.is_empty() && !session.has_permission(required_roles) {
        return Decision::RedirectToHome;
    }

    if let Some(branch_id) = required_branch {
        if !session.has_branch_access(branch_id) {
            return Decision::RedirectToHome;
        }
    }

    Decision::Render
}

/// One segment of a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route path such as `/branch/:branchId/orders`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
}

/// Split a path into segments, dropping query string, fragment and
/// leading/trailing slashes
fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a concrete path. On success returns the branch id captured by a
    /// `:branchId` placeholder, if the pattern has one. A `:branchId` segment
    /// that is not an integer does not match.
    pub fn matches(&self, path: &str) -> Option<Option<i64>> {
        let parts = split_path(path);
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut branch = None;
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) if name == BRANCH_PLACEHOLDER => {
                    branch = Some(part.parse::<i64>().ok()?);
                }
                Segment::Param(_) => {}
            }
        }
        Some(branch)
    }
}

struct GuardedRoute {
    config: RouteConfig,
    pattern: RoutePattern,
}

/// Route table plus the guard decision for concrete paths
pub struct RouteGuard {
    routes: Vec<GuardedRoute>,
}

impl RouteGuard {
    pub fn new(routes: &[RouteConfig]) -> Self {
        let routes = routes
            .iter()
            .map(|config| GuardedRoute {
                pattern: RoutePattern::parse(&config.path),
                config: config.clone(),
            })
            .collect();
        Self { routes }
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteConfig> {
        self.routes.iter().map(|r| &r.config)
    }

    /// Guard a concrete path. Returns the decision and the protected route it
    /// matched; paths matching no declared route are public and render.
    pub fn check(&self, session: &Session, path: &str) -> (Decision, Option<&RouteConfig>) {
        for route in &self.routes {
            if let Some(branch) = route.pattern.matches(path) {
                let decision = evaluate(session, &route.config.roles, branch);
                return (decision, Some(&route.config));
            }
        }
        (Decision::Render, None)
    }
}
