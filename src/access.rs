//! Role gating for protected commands.

use crate::session::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Apply,
    Admin,
    Audit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    LoginRequired,
    Forbidden,
}

impl Route {
    /// Roles allowed through; empty means any authenticated user
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            Self::Apply => &[],
            Self::Admin => &["admin"],
            Self::Audit => &["admin", "auditor"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Admin => "admin",
            Self::Audit => "audit",
        }
    }
}

pub fn check(route: Route, user: Option<&User>) -> Access {
    let Some(user) = user else {
        return Access::LoginRequired;
    };
    let roles = route.roles();
    if roles.is_empty() || roles.contains(&user.role.to_lowercase().as_str()) {
        Access::Granted
    } else {
        Access::Forbidden
    }
}
