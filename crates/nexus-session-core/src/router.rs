//! Role routing for the dashboard sections.
//!
//! Everything here is pure: decisions depend only on the arguments, so the
//! guard can be evaluated in tests without storage or network.

use crate::activity::TabActivity;
use crate::error::AuthError;
use crate::machine::AuthState;
use crate::profile::Role;
use crate::session::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppRoute {
    Login,
    ForgotPassword,
    VerifyCode,
    ResetPassword,
    SuperAdminHome,
    AdminHome,
}

impl AppRoute {
    #[must_use]
    pub fn to_path(self) -> &'static str {
        match self {
            Self::Login => "/auth/login",
            Self::ForgotPassword => "/auth/forgot-password",
            Self::VerifyCode => "/auth/verify-code",
            Self::ResetPassword => "/auth/reset-password",
            Self::SuperAdminHome => "/super_admin",
            Self::AdminHome => "/dashboard",
        }
    }

    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.trim().trim_end_matches('/');
        match trimmed {
            "/auth/login" | "/login" => Some(Self::Login),
            "/auth/forgot-password" => Some(Self::ForgotPassword),
            "/auth/verify-code" => Some(Self::VerifyCode),
            "/auth/reset-password" => Some(Self::ResetPassword),
            "/super_admin" => Some(Self::SuperAdminHome),
            "/dashboard" => Some(Self::AdminHome),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Self::Login | Self::ForgotPassword | Self::VerifyCode | Self::ResetPassword
        )
    }
}

/// Role a path requires, `None` for public pages and unknown paths.
#[must_use]
pub fn required_role_for_path(path: &str) -> Option<Role> {
    let path = path.trim();
    if path == "/super_admin" || path.starts_with("/super_admin/") {
        return Some(Role::SuperAdmin);
    }
    if path == "/dashboard" || path.starts_with("/dashboard/") {
        return Some(Role::Admin);
    }
    None
}

/// Landing route for a stored role string. Unrecognized roles go to login.
#[must_use]
pub fn role_home_of(raw_role: &str) -> AppRoute {
    Role::parse(raw_role).map_or(AppRoute::Login, Role::home_route)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(AppRoute),
    /// Role matches but another tab owns the session view; render nothing.
    Hidden,
}

#[must_use]
pub fn authorize(session: Option<&SessionRecord>, required: Role) -> GuardDecision {
    authorize_for_tab(session, required, TabActivity::Active)
}

#[must_use]
pub fn authorize_for_tab(
    session: Option<&SessionRecord>,
    required: Role,
    activity: TabActivity,
) -> GuardDecision {
    let Some(principal) = session.and_then(|record| record.principal.as_ref()) else {
        return GuardDecision::Redirect(AppRoute::Login);
    };
    if principal.role != required {
        return GuardDecision::Redirect(principal.role.home_route());
    }
    if !activity.is_active() {
        return GuardDecision::Hidden;
    }
    GuardDecision::Allow
}

/// What a protected page should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView {
    Loading,
    Render,
    Hidden,
    Redirect(AppRoute),
    Failed(AuthError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteGuard {
    required: Role,
}

impl RouteGuard {
    #[must_use]
    pub fn new(required: Role) -> Self {
        Self { required }
    }

    #[must_use]
    pub fn required(&self) -> Role {
        self.required
    }

    #[must_use]
    pub fn evaluate(
        &self,
        state: &AuthState,
        session: Option<&SessionRecord>,
        activity: TabActivity,
    ) -> GuardView {
        match state {
            AuthState::Initializing | AuthState::Authenticating { .. } => GuardView::Loading,
            AuthState::Error(error) if session.is_none_or(|record| record.principal.is_none()) => {
                GuardView::Failed(error.clone())
            }
            AuthState::Unauthenticated => GuardView::Redirect(AppRoute::Login),
            AuthState::Authenticated(_) | AuthState::Error(_) => {
                match authorize_for_tab(session, self.required, activity) {
                    GuardDecision::Allow => GuardView::Render,
                    GuardDecision::Hidden => GuardView::Hidden,
                    GuardDecision::Redirect(route) => GuardView::Redirect(route),
                }
            }
        }
    }
}
