//! Request gating for axum services: signed session tokens, secure cookies,
//! idle-timeout sessions and double-submit CSRF protection.
//!
//! Requests pass `security_headers → csrf_guard → auth_gate → handler`.
//! [`secure`] installs the first two around a whole router and [`gated`]
//! puts the auth gate in front of the routes that need a logged-in user.

pub mod auth;
pub mod cli;
pub mod config;
pub mod csrf;
pub mod headers;
pub mod jwt;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;

pub use auth::{AuthGate, AuthenticatedContext, User, UserLookup, auth_gate};
pub use config::SecurityConfig;
pub use csrf::{CsrfGuard, CsrfToken, csrf_guard};
pub use headers::security_headers;

/// Require authentication on every route of `router`.
///
/// Uses `route_layer`, so unmatched paths still answer 404.
pub fn gated<S, L>(router: Router<S>, gate: Arc<AuthGate<L>>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    L: UserLookup,
{
    router.route_layer(middleware::from_fn_with_state(gate, auth_gate::<L>))
}

/// Wrap `router` in the security headers and CSRF middleware.
pub fn secure<S>(router: Router<S>, csrf: Arc<CsrfGuard>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(security_headers))
            .layer(middleware::from_fn_with_state(csrf, csrf_guard)),
    )
}
