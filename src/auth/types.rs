//! Authenticated identity types.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::Rejection;

/// An account as seen through [`UserLookup`](super::UserLookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// Identity attached to a request that passed the gate.
///
/// Handlers behind [`auth_gate`](super::auth_gate) take it as an extractor.
/// On a route the gate does not cover, extraction fails with a 401 instead
/// of panicking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContext {
    user_id: String,
    email: String,
}

impl AuthenticatedContext {
    pub(crate) fn new(user_id: String, email: String) -> Self {
        Self { user_id, email }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl<S> FromRequestParts<S> for AuthenticatedContext
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedContext>()
            .cloned()
            .ok_or_else(|| {
                tracing::error!(path = %parts.uri.path(), "AuthenticatedContext requested on an ungated route");
                Rejection::unauthorized()
            })
    }
}
