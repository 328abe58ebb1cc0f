//! Authentication error types.

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use super::policy::RejectionStyle;
use crate::jwt::TokenError;

/// Why the gate refused a request. Logged server-side only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("malformed credential")]
    MalformedCredential,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("user not found")]
    UserNotFound,
    #[error("user lookup failed: {0}")]
    LookupFailed(String),
    #[error("user lookup timed out")]
    LookupTimedOut,
    #[error("session idle timeout exceeded")]
    SessionIdleExpired,
}

impl AuthError {
    /// Backend trouble rather than a bad credential.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, AuthError::LookupFailed(_) | AuthError::LookupTimedOut)
    }

    /// Whether a cookie carrying this credential should be dropped from the client.
    pub fn invalidates_cookie(&self) -> bool {
        !matches!(
            self,
            AuthError::MissingCredential
                | AuthError::NotYetValid
                | AuthError::LookupFailed(_)
                | AuthError::LookupTimedOut
        )
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::UnsupportedAlgorithm(_) => AuthError::UnsupportedAlgorithm,
            TokenError::Expired => AuthError::Expired,
            TokenError::NotYetValid => AuthError::NotYetValid,
            TokenError::Malformed | TokenError::WrongTokenType | TokenError::Encoding(_) => {
                AuthError::MalformedCredential
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

/// Client-visible rejection: a redirect to login or a bare 401.
///
/// The body never says which [`AuthError`] fired.
#[derive(Debug)]
pub struct Rejection {
    style: RejectionStyle,
    login_path: String,
    headers: HeaderMap,
}

impl Rejection {
    pub fn new(style: RejectionStyle, login_path: impl Into<String>) -> Self {
        Self {
            style,
            login_path: login_path.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(RejectionStyle::Unauthorized, "")
    }

    /// Extra headers (cookie deletions) to send with the rejection.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = match self.style {
            RejectionStyle::RedirectToLogin => Redirect::to(&self.login_path).into_response(),
            RejectionStyle::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Not authenticated",
                }),
            )
                .into_response(),
        };

        for (name, value) in self.headers.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_body_is_generic() {
        let response = Rejection::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Not authenticated"})
        );
    }

    #[test]
    fn test_redirect_to_login() {
        let response =
            Rejection::new(RejectionStyle::RedirectToLogin, "/user/login").into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/user/login"
        );
    }

    #[test]
    fn test_extra_headers_are_appended() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=; Max-Age=0"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=; Max-Age=0"));

        let response = Rejection::unauthorized().with_headers(headers).into_response();
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_token_errors_map_onto_taxonomy() {
        assert_eq!(
            AuthError::from(TokenError::InvalidSignature),
            AuthError::InvalidSignature
        );
        assert_eq!(AuthError::from(TokenError::Expired), AuthError::Expired);
        assert_eq!(
            AuthError::from(TokenError::WrongTokenType),
            AuthError::MalformedCredential
        );
        assert!(AuthError::LookupTimedOut.is_backend_failure());
        assert!(!AuthError::UserNotFound.is_backend_failure());
        assert!(AuthError::SessionIdleExpired.invalidates_cookie());
        assert!(!AuthError::LookupFailed("db down".into()).invalidates_cookie());
    }
}
