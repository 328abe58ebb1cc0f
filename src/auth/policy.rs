//! Method-aware gate policy.
//!
//! Safe navigations read the auth cookie and bounce to the login page on
//! failure. Everything that can change state must present an explicit
//! `Authorization: Bearer` header, so a cross-site request riding on the
//! cookie alone is never authenticated.

use axum::http::{HeaderMap, Method, header};

use super::errors::AuthError;
use crate::jwt::BEARER_PREFIX;

/// Where the gate looks for the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cookie,
    AuthorizationHeader,
}

/// How a rejected request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionStyle {
    /// 303 to the login page
    RedirectToLogin,
    /// 401 with a JSON body
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub source: CredentialSource,
    pub rejection: RejectionStyle,
}

const COOKIE_REDIRECT: GatePolicy = GatePolicy {
    source: CredentialSource::Cookie,
    rejection: RejectionStyle::RedirectToLogin,
};

const COOKIE_UNAUTHORIZED: GatePolicy = GatePolicy {
    source: CredentialSource::Cookie,
    rejection: RejectionStyle::Unauthorized,
};

const HEADER_UNAUTHORIZED: GatePolicy = GatePolicy {
    source: CredentialSource::AuthorizationHeader,
    rejection: RejectionStyle::Unauthorized,
};

/// Method → policy. Methods not listed fall back to [`HEADER_UNAUTHORIZED`].
const POLICY_TABLE: [(Method, GatePolicy); 3] = [
    (Method::GET, COOKIE_REDIRECT),
    (Method::HEAD, COOKIE_REDIRECT),
    (Method::OPTIONS, COOKIE_UNAUTHORIZED),
];

pub fn policy_for(method: &Method) -> GatePolicy {
    POLICY_TABLE
        .iter()
        .find(|(m, _)| m == method)
        .map(|(_, policy)| *policy)
        .unwrap_or(HEADER_UNAUTHORIZED)
}

/// GET, HEAD and OPTIONS.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(method, &Method::GET | &Method::HEAD | &Method::OPTIONS)
}

/// A credential pulled from the request, still unvalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential<'a> {
    /// Raw JWT without the `Bearer ` prefix
    pub token: &'a str,
    pub source: CredentialSource,
}

/// Extract the credential from the place the policy names.
pub fn extract_credential(
    headers: &HeaderMap,
    source: CredentialSource,
) -> Result<Credential<'_>, AuthError> {
    let value = match source {
        CredentialSource::Cookie => {
            super::cookie::get_cookie(headers, super::cookie::AUTH_COOKIE_NAME)
        }
        CredentialSource::AuthorizationHeader => headers
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().map_err(|_| AuthError::MalformedCredential))
            .transpose()?,
    };

    let value = value
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingCredential)?;
    let token = parse_bearer(value).ok_or(AuthError::MalformedCredential)?;

    Ok(Credential { token, source })
}

/// Split `Bearer <token>` into the token. Anything else is malformed.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let token = value.strip_prefix(BEARER_PREFIX)?;
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}
