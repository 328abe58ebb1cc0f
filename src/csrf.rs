//! Double-submit CSRF protection.
//!
//! Safe requests are handed a fresh random token, both as the `csrf_token`
//! cookie and as the `X-CSRF-Token` response header. Unsafe requests must
//! send the cookie back together with the same value in the `X-CSRF-Token`
//! header or, for urlencoded and multipart forms, the `csrf_token` field.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{CSRF_COOKIE_NAME, CookieManager, CookieOverrides, SameSite, is_safe_method};
use crate::config::SecurityConfig;

pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Largest form body buffered while looking for the token field.
pub const DEFAULT_FORM_LIMIT: usize = 64 * 1024;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// A CSRF token, base64url without padding.
///
/// Available as an extractor to handlers behind [`csrf_guard`] so they can
/// embed it into rendered forms.
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CsrfToken(<redacted>)")
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = CsrfRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CsrfToken>()
            .cloned()
            .ok_or(CsrfRejection(CsrfError::Missing))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,
    #[error("CSRF token mismatch")]
    Mismatch,
    #[error("request body could not be read")]
    UnreadableBody,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

/// 403 with a fixed body. Neither the expected nor the submitted token is
/// ever included.
#[derive(Debug)]
pub struct CsrfRejection(pub CsrfError);

impl IntoResponse for CsrfRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "CSRF validation failed",
            }),
        )
            .into_response()
    }
}

/// Constant-time comparison of two tokens.
///
/// Empty tokens never match.
pub fn tokens_match(expected: &str, submitted: &str) -> bool {
    if expected.is_empty() || submitted.is_empty() {
        return false;
    }
    // memcmp::eq panics on unequal lengths
    if expected.len() != submitted.len() {
        return false;
    }
    openssl::memcmp::eq(expected.as_bytes(), submitted.as_bytes())
}

pub struct CsrfGuard {
    config: Arc<SecurityConfig>,
    cookies: CookieManager,
    form_limit: usize,
}

impl CsrfGuard {
    pub fn new(config: Arc<SecurityConfig>) -> Self {
        let cookies = CookieManager::new(&config);
        Self {
            config,
            cookies,
            form_limit: DEFAULT_FORM_LIMIT,
        }
    }

    pub fn with_form_limit(mut self, form_limit: usize) -> Self {
        self.form_limit = form_limit;
        self
    }

    /// Hand a token to the client as cookie and response header.
    ///
    /// The cookie is readable by scripts so they can echo it in the header.
    pub fn issue(&self, headers: &mut HeaderMap, token: &CsrfToken) {
        let spec = self.cookies.build(
            CSRF_COOKIE_NAME,
            token.as_str(),
            &CookieOverrides {
                http_only: Some(false),
                same_site: Some(SameSite::Strict),
                ..CookieOverrides::default()
            },
        );
        self.cookies.set(headers, &spec);

        if let Ok(value) = HeaderValue::from_str(token.as_str()) {
            headers.insert(CSRF_HEADER_NAME, value);
        }
    }

    /// Check the submitted token against the cookie.
    pub fn verify(&self, headers: &HeaderMap, submitted: Option<&str>) -> Result<(), CsrfError> {
        let expected = self
            .cookies
            .get(headers, CSRF_COOKIE_NAME)
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::Missing)?;
        let submitted = submitted
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::Missing)?;

        if tokens_match(expected, submitted) {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }

    /// Pull the submitted token from the header, or from the body of a
    /// form. The request is returned with its body intact.
    async fn submitted_token(
        &self,
        request: Request,
    ) -> Result<(Request, Option<String>), CsrfError> {
        if let Some(value) = request.headers().get(CSRF_HEADER_NAME) {
            let token = value.to_str().ok().map(str::to_string);
            return Ok((request, token));
        }

        let Some(kind) = form_kind(request.headers()) else {
            return Ok((request, None));
        };

        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, self.form_limit)
            .await
            .map_err(|_| CsrfError::UnreadableBody)?;
        let token = match kind {
            FormKind::UrlEncoded => url::form_urlencoded::parse(&bytes)
                .find(|(key, _)| key == CSRF_FORM_FIELD)
                .map(|(_, value)| value.into_owned()),
            FormKind::Multipart => multipart_field(&parts.headers, bytes.clone()).await?,
        };

        Ok((Request::from_parts(parts, Body::from(bytes)), token))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormKind {
    UrlEncoded,
    Multipart,
}

fn form_kind(headers: &HeaderMap) -> Option<FormKind> {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())?
        .trim();

    if mime.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
        Some(FormKind::UrlEncoded)
    } else if mime.eq_ignore_ascii_case(MULTIPART_CONTENT_TYPE) {
        Some(FormKind::Multipart)
    } else {
        None
    }
}

/// Read the token field out of an already buffered multipart body.
async fn multipart_field(headers: &HeaderMap, bytes: Bytes) -> Result<Option<String>, CsrfError> {
    let mut request = Request::new(Body::from(bytes));
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type.clone());
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|_| CsrfError::UnreadableBody)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| CsrfError::UnreadableBody)?
    {
        if field.name() == Some(CSRF_FORM_FIELD) {
            let value = field.text().await.map_err(|_| CsrfError::UnreadableBody)?;
            return Ok(Some(value));
        }
    }

    Ok(None)
}

/// CSRF middleware. Mount outside [`auth_gate`](crate::auth::auth_gate).
pub async fn csrf_guard(
    State(guard): State<Arc<CsrfGuard>>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_safe_method(request.method()) {
        let token = CsrfToken::generate();
        request.extensions_mut().insert(token.clone());
        let mut response = next.run(request).await;
        guard.issue(response.headers_mut(), &token);
        return response;
    }

    let path = request.uri().path().to_string();

    if guard.config.is_bootstrap_path(&path) {
        let mut response = next.run(request).await;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            debug!(path = %path, "Rotating CSRF token");
            guard.issue(response.headers_mut(), &CsrfToken::generate());
        }
        return response;
    }

    let method = request.method().clone();
    let (mut request, submitted) = match guard.submitted_token(request).await {
        Ok(result) => result,
        Err(e) => {
            warn!(method = %method, path = %path, reason = %e, "CSRF check failed");
            return CsrfRejection(e).into_response();
        }
    };

    if let Err(e) = guard.verify(request.headers(), submitted.as_deref()) {
        warn!(method = %method, path = %path, reason = %e, "CSRF check failed");
        return CsrfRejection(e).into_response();
    }

    if let Some(token) = guard.cookies.get(request.headers(), CSRF_COOKIE_NAME) {
        let token = CsrfToken(token.to_string());
        request.extensions_mut().insert(token);
    }
    next.run(request).await
}
