//! Cookie building, parsing and deletion.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};

use crate::config::{CookieDefaults, SecurityConfig};

/// Cookie name for the bearer-formatted auth token (7 days).
pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// Cookie name for the signed session record (1 hour by default).
pub const SESSION_COOKIE_NAME: &str = "session_data";

/// Cookie name for the double-submit CSRF token.
pub const CSRF_COOKIE_NAME: &str = "csrf_token";

const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Full attribute set of one `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    /// Seconds. Zero omits the attribute (browser-session cookie), negative deletes.
    pub max_age: i64,
    pub path: String,
    /// Empty means a host-only cookie
    pub domain: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl CookieSpec {
    pub fn is_deletion(&self) -> bool {
        self.max_age < 0 && self.value.is_empty()
    }

    /// Render as a `Set-Cookie` header value.
    ///
    /// Values containing a space or comma are quoted, so `Bearer <jwt>` survives.
    pub fn to_header_value(&self) -> String {
        let value = if self.value.contains(|c: char| c == ' ' || c == ',') {
            format!("\"{}\"", self.value)
        } else {
            self.value.clone()
        };

        let mut cookie = format!("{}={}; Path={}", self.name, value, self.path);
        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }
        if self.max_age < 0 {
            cookie.push_str(&format!("; Max-Age=0; Expires={}", EPOCH_EXPIRES));
        } else if self.max_age > 0 {
            cookie.push_str(&format!("; Max-Age={}", self.max_age));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}", self.same_site.as_str()));
        cookie
    }
}

/// Per-cookie changes on top of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CookieOverrides {
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
}

impl CookieOverrides {
    /// Short-lived profile used for session-scoped cookies.
    pub fn session(lifetime: Duration) -> Self {
        Self {
            max_age: Some(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
            ..Self::default()
        }
    }
}

/// Builds, applies, reads and deletes cookies with secure defaults.
#[derive(Debug, Clone)]
pub struct CookieManager {
    defaults: CookieDefaults,
}

impl CookieManager {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            defaults: config.cookie.clone(),
        }
    }

    pub fn build(&self, name: &str, value: &str, overrides: &CookieOverrides) -> CookieSpec {
        let defaults = &self.defaults;
        CookieSpec {
            name: name.to_string(),
            value: value.to_string(),
            max_age: overrides.max_age.unwrap_or(defaults.max_age),
            path: overrides.path.clone().unwrap_or_else(|| defaults.path.clone()),
            domain: overrides
                .domain
                .clone()
                .unwrap_or_else(|| defaults.domain.clone()),
            secure: overrides.secure.unwrap_or(defaults.secure),
            http_only: overrides.http_only.unwrap_or(defaults.http_only),
            same_site: overrides.same_site.unwrap_or(defaults.same_site),
        }
    }

    /// Append the cookie to the outgoing response headers.
    pub fn set(&self, headers: &mut HeaderMap, spec: &CookieSpec) {
        match HeaderValue::from_str(&spec.to_header_value()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(cookie = %spec.name, "Cookie value is not a valid header"),
        }
    }

    pub fn get<'a>(&self, headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        get_cookie(headers, name)
    }

    /// Spec that removes `name` from the client.
    pub fn deletion(&self, name: &str) -> CookieSpec {
        CookieSpec {
            max_age: -1,
            ..self.build(name, "", &CookieOverrides::default())
        }
    }

    /// Expire the cookie. Emitted whether or not the client holds it.
    pub fn delete(&self, headers: &mut HeaderMap, name: &str) {
        self.set(headers, &self.deletion(name));
    }

    pub fn set_auth_cookie(&self, headers: &mut HeaderMap, token: &str) {
        let spec = self.build(AUTH_COOKIE_NAME, token, &CookieOverrides::default());
        self.set(headers, &spec);
    }

    /// Remove every authentication-related cookie.
    pub fn clear_auth_cookies(&self, headers: &mut HeaderMap) {
        self.delete(headers, AUTH_COOKIE_NAME);
        self.delete(headers, SESSION_COOKIE_NAME);
    }
}

/// Extract a cookie value from the Cookie header, unquoting it if needed.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                return Some(value);
            }
        }
    }
    None
}
