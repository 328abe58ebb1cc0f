//! Security configuration built once at startup.
//!
//! A `SecurityConfig` is immutable after construction and shared across all
//! request handlers behind an `Arc`.

use std::time::Duration;

use crate::auth::SameSite;

/// Minimum accepted length of the signing secret in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Issuer written into and required from every token.
pub const DEFAULT_ISSUER: &str = "elib-api";

/// Where rejected GET/HEAD requests are sent.
pub const DEFAULT_LOGIN_PATH: &str = "/user/login";

/// Token lifetime: 7 days
pub const TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Default idle timeout: 1 hour
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default budget for the user lookup before the gate fails closed.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Login, register and logout: reachable without a prior CSRF token, and
/// never refreshing the session themselves.
pub const DEFAULT_BOOTSTRAP_PATHS: [&str; 3] = ["/user/login", "/user/register", "/user/logout"];

/// Default attributes applied to every cookie the crate writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDefaults {
    /// Max-Age in seconds
    pub max_age: i64,
    pub path: String,
    /// Empty means a host-only cookie
    pub domain: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieDefaults {
    fn default() -> Self {
        Self {
            max_age: TOKEN_DURATION_SECS as i64,
            path: "/".to_string(),
            domain: String::new(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

/// Errors raised while building a [`SecurityConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("signing secret is shorter than {min} bytes", min = MIN_SECRET_LENGTH)]
    SecretTooShort,
    #[error("signing secret is required (set JWT_SECRET or use --jwt-secret-file)")]
    MissingSecret,
    #[error("failed to read secret file {path}: {source}")]
    SecretFile {
        path: String,
        source: std::io::Error,
    },
    #[error("login path must start with '/': {0}")]
    InvalidLoginPath(String),
}

/// Process-wide security settings.
#[derive(Clone)]
pub struct SecurityConfig {
    signing_secret: Vec<u8>,
    pub issuer: String,
    pub cookie: CookieDefaults,
    pub idle_timeout: Duration,
    pub lookup_timeout: Duration,
    pub login_path: String,
    pub bootstrap_paths: Vec<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("signing_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("cookie", &self.cookie)
            .field("idle_timeout", &self.idle_timeout)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("login_path", &self.login_path)
            .field("bootstrap_paths", &self.bootstrap_paths)
            .finish()
    }
}

impl SecurityConfig {
    /// Create a configuration with default settings around the given secret.
    pub fn new(signing_secret: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let signing_secret = signing_secret.into();
        if signing_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort);
        }

        Ok(Self {
            signing_secret,
            issuer: DEFAULT_ISSUER.to_string(),
            cookie: CookieDefaults::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            bootstrap_paths: DEFAULT_BOOTSTRAP_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        })
    }

    pub fn signing_secret(&self) -> &[u8] {
        &self.signing_secret
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Result<Self, ConfigError> {
        let login_path = login_path.into();
        if !login_path.starts_with('/') {
            return Err(ConfigError::InvalidLoginPath(login_path));
        }
        self.login_path = login_path;
        Ok(self)
    }

    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie.domain = domain.into();
        self
    }

    /// Drop the Secure attribute. Only meant for plain-HTTP local development.
    pub fn with_insecure_cookies(mut self) -> Self {
        self.cookie.secure = false;
        self
    }

    pub fn with_bootstrap_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.bootstrap_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `path` is one of the session bootstrap endpoints.
    pub fn is_bootstrap_path(&self, path: &str) -> bool {
        self.bootstrap_paths.iter().any(|p| p == path)
    }
}
