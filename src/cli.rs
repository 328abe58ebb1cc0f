//! Command-line arguments, secret loading and logging setup.
//!
//! [`SecurityArgs`] is meant to be flattened into a host binary's own
//! parser with `#[command(flatten)]`.

use std::time::Duration;

use tracing::info;

use crate::config::{
    ConfigError, DEFAULT_IDLE_TIMEOUT, DEFAULT_LOGIN_PATH, DEFAULT_LOOKUP_TIMEOUT, SecurityConfig,
};

const SECRET_ENV_VAR: &str = "JWT_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SecurityArgs {
    /// Path to file containing the token signing secret. Prefer the JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Seconds of inactivity before a session expires
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub idle_timeout_secs: u64,

    /// Milliseconds to wait for the user lookup before rejecting
    #[arg(long, default_value_t = DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64)]
    pub lookup_timeout_ms: u64,

    /// Where unauthenticated page requests are redirected
    #[arg(long, default_value = DEFAULT_LOGIN_PATH, value_parser = validate_login_path)]
    pub login_path: String,

    /// Domain attribute for cookies. Host-only when omitted
    #[arg(long)]
    pub cookie_domain: Option<String>,

    /// Drop the Secure flag from cookies (plain-HTTP local development only)
    #[arg(long)]
    pub insecure_cookies: bool,

    /// Log output format
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_login_path(s: &str) -> Result<String, String> {
    if !s.starts_with('/') {
        return Err(format!("Login path must start with '/': {}", s));
    }

    if s.chars().any(|c| !c.is_ascii() || c.is_whitespace()) {
        return Err(format!("Login path contains invalid characters: {}", s));
    }

    Ok(s.to_string())
}

impl SecurityArgs {
    /// Load the secret and build the configuration.
    pub fn into_config(self) -> Result<SecurityConfig, ConfigError> {
        let secret = load_signing_secret(self.jwt_secret_file.as_deref())?;
        self.into_config_with_secret(secret)
    }

    pub fn into_config_with_secret(
        self,
        secret: impl Into<Vec<u8>>,
    ) -> Result<SecurityConfig, ConfigError> {
        let mut config = SecurityConfig::new(secret)?
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_lookup_timeout(Duration::from_millis(self.lookup_timeout_ms))
            .with_login_path(self.login_path)?;

        if let Some(domain) = self.cookie_domain {
            config = config.with_cookie_domain(domain);
        }
        if self.insecure_cookies {
            config = config.with_insecure_cookies();
        }

        info!(
            idle_timeout_secs = config.idle_timeout.as_secs(),
            login_path = %config.login_path,
            secure_cookies = config.cookie.secure,
            "Security configuration loaded"
        );
        Ok(config)
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the signing secret from `JWT_SECRET` or, failing that, from a file.
///
/// The environment is only read. A host that wants the variable gone calls
/// [`clear_secret_env`] from its own startup.
pub fn load_signing_secret(secret_file: Option<&str>) -> Result<Vec<u8>, ConfigError> {
    resolve_secret(std::env::var(SECRET_ENV_VAR).ok(), secret_file)
}

/// Remove `JWT_SECRET` from the process environment.
///
/// # Safety
///
/// No other thread may read or write the environment while this runs. Call it
/// from `main` before starting a multi-threaded runtime.
pub unsafe fn clear_secret_env() {
    // SAFETY: upheld by the caller.
    unsafe { std::env::remove_var(SECRET_ENV_VAR) };
}

fn resolve_secret(
    env_secret: Option<String>,
    secret_file: Option<&str>,
) -> Result<Vec<u8>, ConfigError> {
    if let Some(secret) = env_secret {
        return Ok(secret.into_bytes());
    }

    match secret_file {
        Some(path) => read_secret_file(path),
        None => Err(ConfigError::MissingSecret),
    }
}

fn read_secret_file(path: &str) -> Result<Vec<u8>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::SecretFile {
        path: path.to_string(),
        source,
    })?;
    Ok(content.trim().as_bytes().to_vec())
}
