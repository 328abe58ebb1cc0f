//! Idle-timeout session tracking.
//!
//! The record travels in the signed `session_data` cookie. When the cookie is
//! missing it is re-derived from the auth token with `last_seen` set to the
//! token's issue time, so an old token alone can never look fresh.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use tracing::{debug, info};

use super::cookie::{CookieManager, CookieOverrides, SESSION_COOKIE_NAME};
use crate::jwt::{Claims, TokenError, TokenService, unix_now};

/// Per-request session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub email: String,
    /// Unix seconds
    pub login_time: u64,
    /// Unix seconds
    pub last_seen: u64,
}

impl SessionRecord {
    /// Derive a record from token claims alone.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            login_time: claims.iat,
            last_seen: claims.iat,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    tokens: Arc<TokenService>,
    cookies: CookieManager,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(tokens: Arc<TokenService>, cookies: CookieManager, idle_timeout: Duration) -> Self {
        Self {
            tokens,
            cookies,
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Start a session at login time.
    pub fn create(&self, user_id: &str, email: &str) -> SessionRecord {
        self.create_at(user_id, email, unix_now())
    }

    pub fn create_at(&self, user_id: &str, email: &str, now: u64) -> SessionRecord {
        SessionRecord {
            user_id: user_id.to_string(),
            email: email.to_string(),
            login_time: now,
            last_seen: now,
        }
    }

    /// Mark the session as seen now.
    pub fn refresh(&self, record: SessionRecord) -> SessionRecord {
        self.refresh_at(record, unix_now())
    }

    pub fn refresh_at(&self, record: SessionRecord, now: u64) -> SessionRecord {
        SessionRecord {
            last_seen: now.max(record.last_seen),
            ..record
        }
    }

    pub fn is_expired(&self, record: &SessionRecord, idle_timeout: Duration) -> bool {
        self.is_expired_at(record, idle_timeout, unix_now())
    }

    /// True once more than `idle_timeout` has passed since `last_seen`.
    pub fn is_expired_at(&self, record: &SessionRecord, idle_timeout: Duration, now: u64) -> bool {
        now.saturating_sub(record.last_seen) > idle_timeout.as_secs()
    }

    /// Recover the record for a validated token.
    ///
    /// A session cookie that fails verification or belongs to another user is
    /// ignored in favour of the token-derived record.
    pub fn load_at(&self, headers: &HeaderMap, claims: &Claims, now: u64) -> SessionRecord {
        let Some(token) = self.cookies.get(headers, SESSION_COOKIE_NAME) else {
            return SessionRecord::from_claims(claims);
        };

        match self.tokens.verify_session_at(token, now) {
            Ok(record) if record.user_id == claims.sub => record,
            Ok(_) => {
                debug!(user_id = %claims.sub, "Session cookie belongs to another user");
                SessionRecord::from_claims(claims)
            }
            Err(e) => {
                debug!(user_id = %claims.sub, error = %e, "Ignoring invalid session cookie");
                SessionRecord::from_claims(claims)
            }
        }
    }

    /// Write the signed record to the response as the session cookie.
    pub fn store(&self, headers: &mut HeaderMap, record: &SessionRecord) -> Result<(), TokenError> {
        let token = self.tokens.sign_session(record)?;
        let spec = self.cookies.build(
            SESSION_COOKIE_NAME,
            &token,
            &CookieOverrides::session(self.idle_timeout),
        );
        self.cookies.set(headers, &spec);
        Ok(())
    }

    /// End the session: drop the record and delete the auth and session cookies.
    pub fn destroy(&self, headers: &mut HeaderMap, record: Option<SessionRecord>) {
        self.cookies.clear_auth_cookies(headers);
        match record {
            Some(record) => info!(user_id = %record.user_id, email = %record.email, "Session destroyed"),
            None => info!("Session destroyed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use axum::http::{HeaderValue, header};

    const NOW: u64 = 1_700_000_000;
    const IDLE: Duration = Duration::from_secs(3600);

    fn store() -> SessionStore {
        let config = SecurityConfig::new(b"session-test-secret-0123456789abcdef".to_vec()).unwrap();
        SessionStore::new(
            Arc::new(TokenService::new(&config)),
            CookieManager::new(&config),
            config.idle_timeout,
        )
    }

    fn claims(user_id: &str, iat: u64) -> Claims {
        let config = SecurityConfig::new(b"session-test-secret-0123456789abcdef".to_vec()).unwrap();
        let tokens = TokenService::new(&config);
        let token = tokens
            .issue_at(user_id, &format!("{}@example.com", user_id), iat)
            .unwrap();
        tokens.validate_at(&token, iat).unwrap()
    }

    /// Turn the Set-Cookie written by `store` into a request Cookie header.
    fn echo_session_cookie(response: &HeaderMap) -> HeaderMap {
        let set_cookie = response.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        let pair = set_cookie.split(';').next().unwrap();
        let mut request = HeaderMap::new();
        request.insert(header::COOKIE, HeaderValue::from_str(pair).unwrap());
        request
    }

    #[test]
    fn test_create_sets_both_times() {
        let record = store().create_at("u1", "u1@example.com", NOW);
        assert_eq!(record.login_time, NOW);
        assert_eq!(record.last_seen, NOW);
        assert_eq!(record.user_id, "u1");
    }

    #[test]
    fn test_refresh_moves_last_seen_only() {
        let store = store();
        let record = store.create_at("u1", "u1@example.com", NOW);
        let refreshed = store.refresh_at(record, NOW + 120);

        assert_eq!(refreshed.login_time, NOW);
        assert_eq!(refreshed.last_seen, NOW + 120);
    }

    #[test]
    fn test_idle_timeout_boundary() {
        let store = store();
        let stale = SessionRecord {
            last_seen: NOW - (IDLE.as_secs() + 1),
            ..store.create_at("u1", "u1@example.com", NOW - 7200)
        };
        let fresh = store.create_at("u1", "u1@example.com", NOW);
        let exactly_idle = SessionRecord {
            last_seen: NOW - IDLE.as_secs(),
            ..fresh.clone()
        };

        assert!(store.is_expired_at(&stale, IDLE, NOW));
        assert!(!store.is_expired_at(&fresh, IDLE, NOW));
        assert!(!store.is_expired_at(&exactly_idle, IDLE, NOW));
    }

    #[test]
    fn test_wall_clock_variants() {
        let store = store();
        let record = store.create("u1", "u1@example.com");
        assert!(!store.is_expired(&record, IDLE));
        let refreshed = store.refresh(record.clone());
        assert!(refreshed.last_seen >= record.last_seen);
    }

    #[test]
    fn test_load_without_cookie_derives_from_token() {
        let store = store();
        let claims = claims("u1", NOW - 10);

        let record = store.load_at(&HeaderMap::new(), &claims, NOW);
        assert_eq!(record.login_time, NOW - 10);
        assert_eq!(record.last_seen, NOW - 10);
    }

    #[test]
    fn test_stale_token_without_session_cookie_is_idle() {
        let store = store();
        let claims = claims("u1", NOW - 2 * IDLE.as_secs());

        let record = store.load_at(&HeaderMap::new(), &claims, NOW);
        assert!(store.is_expired_at(&record, IDLE, NOW));
    }

    #[test]
    fn test_store_then_load() {
        let store = store();
        let claims = claims("u1", NOW - 7200);
        let record = SessionRecord {
            last_seen: NOW - 60,
            ..SessionRecord::from_claims(&claims)
        };

        let mut response = HeaderMap::new();
        store.store(&mut response, &record).unwrap();
        let set_cookie = response.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("session_data="));
        assert!(set_cookie.contains("Max-Age=3600"));
        assert!(set_cookie.contains("HttpOnly"));

        let loaded = store.load_at(&echo_session_cookie(&response), &claims, NOW);
        assert_eq!(loaded, record);
        assert!(!store.is_expired_at(&loaded, IDLE, NOW));
    }

    #[test]
    fn test_session_cookie_of_other_user_ignored() {
        let store = store();
        let mallory = store.create_at("mallory", "m@example.com", NOW);
        let mut response = HeaderMap::new();
        store.store(&mut response, &mallory).unwrap();

        let claims = claims("u1", NOW - 30);
        let loaded = store.load_at(&echo_session_cookie(&response), &claims, NOW);
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.last_seen, NOW - 30);
    }

    #[test]
    fn test_forged_session_cookie_ignored() {
        let store = store();
        let claims = claims("u1", NOW - 30);
        let mut request = HeaderMap::new();
        request.insert(
            header::COOKIE,
            HeaderValue::from_static("session_data=eyJhbGciOiJIUzI1NiJ9.e30.forged"),
        );

        let loaded = store.load_at(&request, &claims, NOW);
        assert_eq!(loaded, SessionRecord::from_claims(&claims));
    }

    #[test]
    fn test_destroy_clears_cookies() {
        let store = store();
        let mut response = HeaderMap::new();
        let record = store.create_at("u1", "u1@example.com", NOW);
        store.destroy(&mut response, Some(record));

        let cleared: Vec<_> = response
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
    }
}
