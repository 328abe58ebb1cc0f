//! The authentication gate middleware.
//!
//! Every gated request walks `Start → Extracting → Validating` and ends in
//! either `Authenticated` or `Rejected`. Which credential is read and how a
//! failure is answered comes from [`policy_for`].

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, warn};

use super::cookie::{AUTH_COOKIE_NAME, CookieManager};
use super::errors::{AuthError, Rejection};
use super::lookup::UserLookup;
use super::policy::{CredentialSource, GatePolicy, extract_credential, policy_for};
use super::session::{SessionRecord, SessionStore};
use super::types::AuthenticatedContext;
use crate::config::SecurityConfig;
use crate::jwt::{TokenError, TokenService, unix_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Start,
    Extracting,
    Validating,
    Authenticated,
    Rejected,
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::Authenticated | GateState::Rejected)
    }

    pub fn can_transition_to(self, next: GateState) -> bool {
        matches!(
            (self, next),
            (GateState::Start, GateState::Extracting)
                | (GateState::Extracting, GateState::Validating)
                | (GateState::Extracting, GateState::Rejected)
                | (GateState::Validating, GateState::Authenticated)
                | (GateState::Validating, GateState::Rejected)
        )
    }
}

/// Per-request state tracker. Logs each step at debug level.
struct Progress<'a> {
    state: GateState,
    method: &'a Method,
}

impl<'a> Progress<'a> {
    fn start(method: &'a Method) -> Self {
        Self {
            state: GateState::Start,
            method,
        }
    }

    fn advance(&mut self, next: GateState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal gate transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(method = %self.method, from = ?self.state, to = ?next, "Gate transition");
        self.state = next;
    }

    fn reject(&mut self, reason: AuthError) -> AuthError {
        self.advance(GateState::Rejected);
        debug_assert!(self.state.is_terminal());
        reason
    }
}

/// Outcome of a successful pass through the gate.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub context: AuthenticatedContext,
    /// Refreshed record to write back on the response
    pub session: SessionRecord,
}

/// Shared gate state, mounted with `middleware::from_fn_with_state`.
pub struct AuthGate<L> {
    config: Arc<SecurityConfig>,
    tokens: Arc<TokenService>,
    cookies: CookieManager,
    sessions: SessionStore,
    users: L,
}

impl<L: UserLookup> AuthGate<L> {
    pub fn new(config: Arc<SecurityConfig>, users: L) -> Self {
        let tokens = Arc::new(TokenService::new(&config));
        let cookies = CookieManager::new(&config);
        let sessions = SessionStore::new(tokens.clone(), cookies.clone(), config.idle_timeout);
        Self {
            config,
            tokens,
            cookies,
            sessions,
            users,
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn cookies(&self) -> &CookieManager {
        &self.cookies
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Log a user in: set the auth cookie and start a fresh session.
    ///
    /// Called by login and register handlers once credentials are checked.
    pub fn sign_in(
        &self,
        headers: &mut HeaderMap,
        user_id: &str,
        email: &str,
    ) -> Result<SessionRecord, TokenError> {
        self.sign_in_at(headers, user_id, email, unix_now())
    }

    pub fn sign_in_at(
        &self,
        headers: &mut HeaderMap,
        user_id: &str,
        email: &str,
        now: u64,
    ) -> Result<SessionRecord, TokenError> {
        let token = self.tokens.issue_at(user_id, email, now)?;
        let record = self.sessions.create_at(user_id, email, now);
        self.cookies.set_auth_cookie(headers, &token);
        self.sessions.store(headers, &record)?;
        info!(user_id = %user_id, "User signed in");
        Ok(record)
    }

    /// Log the caller out by expiring the auth and session cookies.
    pub fn sign_out(&self, request_headers: &HeaderMap, response_headers: &mut HeaderMap) {
        let now = unix_now();
        let record = self
            .cookies
            .get(request_headers, AUTH_COOKIE_NAME)
            .and_then(|token| self.tokens.validate_at(token, now).ok())
            .map(|claims| self.sessions.load_at(request_headers, &claims, now));
        self.sessions.destroy(response_headers, record);
    }

    pub async fn authenticate(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<Authenticated, AuthError> {
        self.authenticate_at(method, headers, unix_now()).await
    }

    /// Run the gate against request headers at an explicit clock.
    pub async fn authenticate_at(
        &self,
        method: &Method,
        headers: &HeaderMap,
        now: u64,
    ) -> Result<Authenticated, AuthError> {
        let policy = policy_for(method);
        let mut progress = Progress::start(method);

        progress.advance(GateState::Extracting);
        let credential = match extract_credential(headers, policy.source) {
            Ok(credential) => credential,
            Err(e) => return Err(progress.reject(e)),
        };

        progress.advance(GateState::Validating);
        let claims = match self.tokens.validate_at(credential.token, now) {
            Ok(claims) => claims,
            Err(e) => return Err(progress.reject(e.into())),
        };

        let lookup = tokio::time::timeout(
            self.config.lookup_timeout,
            self.users.find_user(&claims.sub),
        )
        .await;
        let user = match lookup {
            Ok(Ok(Some(user))) => user,
            Ok(Ok(None)) => return Err(progress.reject(AuthError::UserNotFound)),
            Ok(Err(e)) => return Err(progress.reject(AuthError::LookupFailed(e.to_string()))),
            Err(_) => return Err(progress.reject(AuthError::LookupTimedOut)),
        };

        let record = self.sessions.load_at(headers, &claims, now);
        if self
            .sessions
            .is_expired_at(&record, self.sessions.idle_timeout(), now)
        {
            return Err(progress.reject(AuthError::SessionIdleExpired));
        }
        let session = self.sessions.refresh_at(record, now);

        progress.advance(GateState::Authenticated);
        debug_assert!(progress.state.is_terminal());
        Ok(Authenticated {
            context: AuthenticatedContext::new(user.id, user.email),
            session,
        })
    }

    /// Build the client response for a failed pass.
    pub fn reject(&self, policy: GatePolicy, reason: &AuthError) -> Rejection {
        let mut headers = HeaderMap::new();
        if clears_auth_cookies(policy.source, reason) {
            self.cookies.clear_auth_cookies(&mut headers);
        }
        Rejection::new(policy.rejection, self.config.login_path.as_str()).with_headers(headers)
    }
}

/// Whether a rejection should also expire the client's auth cookies.
fn clears_auth_cookies(source: CredentialSource, reason: &AuthError) -> bool {
    *reason == AuthError::SessionIdleExpired
        || (source == CredentialSource::Cookie && reason.invalidates_cookie())
}

/// Authentication middleware.
///
/// On success the [`AuthenticatedContext`] is inserted into the request
/// extensions and the refreshed session cookie is appended to the response.
pub async fn auth_gate<L: UserLookup>(
    State(gate): State<Arc<AuthGate<L>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let policy = policy_for(&method);

    match gate.authenticate(&method, request.headers()).await {
        Ok(Authenticated { context, session }) => {
            let user_id = context.user_id().to_string();
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;

            if !gate.config.is_bootstrap_path(&path) {
                if let Err(e) = gate.sessions.store(response.headers_mut(), &session) {
                    error!(user_id = %user_id, error = %e, "Failed to write session cookie");
                }
            }
            response
        }
        Err(reason) => {
            if reason.is_backend_failure() {
                error!(method = %method, path = %path, reason = %reason, "Authentication backend failure");
            } else {
                warn!(method = %method, path = %path, reason = %reason, "Request rejected");
            }
            gate.reject(policy, &reason).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(GateState::Start.can_transition_to(GateState::Extracting));
        assert!(GateState::Extracting.can_transition_to(GateState::Rejected));
        assert!(GateState::Validating.can_transition_to(GateState::Authenticated));

        assert!(!GateState::Start.can_transition_to(GateState::Authenticated));
        assert!(!GateState::Extracting.can_transition_to(GateState::Authenticated));
        assert!(!GateState::Rejected.can_transition_to(GateState::Validating));
        assert!(!GateState::Authenticated.can_transition_to(GateState::Rejected));

        assert!(GateState::Rejected.is_terminal());
        assert!(!GateState::Validating.is_terminal());
    }

    #[test]
    fn test_cookie_clearing_rules() {
        use CredentialSource::*;

        assert!(clears_auth_cookies(Cookie, &AuthError::InvalidSignature));
        assert!(clears_auth_cookies(Cookie, &AuthError::Expired));
        assert!(clears_auth_cookies(Cookie, &AuthError::UserNotFound));
        assert!(!clears_auth_cookies(Cookie, &AuthError::MissingCredential));
        assert!(!clears_auth_cookies(Cookie, &AuthError::LookupTimedOut));

        assert!(!clears_auth_cookies(AuthorizationHeader, &AuthError::Expired));
        assert!(clears_auth_cookies(
            AuthorizationHeader,
            &AuthError::SessionIdleExpired
        ));
    }
}
