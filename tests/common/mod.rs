#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use elib_gate::{
    AuthGate, AuthenticatedContext, CsrfGuard, CsrfToken, SecurityConfig, User, UserLookup,
    auth::LookupError, gated, secure,
};

pub const SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";

pub const ALICE_ID: &str = "u1";
pub const ALICE_EMAIL: &str = "u1@example.com";

/// In-memory user directory with optional slowness and failure.
#[derive(Default)]
pub struct MemoryUsers {
    users: HashMap<String, User>,
    delay: Option<Duration>,
    fail: bool,
}

impl MemoryUsers {
    pub fn with_alice() -> Self {
        Self::default().with_user(ALICE_ID, ALICE_EMAIL)
    }

    pub fn with_user(mut self, id: &str, email: &str) -> Self {
        self.users.insert(
            id.to_string(),
            User {
                id: id.to_string(),
                email: email.to_string(),
            },
        );
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl UserLookup for MemoryUsers {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, LookupError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(LookupError::new("connection refused"));
        }
        Ok(self.users.get(user_id).cloned())
    }
}

pub struct TestApp {
    pub router: Router,
    pub gate: Arc<AuthGate<MemoryUsers>>,
}

pub fn test_config() -> SecurityConfig {
    SecurityConfig::new(SECRET).unwrap()
}

pub fn create_test_app(users: MemoryUsers) -> TestApp {
    create_test_app_with_config(test_config(), users)
}

pub fn create_test_app_with_config(config: SecurityConfig, users: MemoryUsers) -> TestApp {
    let config = Arc::new(config);
    let gate = Arc::new(AuthGate::new(config.clone(), users));
    let csrf = Arc::new(CsrfGuard::new(config));

    let protected = Router::new()
        .route(
            "/notes",
            get(list_notes).post(create_note).options(notes_options),
        )
        .route("/user/logout", post(logout))
        .with_state(gate.clone());
    let protected = gated(protected, gate.clone());

    let public = Router::new()
        .route("/user/login", get(login_page).post(login))
        .route("/user/register", post(register_fails))
        .with_state(gate.clone());

    let router = secure(Router::new().merge(protected).merge(public), csrf);
    TestApp { router, gate }
}

async fn list_notes(user: AuthenticatedContext) -> String {
    format!("notes of {}", user.email())
}

async fn create_note(user: AuthenticatedContext) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({"user_id": user.user_id()})),
    )
}

async fn notes_options(user: AuthenticatedContext) -> String {
    user.user_id().to_string()
}

async fn logout(
    State(gate): State<Arc<AuthGate<MemoryUsers>>>,
    request_headers: HeaderMap,
) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    gate.sign_out(&request_headers, &mut headers);
    (headers, Redirect::to("/user/login"))
}

async fn login_page(token: CsrfToken) -> String {
    format!("<input type=\"hidden\" name=\"csrf_token\" value=\"{}\">", token.as_str())
}

async fn login(State(gate): State<Arc<AuthGate<MemoryUsers>>>) -> Response {
    let mut headers = HeaderMap::new();
    match gate.sign_in(&mut headers, ALICE_ID, ALICE_EMAIL) {
        Ok(_) => (headers, Redirect::to("/notes")).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn register_fails() -> StatusCode {
    StatusCode::CONFLICT
}

/// `auth_token` cookie header value for a bearer token from `TokenService::issue`.
pub fn auth_cookie(bearer: &str) -> String {
    format!("auth_token=\"{}\"", bearer)
}

/// Strip the `Bearer ` prefix.
pub fn raw_token(bearer: &str) -> &str {
    bearer.strip_prefix("Bearer ").unwrap()
}

pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// The `Set-Cookie` line for `name`, if any.
pub fn find_set_cookie(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    set_cookies(response)
        .into_iter()
        .find(|c| c.starts_with(&prefix))
}

/// Value part of a `Set-Cookie` line, quotes kept.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

pub fn is_deletion(set_cookie: &str) -> bool {
    set_cookie.contains("Max-Age=0") && set_cookie.split(';').next().unwrap().ends_with('=')
}

pub async fn body_string(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}
