//! Token-based authentication for axum routers.
//!
//! A signed token travels either in the `auth_token` cookie (safe
//! navigations) or in an `Authorization: Bearer` header (everything else).
//! A signed `session_data` cookie tracks idle time on top of the token's own
//! expiry. The [`auth_gate`] middleware ties the pieces together.

mod cookie;
mod errors;
mod gate;
mod lookup;
mod policy;
mod session;
mod types;

pub use cookie::{
    AUTH_COOKIE_NAME, CSRF_COOKIE_NAME, CookieManager, CookieOverrides, CookieSpec,
    SESSION_COOKIE_NAME, SameSite, get_cookie,
};
pub use errors::{AuthError, Rejection};
pub use gate::{AuthGate, Authenticated, GateState, auth_gate};
pub use lookup::{LookupError, UserLookup};
pub use policy::{
    Credential, CredentialSource, GatePolicy, RejectionStyle, extract_credential,
    is_safe_method, parse_bearer, policy_for,
};
pub use session::{SessionRecord, SessionStore};
pub use types::{AuthenticatedContext, User};
