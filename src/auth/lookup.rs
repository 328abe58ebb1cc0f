//! The user directory the gate consults after a token validates.

use std::future::Future;

use super::types::User;

/// Backend failure reported by a [`UserLookup`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct LookupError {
    message: String,
}

impl LookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolve a token subject to a live account.
///
/// `Ok(None)` means the account no longer exists. The gate treats both that
/// and `Err` as a rejection.
pub trait UserLookup: Send + Sync + 'static {
    fn find_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<User>, LookupError>> + Send;
}
