//! JWT token issuing and validation.
//!
//! Two token types share one HS256 key: auth tokens carried in the
//! `auth_token` cookie or the `Authorization` header, and session tokens that
//! carry a signed [`SessionRecord`] in the `session_data` cookie.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::SessionRecord;
use crate::config::{SecurityConfig, TOKEN_DURATION_SECS};

/// Prefix of every issued auth token.
pub const BEARER_PREFIX: &str = "Bearer ";

/// The only algorithm issued or accepted.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Token type, so a session token can never stand in for an auth token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Identity token (7 days)
    Auth,
    /// Signed session record, refreshed on every authenticated request
    Session,
}

/// Claims of an auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// User id, always equal to `sub`
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Not before (Unix timestamp)
    pub nbf: u64,
    /// Expiration time (Unix timestamp), exclusive
    pub exp: u64,
    /// Issuer
    pub iss: String,
}

/// Claims of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    email: String,
    login_time: u64,
    last_seen: u64,
    #[serde(rename = "typ")]
    token_type: TokenType,
    iat: u64,
    nbf: u64,
    exp: u64,
    iss: String,
}

trait TypedClaims {
    fn token_type(&self) -> TokenType;
    fn nbf(&self) -> u64;
    fn iat(&self) -> u64;
    fn exp(&self) -> u64;
}

impl TypedClaims for Claims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
    fn nbf(&self) -> u64 {
        self.nbf
    }
    fn iat(&self) -> u64 {
        self.iat
    }
    fn exp(&self) -> u64 {
        self.exp
    }
}

impl TypedClaims for SessionClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
    fn nbf(&self) -> u64 {
        self.nbf
    }
    fn iat(&self) -> u64 {
        self.iat
    }
    fn exp(&self) -> u64 {
        self.exp
    }
}

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("wrong token type")]
    WrongTokenType,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed,
        }
    }
}

/// Current Unix time in seconds.
///
/// A clock before the epoch reads as 0, which fails every validity window.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Issues and validates signed tokens with the process secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    idle_timeout_secs: u64,
}

impl TokenService {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret()),
            decoding_key: DecodingKey::from_secret(config.signing_secret()),
            issuer: config.issuer.clone(),
            idle_timeout_secs: config.idle_timeout.as_secs(),
        }
    }

    /// Issue a bearer-formatted auth token valid for 7 days from now.
    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, email, unix_now())
    }

    pub fn issue_at(&self, user_id: &str, email: &str, now: u64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id.to_string(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            token_type: TokenType::Auth,
            iat: now,
            nbf: now,
            exp: now.saturating_add(TOKEN_DURATION_SECS),
            iss: self.issuer.clone(),
        };

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(format!("{}{}", BEARER_PREFIX, token))
    }

    /// Validate an auth token, with or without its `Bearer ` prefix.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, unix_now())
    }

    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let raw = token.strip_prefix(BEARER_PREFIX).unwrap_or(token);
        let claims: Claims = self.decode(raw, TokenType::Auth)?;

        if claims.sub != claims.user_id {
            return Err(TokenError::Malformed);
        }

        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Sign a session record for the `session_data` cookie.
    pub fn sign_session(&self, record: &SessionRecord) -> Result<String, TokenError> {
        let claims = SessionClaims {
            sub: record.user_id.clone(),
            email: record.email.clone(),
            login_time: record.login_time,
            last_seen: record.last_seen,
            token_type: TokenType::Session,
            iat: record.last_seen,
            nbf: record.last_seen,
            exp: record.last_seen.saturating_add(self.idle_timeout_secs.max(1)),
            iss: self.issuer.clone(),
        };

        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Verify a session token and recover its record.
    ///
    /// `exp` is not enforced here; idle expiry is decided by the session store.
    pub fn verify_session_at(&self, token: &str, now: u64) -> Result<SessionRecord, TokenError> {
        let claims: SessionClaims = self.decode(token, TokenType::Session)?;

        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if claims.login_time > claims.last_seen {
            return Err(TokenError::Malformed);
        }

        Ok(SessionRecord {
            user_id: claims.sub,
            email: claims.email,
            login_time: claims.login_time,
            last_seen: claims.last_seen,
        })
    }

    /// Check the declared algorithm, then the signature, issuer and token type.
    /// Validity windows are left to the caller.
    fn decode<T>(&self, raw: &str, expected: TokenType) -> Result<T, TokenError>
    where
        T: DeserializeOwned + Clone + TypedClaims,
    {
        let header = jsonwebtoken::decode_header(raw).map_err(|_| TokenError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "sub"]);

        let claims = jsonwebtoken::decode::<T>(raw, &self.decoding_key, &validation)?.claims;

        if claims.token_type() != expected {
            return Err(TokenError::WrongTokenType);
        }
        if claims.nbf() > claims.iat() || claims.iat() >= claims.exp() {
            return Err(TokenError::Malformed);
        }

        Ok(claims)
    }
}
