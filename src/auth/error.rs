//! Caller-facing error taxonomy for the authentication core.
//!
//! Storage and codec failures are folded into [`AuthError`] at the core
//! boundary. Driver detail stays in the `source` chain for logs and is never
//! part of the `Display` text a caller sees.

use thiserror::Error;

use crate::store::StoreError;

use super::password::CredentialError;
use super::token::TokenError;

/// Stable discriminant of an [`AuthError`], suitable for equality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCredentials,
    InvalidInput,
    UserExists,
    UserNotFound,
    AppNotFound,
    TokenMalformed,
    TokenBadSignature,
    TokenExpiredClaim,
    TokenNotLive,
    StoreUnavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidInput => "invalid_input",
            Self::UserExists => "user_exists",
            Self::UserNotFound => "user_not_found",
            Self::AppNotFound => "app_not_found",
            Self::TokenMalformed => "token_malformed",
            Self::TokenBadSignature => "token_bad_signature",
            Self::TokenExpiredClaim => "token_expired_claim",
            Self::TokenNotLive => "token_not_live",
            Self::StoreUnavailable => "store_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`AuthService`](super::AuthService) operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password. Never says which.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user already exists")]
    UserExists,

    #[error("user not found")]
    UserNotFound,

    #[error("app not found")]
    AppNotFound,

    #[error("token is malformed")]
    TokenMalformed,

    #[error("token signature is invalid")]
    TokenBadSignature,

    #[error("token has expired")]
    TokenExpiredClaim,

    #[error("token is not live")]
    TokenNotLive,

    #[error("storage unavailable during {op}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("operation {op} was cancelled")]
    Cancelled { op: &'static str },

    #[error("internal error during {op}")]
    Internal {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UserExists => ErrorKind::UserExists,
            Self::UserNotFound => ErrorKind::UserNotFound,
            Self::AppNotFound => ErrorKind::AppNotFound,
            Self::TokenMalformed => ErrorKind::TokenMalformed,
            Self::TokenBadSignature => ErrorKind::TokenBadSignature,
            Self::TokenExpiredClaim => ErrorKind::TokenExpiredClaim,
            Self::TokenNotLive => ErrorKind::TokenNotLive,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Only transport failures to the store may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Wrap a storage failure with the identity of the failing operation.
    ///
    /// `NotFound` and `Conflict` have no meaning without knowing which entity
    /// was involved, so callers translate those before reaching this.
    pub(crate) fn store(op: &'static str, source: StoreError) -> Self {
        Self::StoreUnavailable { op, source }
    }

    pub(crate) fn internal(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            op,
            source: source.into(),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => Self::TokenMalformed,
            TokenError::BadSignature => Self::TokenBadSignature,
            TokenError::ExpiredClaim => Self::TokenExpiredClaim,
            TokenError::Store(source) => Self::store("token.resolve_app", source),
            TokenError::Encode(source) => Self::internal("token.issue", source),
        }
    }
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        Self::internal("credentials.hash", err)
    }
}
