// ================================================================
// File: cdk-common/src/error.rs
// ================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Infrastructure failures. Never shown verbatim to end users.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Caller errors, rejected before any store access.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded for {action}; retry after {retry_after_secs}s")]
    RateLimited {
        action: String,
        retry_after_secs: u64,
    },

    // Business outcomes of redeem / verify.
    #[error("Code not found: {0}")]
    CodeNotFound(String),

    #[error("Code already used: {0}")]
    CodeAlreadyUsed(String),

    #[error("Code expired: {0}")]
    CodeExpired(String),

    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Unable to produce unique codes: {0}")]
    Collision(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Stable, machine-readable failure kind carried by every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidParameters,
    Unauthorized,
    Forbidden,
    RateLimited,
    CodeNotFound,
    CodeAlreadyUsed,
    CodeExpired,
    NotFound,
    Busy,
    NotImplemented,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "invalid-parameters",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::CodeNotFound => "code-not-found",
            ErrorKind::CodeAlreadyUsed => "code-already-used",
            ErrorKind::CodeExpired => "code-expired",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Busy => "busy",
            ErrorKind::NotImplemented => "not-implemented",
            ErrorKind::Internal => "internal",
        }
    }

    /// Transient kinds: the caller may back off and retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Busy | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Error::Auth(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::CodeNotFound(_) => ErrorKind::CodeNotFound,
            Error::CodeAlreadyUsed(_) => ErrorKind::CodeAlreadyUsed,
            Error::CodeExpired(_) => ErrorKind::CodeExpired,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Timeout(_) => ErrorKind::Busy,
            Error::Database(sqlx::Error::PoolTimedOut) => ErrorKind::Busy,
            Error::Database(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Migration(_)
            | Error::Parse(_)
            | Error::Internal(_)
            | Error::Collision(_) => ErrorKind::Internal,
        }
    }

    /// Short message safe to hand to the caller. Store and I/O errors are
    /// collapsed so raw driver text never leaves the process.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error, please retry later".to_string(),
            ErrorKind::Busy => "service busy, re-verify the code before retrying".to_string(),
            _ => self.to_string(),
        }
    }
}
