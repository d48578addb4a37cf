use axum::http::StatusCode;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    BadInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    /// Another writer got there first; the caller may re-read and retry.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("stream i/o failed: {0}")]
    Io(#[from] axum::Error),
    /// Unexpected persistence failure; the operation is aborted.
    #[error("internal error: {0}")]
    Internal(#[from] sqlx::Error),
}

impl ChatError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        ChatError::BadInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ChatError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ChatError::Forbidden(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        ChatError::Unauthenticated(msg.into())
    }

    /// Classifies a failed write: a unique violation means another writer got
    /// there first, anything else stays internal.
    pub fn from_write(err: sqlx::Error) -> Self {
        if is_write_conflict(&err) {
            ChatError::Conflict(err.to_string())
        } else {
            ChatError::Internal(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self {
            BadInput(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Forbidden(_) => StatusCode::FORBIDDEN,
            Conflict(_) => StatusCode::CONFLICT,
            Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Io(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rejections the caller caused, as opposed to failures of this process.
    pub fn is_rejection(&self) -> bool {
        !self.status().is_server_error()
    }
}

/// Lock contention is not a conflict: write transactions begin `IMMEDIATE`, so
/// writers queue on the busy timeout and a `SQLITE_BUSY` that still escapes is internal.
pub(crate) fn is_write_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
