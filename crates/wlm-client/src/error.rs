//! Client error types

use crate::retry::Retryable;
use wlm_model::ControllerId;

/// Errors from controller or activation service calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection could not be made or was dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Credentials rejected
    #[error("authentication rejected: {0}")]
    Unauthorized(String),

    /// Session no longer valid, re-authentication required
    #[error("session expired")]
    SessionExpired,

    /// Non-success HTTP status
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Body or reason
        message: String,
    },

    /// Controller accepted the request but reported a command failure
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Response body could not be interpreted
    #[error("could not decode response: {0}")]
    Decode(String),

    /// Controller is not known to the adapter
    #[error("unknown controller: {0}")]
    UnknownController(ControllerId),
}

impl ApiError {
    /// Transient network condition worth retrying
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Credentials were rejected outright
    #[inline]
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl Retryable for ApiError {
    fn is_transient(&self) -> bool {
        ApiError::is_transient(self)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type for client operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Transport("reset".into()).is_transient());
        assert!(ApiError::Timeout("read".into()).is_transient());
        assert!(ApiError::Rejected {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!ApiError::Rejected {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!ApiError::Unauthorized("bad password".into()).is_transient());
        assert!(!ApiError::CommandFailed("invalid".into()).is_transient());
    }
}
