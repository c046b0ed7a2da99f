//! Session error types.
//!
//! Every failure in the engine is classified into exactly one [`ErrorKind`]
//! before it is surfaced, so call sites branch on the kind rather than on
//! message text.

use thiserror::Error;

/// Classification of a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request was malformed or rejected by input validation.
    Validation,
    /// Missing or invalid credential.
    Authentication,
    /// Credential is valid but lacks the required rights.
    Authorization,
    /// Requested resource does not exist.
    NotFound,
    /// Transport failure with no HTTP status.
    Network,
    /// Server responded with a failure status.
    Api,
    /// Anything that does not fit the other kinds.
    Unknown,
}

/// Session error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Request rejected by validation (HTTP 400/422)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing or invalid credential (HTTP 401)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Insufficient rights (HTTP 403)
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure without an HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// Server responded with a failure status
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Storage error from the credential store
    #[error("Storage error: {0}")]
    Storage(#[from] credential_store::StorageError),

    /// Invalid transition in the session state machine
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Unclassifiable failure
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// The kind this error classifies to. Classification never changes after
    /// the error is surfaced.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Authentication(_) => ErrorKind::Authentication,
            AuthError::Authorization(_) => ErrorKind::Authorization,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Network(_) => ErrorKind::Network,
            AuthError::Api { .. } => ErrorKind::Api,
            AuthError::Storage(_)
            | AuthError::InvalidStateTransition(_)
            | AuthError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            400 | 422 => AuthError::Validation(body),
            401 => AuthError::Authentication(body),
            403 => AuthError::Authorization(body),
            404 => AuthError::NotFound(body),
            status => AuthError::Api { status, body },
        }
    }

    /// Returns true if this error is transient and the operation may be
    /// retried: connection failures, timeouts, and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AuthError::from_status(status, err.to_string()),
            None => AuthError::Network(err.to_string()),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
