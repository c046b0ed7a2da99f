//! Observable session snapshot and operation outcomes.

use crate::error::{AuthError, ErrorKind};
use crate::identity::Identity;
use crate::session_fsm::SessionPhase;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the session.
///
/// Snapshots are value types: observers receive an owned copy and mutating
/// it has no effect on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Identity of the signed-in principal, if any.
    pub identity: Option<Identity>,
    /// Current bearer credential, if any.
    pub credential: Option<String>,
    /// Human-readable detail of the most recent failure.
    pub last_error: Option<String>,
    /// Classification of the most recent failure.
    pub last_error_kind: Option<ErrorKind>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            identity: None,
            credential: None,
            last_error: None,
            last_error_kind: None,
        }
    }

    /// True only when a credential and identity are both held.
    pub fn is_authenticated(&self) -> bool {
        self.phase.is_authenticated()
    }

    /// True while an operation is in flight.
    pub fn is_loading(&self) -> bool {
        !self.phase.is_settled()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a user-facing session operation.
///
/// Operations never panic and never propagate transport errors raw; they
/// settle into an outcome the caller can branch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub user: Option<Identity>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl AuthOutcome {
    pub fn ok(user: Option<Identity>) -> Self {
        Self {
            success: true,
            user,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(err: &AuthError) -> Self {
        Self {
            success: false,
            user: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}
