//! Session state machine.
//!
//! An explicit finite state machine for the session lifecycle, so reachable
//! states are declared rather than derived from flag combinations.
//!
//! ## State Diagram
//!
//! ```text
//! ┌───────────────┐
//! │ Uninitialized │ (initial)
//! └───────┬───────┘
//!         │ OperationStarted
//!         ▼
//! ┌───────────────┐  AuthConfirmed   ┌───────────────┐
//! │    Loading    │ ───────────────► │ Authenticated │
//! └───────┬───────┘                  └───────┬───────┘
//!         │ AuthCleared                      │ OperationStarted (back to Loading)
//!         ▼                                  │ SessionCleared
//! ┌───────────────┐ ◄────────────────────────┘
//! │   Anonymous   │
//! └───────────────┘
//! ```
//!
//! `SessionCleared` reaches `Anonymous` from every state, which is what
//! makes logout idempotent and lets it win races against in-flight work.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        OperationStarted => Loading,
        SessionCleared => Anonymous
    },
    Loading => {
        AuthConfirmed => Authenticated,
        AuthCleared => Anonymous,
        SessionCleared => Anonymous
    },
    Authenticated => {
        OperationStarted => Loading,
        SessionCleared => Anonymous
    },
    Anonymous => {
        OperationStarted => Loading,
        SessionCleared => Anonymous
    }
}

// Re-export the generated types with clearer names
pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Public view of the session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// `init()` has not run yet.
    Uninitialized,
    /// An operation is in flight.
    Loading,
    /// A validated credential and identity are held.
    Authenticated,
    /// No session.
    Anonymous,
}

impl SessionPhase {
    /// Returns true only for a settled authenticated session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionPhase::Authenticated)
    }

    /// Returns true when no operation is in flight.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionPhase::Loading)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionPhase::Uninitialized,
            SessionMachineState::Loading => SessionPhase::Loading,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
            SessionMachineState::Anonymous => SessionPhase::Anonymous,
        }
    }
}
