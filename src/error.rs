//! Engine-level errors
//!
//! These are failures of the engine itself. Errors raised by scripts are
//! values ([`crate::executor::ErrorInfo`]) and never show up here.

use crate::program::types::{ProgramId, ThreadState};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An operation was attempted on a continuation or thread in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid thread transition from {from} to {to}")]
    InvalidTransition { from: ThreadState, to: ThreadState },

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Program not found: {0}")]
    ProgramNotFound(ProgramId),

    #[error("Program {0} is already running")]
    AlreadyRunning(ProgramId),

    /// Stored state does not match what is being resumed
    #[error("Program {id} is corrupted: {reason}")]
    Corrupted { id: ProgramId, reason: String },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}
