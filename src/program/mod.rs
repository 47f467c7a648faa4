//! Programs, their execution threads, and the controller that drives them

pub mod controller;
pub mod events;
pub mod log;
#[allow(clippy::module_inception)]
pub mod program;
pub mod thread;
pub mod types;

pub use controller::ProgramController;
pub use log::RunLog;
pub use program::Program;
pub use thread::{ExecutionThread, JoinState, RunOutcome};
pub use types::{Caller, CauseOfInterruption, ProgramId, ProgramStatus, ThreadId, ThreadState};
