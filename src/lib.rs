//! Rhythm CPS
//!
//! A continuation-passing execution engine for workflow scripts. A script
//! runs one step at a time on a serializable stack machine; whenever it waits
//! on an external step, its whole state is plain data that can be persisted
//! and resumed after a restart.
//!
//! - [`executor`]: the resumable interpreter and the non-resumable guard
//! - [`steps`]: the boundary between scripts and externally implemented steps
//! - [`program`]: execution threads, programs, and the controller
//! - [`store`]: durable program records

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod program;
pub mod steps;
pub mod store;

pub use config::{Config, EngineConfig, StoreBackend, StoreConfig};
pub use error::EngineError;
pub use executor::{ErrorInfo, Script, Val};
pub use program::{
    Caller, CauseOfInterruption, Program, ProgramController, ProgramId, ProgramStatus, ThreadId,
    ThreadState,
};
pub use steps::{StepCallback, StepContext, StepDescriptor, StepError, StepRegistry, Started};
pub use store::{FileStore, MemoryStore, PgStore, ProgramStore, StoreError};
