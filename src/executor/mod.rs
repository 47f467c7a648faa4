//! # Executor - Resumable Stack-Driven Interpreter
//!
//! ## Core Principles
//!
//! 1. **Stack-driven execution**: All state in `frames: Vec<Frame>`, no recursion
//! 2. **Phase-per-frame**: Each frame records how far its statement or expression got
//! 3. **Centralized control flow**: `Control` enum manages break/continue/return/throw/suspend
//! 4. **Pure executor**: No I/O, no async - just runs until it suspends, completes, or fails
//!
//! A suspended VM is plain data. Serialize it, store it, load it in another
//! process, `resume` it with the outcome it was waiting on, and drive it on.

pub mod calls;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod guard;
pub mod script;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use errors::ErrorInfo;
pub use exec_loop::{drive_forward, run_until_done, step, DriveResult};
pub use guard::{mismatch_message, Capability, Mismatch, NonResumableGuard};
pub use types::{Closure, Control, Expr, ForkRequest, Script, StepRequest, Stmt, Suspension, Val};
pub use vm::{Ctx, Step, VM};
