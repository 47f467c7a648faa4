//! Type definitions for the executor
//!
//! - AST nodes (Script, Stmt, Expr)
//! - Runtime values (Val, Closure)
//! - Control flow (Control, Suspension, Frame, FrameKind)
//! - Execution phases for each frame kind

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

pub use ast::{BinaryOp, Branch, Expr, FunctionDef, Script, Stmt, UnaryOp};
pub use control::{Collected, Control, ForkRequest, Frame, FrameKind, StepRequest, Suspension};
pub use phase::*;
pub use values::{Closure, Val};
