//! Execution phase enums for each frame type
//!
//! Each frame kind has its own Phase enum that tracks which execution step
//! it's currently at. These are serialized as u8 for efficiency.

use serde::{Deserialize, Serialize};

/// Shared phase for frames that evaluate one expression and then apply it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EvalPhase {
    /// Evaluate the expression
    Eval = 0,
    /// Consume the evaluated value
    Apply = 1,
}

/// Execution phase for While statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WhilePhase {
    /// Evaluate the loop test
    Test = 0,
    /// Inspect the test result and run the body or exit
    Check = 1,
}

/// Execution phase for ForOf statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForPhase {
    Eval = 0,
    Collect = 1,
    Next = 2,
}

/// Execution phase for Try statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TryPhase {
    /// About to run the try block
    Enter = 0,
    /// Executing the try block; this frame catches thrown errors
    Guarding = 1,
    /// Executing the catch block (error was caught)
    Catching = 2,
}

/// Execution phase for Binary expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BinaryPhase {
    Left = 0,
    Right = 1,
    Done = 2,
}
