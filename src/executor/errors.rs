//! Script-level error values
//!
//! Errors raised while driving a script are ordinary values (`Val::Error`) so
//! that script `try`/`catch` blocks can inspect them. The codes below are stable.

use super::types::Val;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNDEFINED_VARIABLE: &str = "UndefinedVariable";
pub const TYPE_ERROR: &str = "TypeError";
pub const PROPERTY_NOT_FOUND: &str = "PropertyNotFound";
pub const WRONG_ARG_COUNT: &str = "WrongArgCount";
pub const WRONG_ARG_TYPE: &str = "WrongArgType";
pub const DIVISION_BY_ZERO: &str = "DivisionByZero";
pub const NUMERIC_OVERFLOW: &str = "NumericOverflow";
pub const STACK_OVERFLOW: &str = "StackOverflow";
pub const INVALID_CONTROL: &str = "InvalidControl";
pub const MISMATCH: &str = "Mismatch";
pub const NO_SUCH_STEP: &str = "NoSuchStep";
pub const STEP_FAILED: &str = "StepFailed";
pub const PARALLEL_BRANCH_FAILED: &str = "ParallelBranchFailed";
pub const TOO_MANY_THREADS: &str = "TooManyThreads";
/// Code for values thrown by script `throw` that are not already errors
pub const THROWN: &str = "Error";

/// Error payload carried by `Val::Error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Val>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Val) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Normalize any thrown value into an error payload
    pub fn from_thrown(value: &Val) -> Self {
        match value {
            Val::Error(err) => err.clone(),
            other => ErrorInfo::new(THROWN, other.to_string()),
        }
    }

    pub fn into_val(self) -> Val {
        Val::Error(self)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
