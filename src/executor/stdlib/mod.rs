//! Standard library function implementations
//!
//! This module contains all built-in functions, organized by category.
//! Built-ins run natively: they finish within the step that calls them,
//! except `each`, which pushes a frame so its closure may suspend.

pub mod collections;
pub mod text;

use super::errors::{self, ErrorInfo};
use super::types::{Control, Val};
use super::vm::{Ctx, VM};
use serde::{Deserialize, Serialize};

/* ===================== Standard Library Function Types ===================== */

/// Standard library function identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdlibFunc {
    Size,
    Keys,
    Push,
    Str,
    Error,
    Sort,
    Each,
}

impl StdlibFunc {
    pub const ALL: [StdlibFunc; 7] = [
        StdlibFunc::Size,
        StdlibFunc::Keys,
        StdlibFunc::Push,
        StdlibFunc::Str,
        StdlibFunc::Error,
        StdlibFunc::Sort,
        StdlibFunc::Each,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            StdlibFunc::Size => "size",
            StdlibFunc::Keys => "keys",
            StdlibFunc::Push => "push",
            StdlibFunc::Str => "str",
            StdlibFunc::Error => "error",
            StdlibFunc::Sort => "sort",
            StdlibFunc::Each => "each",
        }
    }
}

/* ===================== Stdlib Dispatcher ===================== */

/// Call a standard library function with evaluated arguments
pub fn call_stdlib_func(vm: &mut VM, cx: Ctx<'_>, func: StdlibFunc, args: Vec<Val>) {
    let result = match func {
        StdlibFunc::Size => collections::size(&args),
        StdlibFunc::Keys => collections::keys(&args),
        StdlibFunc::Push => collections::push(args),
        StdlibFunc::Error => error(args),
        StdlibFunc::Str => text::str(vm, cx, args),
        StdlibFunc::Sort => collections::sort(vm, cx, args),
        StdlibFunc::Each => return collections::each(vm, args),
    };

    match result {
        Ok(v) => vm.set_acc(v),
        Err(Val::Error(e)) => vm.throw(e),
        Err(other) => vm.control = Control::Throw(other),
    }
}

/// error(message, code?) - build an error value without throwing it
fn error(args: Vec<Val>) -> Result<Val, Val> {
    let mut args = args.into_iter();
    let message = match args.next() {
        Some(Val::Str(s)) => s,
        Some(other) => other.to_string(),
        None => return Err(arg_count("error", 1, 0)),
    };
    let code = match args.next() {
        Some(Val::Str(code)) => code,
        Some(_) => {
            return Err(arg_type("error() code must be a string"));
        }
        None => errors::THROWN.to_string(),
    };
    Ok(Val::Error(ErrorInfo::new(code, message)))
}

pub(crate) fn arg_count(name: &str, expected: usize, got: usize) -> Val {
    Val::Error(ErrorInfo::new(
        errors::WRONG_ARG_COUNT,
        format!("{}() expects {} arguments, got {}", name, expected, got),
    ))
}

pub(crate) fn arg_type(message: impl Into<String>) -> Val {
    Val::Error(ErrorInfo::new(errors::WRONG_ARG_TYPE, message))
}
