//! Control flow and execution frame types

use super::ast::{BinaryOp, Branch, Expr, Stmt, UnaryOp};
use super::phase::{BinaryPhase, EvalPhase, ForPhase, TryPhase, WhilePhase};
use super::values::{Closure, Val};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/* ===================== Control Flow ===================== */

/// Control flow state
///
/// This represents active control flow (return, break, continue, throw, suspend).
/// When control != None, the VM unwinds the stack to find the appropriate handler.
/// For Suspend, the VM stops execution and becomes serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Break,
    Continue,
    Return(Val),
    Throw(Val),
    Suspend(Suspension),
}

/// Why a continuation stopped before finishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Suspension {
    /// Waiting on an external step invocation
    Step(StepRequest),
    /// Waiting for forked branches to join
    Join(ForkRequest),
}

impl Suspension {
    /// Sequence number the resumption must quote
    pub fn id(&self) -> u64 {
        match self {
            Suspension::Step(req) => req.id,
            Suspension::Join(req) => req.id,
        }
    }
}

/// A step call the script is blocked on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub id: u64,
    pub name: String,
    pub args: Vec<Val>,
}

/// A fork: each branch becomes a sibling thread seeded with `bindings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkRequest {
    pub id: u64,
    pub branches: Vec<Branch>,
    pub bindings: BTreeMap<String, Val>,
}

/* ===================== Frames ===================== */

/// What a `Collect` frame does once all its expressions are evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Collected {
    List,
    Obj { keys: Vec<String> },
    Interpolate,
    Call { callee: String },
}

/// Frame kind - the type and state of a statement or expression being executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum FrameKind {
    Block {
        body: Vec<Stmt>,
        idx: usize,
    },
    Declare {
        name: String,
        init: Option<Expr>,
        phase: EvalPhase,
    },
    Assign {
        name: String,
        value: Expr,
        phase: EvalPhase,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        else_s: Option<Box<Stmt>>,
        phase: EvalPhase,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        phase: WhilePhase,
    },
    ForOf {
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
        items: Vec<Val>,
        idx: usize,
        phase: ForPhase,
    },
    Return {
        value: Option<Expr>,
        phase: EvalPhase,
    },
    Throw {
        value: Expr,
        phase: EvalPhase,
    },
    Try {
        body: Box<Stmt>,
        catch_var: String,
        catch_body: Box<Stmt>,
        phase: TryPhase,
    },
    ExprStmt {
        expr: Expr,
        phase: EvalPhase,
    },
    Break,
    Continue,

    /// Evaluates `exprs` left to right, then finishes according to `then`
    Collect {
        exprs: Vec<Expr>,
        done: Vec<Val>,
        pending: bool,
        then: Collected,
    },
    Member {
        object: Expr,
        property: String,
        phase: EvalPhase,
    },
    Unary {
        op: UnaryOp,
        operand: Expr,
        phase: EvalPhase,
    },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
        lhs: Option<Val>,
        phase: BinaryPhase,
    },
    /// Activation record of a script function or closure call
    Invoke {
        name: String,
        guard_depth: usize,
    },
    /// The resumable `each` built-in: calls `closure` once per item
    Each {
        items: Vec<Val>,
        idx: usize,
        closure: Closure,
    },
}

/// Execution frame - one per active statement or expression
///
/// The frame stack replaces the system call stack, making execution serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// The kind and state of this frame
    pub kind: FrameKind,

    /// Scope stack height when this frame was pushed; restored when it is popped
    pub scope_depth: usize,
}
