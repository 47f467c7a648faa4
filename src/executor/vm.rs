//! Virtual Machine state
//!
//! The VM holds all execution state:
//! - frames: Stack of active statements and expressions
//! - scopes: Lexical variable scopes, innermost last
//! - control: Current control flow state (return, break, throw, suspend)
//! - acc: Value produced by the most recently finished expression
//! - guard: Open non-resumable regions
//!
//! Everything in here serializes, so a suspended VM can be written to storage
//! and picked up by another process.

use super::calls;
use super::errors::{self, ErrorInfo};
use super::guard::NonResumableGuard;
use super::types::{
    Closure, Control, EvalPhase, ForPhase, Frame, FrameKind, Script, Stmt, Suspension, TryPhase, Val,
    WhilePhase,
};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Frame-stack ceiling used when the host does not configure one
pub const DEFAULT_MAX_FRAMES: usize = 1024;

/// How many built-in callbacks may be running inside one another
pub const MAX_SYNC_DEPTH: usize = 32;

/* ===================== Scopes ===================== */

/// One lexical scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub vars: BTreeMap<String, Val>,
    /// Set on the scope opened by a function or closure call. Lookups stop
    /// here and fall back to the root scope.
    #[serde(default)]
    pub call_boundary: bool,
}

impl Scope {
    pub fn block() -> Self {
        Scope::default()
    }

    pub fn call(vars: BTreeMap<String, Val>) -> Self {
        Scope {
            vars,
            call_boundary: true,
        }
    }

    pub fn with(name: impl Into<String>, value: Val) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(name.into(), value);
        Scope {
            vars,
            call_boundary: false,
        }
    }
}

/* ===================== Outbox ===================== */

/// Side output collected while stepping, drained by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbox {
    /// Diagnostic lines destined for the run log (mismatch reports)
    pub diagnostics: Vec<String>,
}

/* ===================== VM ===================== */

/// Virtual Machine state
///
/// This contains everything needed to execute (and serialize/resume) a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VM {
    /// Stack of execution frames
    pub frames: Vec<Frame>,

    /// Variable scopes; `scopes[0]` holds the seeded bindings
    pub scopes: Vec<Scope>,

    /// Current control flow state
    pub control: Control,

    /// Result register for the expression that just finished
    #[serde(default)]
    pub acc: Option<Val>,

    /// Open non-resumable regions
    #[serde(default)]
    pub guard: NonResumableGuard,

    #[serde(default)]
    pub outbox: Outbox,

    /// Sequence number for the next suspension
    #[serde(default)]
    pub next_invocation: u64,
}

impl VM {
    /// Create a new VM with a program
    ///
    /// `bindings` become the root scope, visible from every routine.
    pub fn new(program: Stmt, bindings: BTreeMap<String, Val>) -> Self {
        let mut vm = VM::detached(NonResumableGuard::default());
        vm.scopes[0].vars = bindings;
        push_stmt(&mut vm, &program);
        vm
    }

    /// VM for the top-level body of a script
    pub fn for_script(script: &Script) -> Self {
        VM::new(script.body.clone(), BTreeMap::new())
    }

    /// Empty VM carrying an existing guard, used for synchronous sub-runs
    pub(crate) fn detached(guard: NonResumableGuard) -> Self {
        VM {
            frames: vec![],
            scopes: vec![Scope::block()],
            control: Control::None,
            acc: None,
            guard,
            outbox: Outbox::default(),
            next_invocation: 0,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.control, Control::Suspend(_))
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match &self.control {
            Control::Suspend(s) => Some(s),
            _ => None,
        }
    }

    /// Nothing left to run and not waiting on anything
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty() && !self.is_suspended()
    }

    /// Resume a suspended continuation with the outcome of what it waited on
    ///
    /// The id must match the pending suspension. A failure outcome is raised
    /// as a throw at the suspension point.
    pub fn resume(&mut self, id: u64, outcome: Result<Val, ErrorInfo>) -> Result<(), EngineError> {
        self.waiting_on(id)?;

        match outcome {
            Ok(value) => {
                self.control = Control::None;
                self.acc = Some(value);
            }
            Err(err) => {
                self.control = Control::Throw(Val::Error(err));
            }
        }
        Ok(())
    }

    /// Resume a step call by running the body the step handed back
    ///
    /// The body runs as a closure called from the suspension point, so its
    /// return value becomes the value of the step call.
    pub fn enter_body(&mut self, id: u64, body: Closure, cx: Ctx<'_>) -> Result<(), EngineError> {
        let name = match self.waiting_on(id)? {
            Suspension::Step(request) => request.name.clone(),
            Suspension::Join(_) => {
                return Err(EngineError::InvalidState(format!(
                    "invocation {} is a join, not a step",
                    id
                )))
            }
        };
        self.control = Control::None;
        calls::invoke_closure(self, cx, &name, body, vec![]);
        Ok(())
    }

    fn waiting_on(&self, id: u64) -> Result<&Suspension, EngineError> {
        match &self.control {
            Control::Suspend(s) if s.id() == id => Ok(s),
            Control::Suspend(s) => Err(EngineError::InvalidState(format!(
                "continuation is waiting on invocation {}, not {}",
                s.id(),
                id
            ))),
            _ => Err(EngineError::InvalidState(
                "continuation is not suspended".to_string(),
            )),
        }
    }

    /// Open a non-resumable region around whatever runs next
    pub fn mark_non_resumable(&mut self, routine: impl Into<String>) {
        self.guard.mark(routine);
    }

    pub fn clear_non_resumable(&mut self) -> Option<String> {
        self.guard.clear()
    }

    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox.diagnostics)
    }

    /* ---------- frame helpers ---------- */

    /// Push a frame recording the current scope height
    pub(crate) fn push_frame(&mut self, kind: FrameKind) {
        let scope_depth = self.scopes.len();
        self.frames.push(Frame { kind, scope_depth });
    }

    /// Put a popped frame back with its updated state
    pub(crate) fn repush(&mut self, kind: FrameKind, scope_depth: usize) {
        self.frames.push(Frame { kind, scope_depth });
    }

    pub(crate) fn take_acc(&mut self) -> Val {
        self.acc.take().unwrap_or(Val::Null)
    }

    pub(crate) fn set_acc(&mut self, value: Val) {
        self.acc = Some(value);
    }

    pub(crate) fn throw(&mut self, err: ErrorInfo) {
        self.control = Control::Throw(Val::Error(err));
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_invocation;
        self.next_invocation += 1;
        id
    }

    /* ---------- variables ---------- */

    /// Index of the innermost call boundary (0 when running top-level code)
    fn boundary(&self) -> usize {
        self.scopes
            .iter()
            .rposition(|s| s.call_boundary)
            .unwrap_or(0)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Val> {
        let boundary = self.boundary();
        self.scopes[boundary..]
            .iter()
            .rev()
            .find_map(|s| s.vars.get(name))
            .or_else(|| {
                if boundary > 0 {
                    self.scopes[0].vars.get(name)
                } else {
                    None
                }
            })
    }

    /// Update an existing variable; false if it is not visible
    pub(crate) fn assign(&mut self, name: &str, value: Val) -> bool {
        let boundary = self.boundary();
        let len = self.scopes.len();
        let target = (boundary..len)
            .rev()
            .find(|&i| self.scopes[i].vars.contains_key(name))
            .or_else(|| {
                (boundary > 0 && self.scopes[0].vars.contains_key(name)).then_some(0)
            });

        match target {
            Some(i) => {
                self.scopes[i].vars.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn declare(&mut self, name: &str, value: Val) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name.to_string(), value);
        }
    }

    /// Snapshot of every visible binding, inner scopes shadowing outer ones
    pub(crate) fn visible_bindings(&self) -> BTreeMap<String, Val> {
        let boundary = self.boundary();
        let mut out = if boundary > 0 {
            self.scopes[0].vars.clone()
        } else {
            BTreeMap::new()
        };
        for scope in &self.scopes[boundary..] {
            out.extend(scope.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }
}

/* ===================== Host Context ===================== */

/// What the host lends the VM while driving it
#[derive(Debug, Clone, Copy)]
pub struct Ctx<'a> {
    pub script: &'a Script,
    pub max_frames: usize,
    /// Raised by the host to request a stop at the next resumable point
    pub interrupt: Option<&'a AtomicBool>,
    /// Built-in callbacks currently running beneath this context
    pub(crate) sync_depth: usize,
}

impl<'a> Ctx<'a> {
    pub fn new(script: &'a Script) -> Self {
        Ctx {
            script,
            max_frames: DEFAULT_MAX_FRAMES,
            interrupt: None,
            sync_depth: 0,
        }
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Context for a callback run beneath a caller that already holds
    /// `used` frames, or `None` once the combined budget is spent
    pub(crate) fn nested(self, used: usize) -> Option<Self> {
        if self.sync_depth >= MAX_SYNC_DEPTH || used >= self.max_frames {
            return None;
        }
        Some(Ctx {
            max_frames: self.max_frames - used,
            sync_depth: self.sync_depth + 1,
            ..self
        })
    }

    pub(crate) fn interrupt_requested(&self) -> bool {
        self.interrupt
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

/* ===================== Frame Management ===================== */

/// Push a new frame for a statement onto the stack
pub fn push_stmt(vm: &mut VM, stmt: &Stmt) {
    let kind = match stmt {
        Stmt::Block { body } => {
            vm.push_frame(FrameKind::Block {
                body: body.clone(),
                idx: 0,
            });
            vm.scopes.push(Scope::block());
            return;
        }
        Stmt::Declare { name, init } => FrameKind::Declare {
            name: name.clone(),
            init: init.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::Assign { name, value } => FrameKind::Assign {
            name: name.clone(),
            value: value.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::If {
            test,
            then_s,
            else_s,
        } => FrameKind::If {
            test: test.clone(),
            then_s: then_s.clone(),
            else_s: else_s.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::While { test, body } => FrameKind::While {
            test: test.clone(),
            body: body.clone(),
            phase: WhilePhase::Test,
        },
        Stmt::ForOf {
            binding,
            iterable,
            body,
        } => FrameKind::ForOf {
            binding: binding.clone(),
            iterable: iterable.clone(),
            body: body.clone(),
            items: vec![],
            idx: 0,
            phase: ForPhase::Eval,
        },
        Stmt::Return { value } => FrameKind::Return {
            value: value.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::Throw { value } => FrameKind::Throw {
            value: value.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::Try {
            body,
            catch_var,
            catch_body,
        } => FrameKind::Try {
            body: body.clone(),
            catch_var: catch_var.clone(),
            catch_body: catch_body.clone(),
            phase: TryPhase::Enter,
        },
        Stmt::Expr { expr } => FrameKind::ExprStmt {
            expr: expr.clone(),
            phase: EvalPhase::Eval,
        },
        Stmt::Break => FrameKind::Break,
        Stmt::Continue => FrameKind::Continue,
    };

    vm.push_frame(kind);
}

/// Error for a name that resolves to nothing
pub(crate) fn undefined(name: &str) -> ErrorInfo {
    ErrorInfo::new(
        errors::UNDEFINED_VARIABLE,
        format!("Variable '{}' is not defined", name),
    )
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Execution complete or suspended
    Done,
}
