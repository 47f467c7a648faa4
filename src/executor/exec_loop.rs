//! Core execution loop
//!
//! This module contains the step() function - the heart of the interpreter.
//! It pops one frame at a time, runs its handler, and lets the handler push
//! the frame back with an advanced phase if it has more to do.
//!
//! ## Function Organization
//! 1. drive_forward() - Host-facing driver that yields a [`DriveResult`]
//! 2. run_until_done() - Plain driver (calls step repeatedly)
//! 3. step() - Main execution loop (dispatches to handlers)
//! 4. unwind() - Control flow propagation

use super::errors::{self, ErrorInfo};
use super::expressions::{
    execute_binary, execute_collect, execute_each, execute_invoke, execute_member, execute_unary,
};
use super::statements::{
    execute_assign, execute_block, execute_declare, execute_expr_stmt, execute_for_of,
    execute_if, execute_return, execute_throw, execute_try, execute_while,
};
use super::types::{Control, Frame, FrameKind, Suspension, TryPhase, Val};
use super::vm::{push_stmt, Ctx, Scope, Step, VM};
use crate::error::EngineError;

/* ===================== Public API ===================== */

/// Where a drive stopped
#[derive(Debug, Clone, PartialEq)]
pub enum DriveResult {
    /// Parked on an external step or a fork; resume with the matching id
    Suspended(Suspension),
    /// Ran to the end; carries the top-level return value (null if none)
    Completed(Val),
    /// An error escaped every handler
    Failed(ErrorInfo),
    /// The host raised the interrupt flag and the VM stopped at a resumable point
    Interrupted,
}

/// Advance a continuation until it suspends, completes, fails, or is interrupted
///
/// Ownership of the VM passes through so the caller can persist it between
/// drives. Driving a VM that is still suspended is an error; resume it first.
pub fn drive_forward(mut vm: VM, cx: Ctx<'_>) -> Result<(VM, DriveResult), EngineError> {
    if let Some(pending) = vm.suspension() {
        return Err(EngineError::InvalidState(format!(
            "continuation is suspended on invocation {} and must be resumed first",
            pending.id()
        )));
    }

    loop {
        if cx.interrupt_requested() && !vm.guard.is_active() {
            return Ok((vm, DriveResult::Interrupted));
        }
        if step(&mut vm, cx) == Step::Done {
            break;
        }
    }

    let result = match &vm.control {
        Control::Suspend(s) => DriveResult::Suspended(s.clone()),
        Control::Throw(v) => DriveResult::Failed(ErrorInfo::from_thrown(v)),
        Control::Return(v) => DriveResult::Completed(v.clone()),
        _ => DriveResult::Completed(Val::Null),
    };
    Ok((vm, result))
}

/// Run the VM until it completes or suspends
///
/// After completion, inspect `vm.control` for the final state.
pub fn run_until_done(vm: &mut VM, cx: Ctx<'_>) {
    while step(vm, cx) == Step::Continue {}
}

/// Execute one step of the VM
pub fn step(vm: &mut VM, cx: Ctx<'_>) -> Step {
    match vm.control {
        Control::None => {}
        Control::Suspend(_) => return Step::Done,
        _ => return unwind(vm),
    }

    let Some(Frame { kind, scope_depth }) = vm.frames.pop() else {
        return Step::Done;
    };

    match kind {
        FrameKind::Block { body, idx } => execute_block(vm, body, idx, scope_depth),
        FrameKind::Declare { name, init, phase } => {
            execute_declare(vm, cx, name, init, phase, scope_depth)
        }
        FrameKind::Assign { name, value, phase } => {
            execute_assign(vm, cx, name, value, phase, scope_depth)
        }
        FrameKind::If {
            test,
            then_s,
            else_s,
            phase,
        } => execute_if(vm, cx, test, then_s, else_s, phase, scope_depth),
        FrameKind::While { test, body, phase } => {
            execute_while(vm, cx, test, body, phase, scope_depth)
        }
        FrameKind::ForOf {
            binding,
            iterable,
            body,
            items,
            idx,
            phase,
        } => execute_for_of(
            vm,
            cx,
            binding,
            iterable,
            body,
            items,
            idx,
            phase,
            scope_depth,
        ),
        FrameKind::Return { value, phase } => execute_return(vm, cx, value, phase, scope_depth),
        FrameKind::Throw { value, phase } => execute_throw(vm, cx, value, phase, scope_depth),
        FrameKind::Try {
            body,
            catch_var,
            catch_body,
            phase,
        } => execute_try(vm, body, catch_var, catch_body, phase, scope_depth),
        FrameKind::ExprStmt { expr, phase } => {
            execute_expr_stmt(vm, cx, expr, phase, scope_depth)
        }
        FrameKind::Break => vm.control = Control::Break,
        FrameKind::Continue => vm.control = Control::Continue,

        FrameKind::Collect {
            exprs,
            done,
            pending,
            then,
        } => execute_collect(vm, cx, exprs, done, pending, then, scope_depth),
        FrameKind::Member {
            object,
            property,
            phase,
        } => execute_member(vm, cx, object, property, phase, scope_depth),
        FrameKind::Unary { op, operand, phase } => {
            execute_unary(vm, cx, op, operand, phase, scope_depth)
        }
        FrameKind::Binary {
            op,
            left,
            right,
            lhs,
            phase,
        } => execute_binary(vm, cx, op, left, right, lhs, phase, scope_depth),
        FrameKind::Invoke { guard_depth, .. } => execute_invoke(vm, guard_depth, scope_depth),
        FrameKind::Each {
            items,
            idx,
            closure,
        } => execute_each(vm, cx, items, idx, closure, scope_depth),
    }

    Step::Continue
}

/* ===================== Control Flow ===================== */

/// Undo the scope and guard effects of a frame being discarded
fn discard(vm: &mut VM, frame: &Frame) {
    vm.scopes.truncate(frame.scope_depth);
    if let FrameKind::Invoke { guard_depth, .. } = frame.kind {
        vm.guard.truncate(guard_depth);
    }
}

/// Unwind the stack when control flow is active
///
/// - Throw stops at the nearest try block still guarding its body
/// - Return stops at the nearest call activation, or ends the program
/// - Break/Continue stop at the nearest loop; crossing a call is an error
fn unwind(vm: &mut VM) -> Step {
    let control = std::mem::replace(&mut vm.control, Control::None);

    match control {
        Control::Throw(error) => {
            while let Some(frame) = vm.frames.pop() {
                discard(vm, &frame);
                if let FrameKind::Try {
                    body,
                    catch_var,
                    catch_body,
                    phase: TryPhase::Guarding,
                } = frame.kind
                {
                    vm.repush(
                        FrameKind::Try {
                            body,
                            catch_var: catch_var.clone(),
                            catch_body: catch_body.clone(),
                            phase: TryPhase::Catching,
                        },
                        frame.scope_depth,
                    );
                    vm.scopes.push(Scope::with(catch_var, error));
                    push_stmt(vm, &catch_body);
                    return Step::Continue;
                }
            }
            vm.control = Control::Throw(error);
            Step::Done
        }

        Control::Return(value) => {
            while let Some(frame) = vm.frames.pop() {
                discard(vm, &frame);
                if matches!(frame.kind, FrameKind::Invoke { .. }) {
                    vm.set_acc(value);
                    return Step::Continue;
                }
            }
            vm.control = Control::Return(value);
            Step::Done
        }

        Control::Break => unwind_loop(vm, true),
        Control::Continue => unwind_loop(vm, false),

        other => {
            vm.control = other;
            Step::Done
        }
    }
}

/// Pop frames until the nearest enclosing loop
fn unwind_loop(vm: &mut VM, is_break: bool) -> Step {
    loop {
        let at_loop = match vm.frames.last().map(|f| &f.kind) {
            None | Some(FrameKind::Invoke { .. }) => {
                vm.throw(stray_control(is_break));
                return Step::Continue;
            }
            Some(FrameKind::While { .. }) | Some(FrameKind::ForOf { .. }) => true,
            Some(_) => false,
        };
        // Loop frames sit in their "next iteration" phase while the body
        // runs, so continue leaves them in place.
        if at_loop && !is_break {
            return Step::Continue;
        }
        if let Some(frame) = vm.frames.pop() {
            discard(vm, &frame);
        }
        if at_loop {
            return Step::Continue;
        }
    }
}

fn stray_control(is_break: bool) -> ErrorInfo {
    let keyword = if is_break { "break" } else { "continue" };
    ErrorInfo::new(
        errors::INVALID_CONTROL,
        format!("'{}' used outside of a loop", keyword),
    )
}
