//! Statement execution handlers
//!
//! Each handler receives a frame that has already been popped. If the
//! statement has more to do it pushes itself back with the next phase,
//! then pushes whatever child it is waiting on.

use super::errors::{self, ErrorInfo};
use super::expressions::eval_expr;
use super::types::{
    Control, EvalPhase, Expr, ForPhase, FrameKind, Stmt, TryPhase, Val, WhilePhase,
};
use super::vm::{push_stmt, undefined, Ctx, Scope, VM};

/* ===================== Statement Handlers ===================== */

/// Execute Block statement
pub fn execute_block(vm: &mut VM, body: Vec<Stmt>, idx: usize, depth: usize) {
    let Some(child) = body.get(idx).cloned() else {
        // Block complete, drop its scope
        vm.scopes.truncate(depth);
        return;
    };

    vm.repush(FrameKind::Block { body, idx: idx + 1 }, depth);
    push_stmt(vm, &child);
}

/// Execute Declare statement
pub fn execute_declare(
    vm: &mut VM,
    cx: Ctx<'_>,
    name: String,
    init: Option<Expr>,
    phase: EvalPhase,
    depth: usize,
) {
    match (phase, init) {
        (EvalPhase::Eval, Some(expr)) => {
            vm.repush(
                FrameKind::Declare {
                    name,
                    init: Some(expr.clone()),
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        (EvalPhase::Eval, None) => vm.declare(&name, Val::Null),
        (EvalPhase::Apply, _) => {
            let value = vm.take_acc();
            vm.declare(&name, value);
        }
    }
}

/// Execute Assign statement
pub fn execute_assign(
    vm: &mut VM,
    cx: Ctx<'_>,
    name: String,
    value: Expr,
    phase: EvalPhase,
    depth: usize,
) {
    match phase {
        EvalPhase::Eval => {
            let expr = value.clone();
            vm.repush(
                FrameKind::Assign {
                    name,
                    value,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        EvalPhase::Apply => {
            let v = vm.take_acc();
            if !vm.assign(&name, v) {
                vm.throw(undefined(&name));
            }
        }
    }
}

/// Execute If statement
pub fn execute_if(
    vm: &mut VM,
    cx: Ctx<'_>,
    test: Expr,
    then_s: Box<Stmt>,
    else_s: Option<Box<Stmt>>,
    phase: EvalPhase,
    depth: usize,
) {
    match phase {
        EvalPhase::Eval => {
            let expr = test.clone();
            vm.repush(
                FrameKind::If {
                    test,
                    then_s,
                    else_s,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        EvalPhase::Apply => {
            if vm.take_acc().is_truthy() {
                push_stmt(vm, &then_s);
            } else if let Some(else_s) = else_s {
                push_stmt(vm, &else_s);
            }
        }
    }
}

/// Execute While statement
pub fn execute_while(
    vm: &mut VM,
    cx: Ctx<'_>,
    test: Expr,
    body: Box<Stmt>,
    phase: WhilePhase,
    depth: usize,
) {
    match phase {
        WhilePhase::Test => {
            let expr = test.clone();
            vm.repush(
                FrameKind::While {
                    test,
                    body,
                    phase: WhilePhase::Check,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        WhilePhase::Check => {
            if !vm.take_acc().is_truthy() {
                return;
            }
            let next = body.clone();
            vm.repush(
                FrameKind::While {
                    test,
                    body,
                    phase: WhilePhase::Test,
                },
                depth,
            );
            push_stmt(vm, &next);
        }
    }
}

/// Execute for-of statement
#[allow(clippy::too_many_arguments)]
pub fn execute_for_of(
    vm: &mut VM,
    cx: Ctx<'_>,
    binding: String,
    iterable: Expr,
    body: Box<Stmt>,
    items: Vec<Val>,
    idx: usize,
    phase: ForPhase,
    depth: usize,
) {
    match phase {
        ForPhase::Eval => {
            let expr = iterable.clone();
            vm.repush(
                FrameKind::ForOf {
                    binding,
                    iterable,
                    body,
                    items,
                    idx,
                    phase: ForPhase::Collect,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        ForPhase::Collect => {
            let items = match vm.take_acc() {
                Val::List(items) => items,
                Val::Obj(map) => map.into_keys().map(Val::Str).collect(),
                Val::Str(s) => s.chars().map(|c| Val::Str(c.to_string())).collect(),
                other => {
                    vm.throw(ErrorInfo::new(
                        errors::TYPE_ERROR,
                        format!("Cannot iterate over {}", other.type_name()),
                    ));
                    return;
                }
            };
            vm.repush(
                FrameKind::ForOf {
                    binding,
                    iterable,
                    body,
                    items,
                    idx: 0,
                    phase: ForPhase::Next,
                },
                depth,
            );
        }
        ForPhase::Next => {
            // Drop the previous iteration's binding scope
            vm.scopes.truncate(depth);
            let Some(item) = items.get(idx).cloned() else {
                return;
            };
            let next = body.clone();
            vm.repush(
                FrameKind::ForOf {
                    binding: binding.clone(),
                    iterable,
                    body,
                    items,
                    idx: idx + 1,
                    phase: ForPhase::Next,
                },
                depth,
            );
            vm.scopes.push(Scope::with(binding, item));
            push_stmt(vm, &next);
        }
    }
}

/// Execute Return statement
pub fn execute_return(
    vm: &mut VM,
    cx: Ctx<'_>,
    value: Option<Expr>,
    phase: EvalPhase,
    depth: usize,
) {
    match (phase, value) {
        (EvalPhase::Eval, Some(expr)) => {
            vm.repush(
                FrameKind::Return {
                    value: Some(expr.clone()),
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        (EvalPhase::Eval, None) => vm.control = Control::Return(Val::Null),
        (EvalPhase::Apply, _) => {
            let v = vm.take_acc();
            vm.control = Control::Return(v);
        }
    }
}

/// Execute Throw statement
pub fn execute_throw(vm: &mut VM, cx: Ctx<'_>, value: Expr, phase: EvalPhase, depth: usize) {
    match phase {
        EvalPhase::Eval => {
            let expr = value.clone();
            vm.repush(
                FrameKind::Throw {
                    value,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        EvalPhase::Apply => {
            let v = vm.take_acc();
            vm.control = Control::Throw(v);
        }
    }
}

/// Execute Try statement
///
/// The catch side is entered from unwind(), which flips the phase to
/// `Catching` and binds the error.
pub fn execute_try(
    vm: &mut VM,
    body: Box<Stmt>,
    catch_var: String,
    catch_body: Box<Stmt>,
    phase: TryPhase,
    depth: usize,
) {
    match phase {
        TryPhase::Enter => {
            let guarded = body.clone();
            vm.repush(
                FrameKind::Try {
                    body,
                    catch_var,
                    catch_body,
                    phase: TryPhase::Guarding,
                },
                depth,
            );
            push_stmt(vm, &guarded);
        }
        TryPhase::Guarding | TryPhase::Catching => vm.scopes.truncate(depth),
    }
}

/// Execute an expression statement, discarding its value
pub fn execute_expr_stmt(vm: &mut VM, cx: Ctx<'_>, expr: Expr, phase: EvalPhase, depth: usize) {
    match phase {
        EvalPhase::Eval => {
            let e = expr.clone();
            vm.repush(
                FrameKind::ExprStmt {
                    expr,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &e);
        }
        EvalPhase::Apply => {
            vm.acc = None;
        }
    }
}
