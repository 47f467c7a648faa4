//! Call dispatch
//!
//! A call name resolves, in order, to a closure held in a visible variable,
//! a script function, a built-in, and finally an external step. Only the last
//! two can leave the VM: a step suspends it, and a fork suspends it on a join.

use super::errors::{self, ErrorInfo};
use super::exec_loop::run_until_done;
use super::guard::{Capability, Mismatch};
use super::stdlib::{self, StdlibFunc};
use super::types::{
    Branch, Closure, Control, ForkRequest, FrameKind, FunctionDef, StepRequest, Stmt, Suspension,
    Val,
};
use super::vm::{push_stmt, Ctx, Scope, VM};
use std::collections::BTreeMap;

/// Resolve and perform a call whose arguments are already evaluated
pub fn dispatch_call(vm: &mut VM, cx: Ctx<'_>, callee: &str, args: Vec<Val>) {
    match vm.lookup(callee).cloned() {
        Some(Val::Closure(closure)) => return invoke_closure(vm, cx, callee, closure, args),
        Some(other) => {
            return vm.throw(ErrorInfo::new(
                errors::TYPE_ERROR,
                format!("'{}' is a {} and cannot be called", callee, other.type_name()),
            ))
        }
        None => {}
    }

    if let Some(function) = cx.script.function(callee) {
        return invoke_function(vm, cx, function, args);
    }

    if let Some(func) = StdlibFunc::from_name(callee) {
        return stdlib::call_stdlib_func(vm, cx, func, args);
    }

    request_step(vm, callee, args);
}

/// Enter a script function
///
/// A function marked non-resumable opens a guard region that closes when its
/// activation frame is popped, whether it returns, falls off the end, or throws.
pub fn invoke_function(vm: &mut VM, cx: Ctx<'_>, function: &FunctionDef, args: Vec<Val>) {
    if args.len() > function.params.len() {
        return vm.throw(arity_error(&function.name, function.params.len(), args.len()));
    }
    if vm.frames.len() >= cx.max_frames {
        return vm.throw(ErrorInfo::new(
            errors::STACK_OVERFLOW,
            format!("Maximum call depth exceeded in {}", function.name),
        ));
    }

    let guard_depth = vm.guard.depth();
    vm.push_frame(FrameKind::Invoke {
        name: function.name.clone(),
        guard_depth,
    });
    if function.non_resumable {
        vm.guard.mark(function.name.clone());
    }
    vm.scopes
        .push(Scope::call(bind_params(&function.params, args)));
    push_stmt(vm, &function.body);
}

/// Enter a closure; `name` labels the activation for diagnostics
///
/// A closure declared without parameters accepts one implicit argument, `it`.
pub fn invoke_closure(vm: &mut VM, cx: Ctx<'_>, name: &str, closure: Closure, args: Vec<Val>) {
    let Closure {
        params,
        body,
        captured,
    } = closure;

    let mut vars = captured;
    if params.is_empty() && args.len() == 1 {
        vars.extend(bind_params(&["it".to_string()], args));
    } else if args.len() > params.len() {
        return vm.throw(arity_error(name, params.len(), args.len()));
    } else {
        vars.extend(bind_params(&params, args));
    }

    if vm.frames.len() >= cx.max_frames {
        return vm.throw(ErrorInfo::new(
            errors::STACK_OVERFLOW,
            format!("Maximum call depth exceeded in {}", name),
        ));
    }

    let guard_depth = vm.guard.depth();
    vm.push_frame(FrameKind::Invoke {
        name: name.to_string(),
        guard_depth,
    });
    vm.scopes.push(Scope::call(vars));

    match *body {
        Stmt::Expr { expr } => push_stmt(vm, &Stmt::Return { value: Some(expr) }),
        other => push_stmt(vm, &other),
    }
}

/// Run a closure to completion in a detached VM under a fresh guard region
///
/// Used by built-ins that call back into script code synchronously. The
/// sub-run inherits the caller's open regions, so a step inside still reports
/// the outermost non-resumable routine correctly. The sub-run only gets the
/// frames the caller has left, and nesting itself is capped.
pub fn call_sync(
    vm: &mut VM,
    cx: Ctx<'_>,
    region: &str,
    closure: Closure,
    args: Vec<Val>,
) -> Result<Val, Val> {
    let Some(cx) = cx.nested(vm.frames.len()) else {
        return Err(ErrorInfo::new(
            errors::STACK_OVERFLOW,
            format!("Maximum call depth exceeded in {}", region),
        )
        .into_val());
    };

    let mut sub = VM::detached(vm.guard.clone());
    sub.guard.mark(region);
    invoke_closure(&mut sub, cx, region, closure, args);
    run_until_done(&mut sub, cx);
    vm.outbox.diagnostics.append(&mut sub.outbox.diagnostics);

    match sub.control {
        Control::Throw(err) => Err(err),
        // A detached run has no host to hand a step to
        Control::Suspend(Suspension::Step(request)) => Err(Mismatch {
            routine: sub.guard.enclosing().unwrap_or(region).to_string(),
            capability: request.name,
        }
        .into_error()
        .into_val()),
        Control::Return(v) => Ok(v),
        Control::None => Ok(sub.acc.take().unwrap_or(Val::Null)),
        other => Err(Val::Error(ErrorInfo::new(
            errors::INVALID_CONTROL,
            format!("{} left a non-resumable region with {:?}", region, other),
        ))),
    }
}

/// Ask the host to run an external step, suspending the VM
///
/// Inside a non-resumable region only the block-scoped form gets this far.
/// The host must then settle it without suspending, see [`VM::enter_body`].
pub fn request_step(vm: &mut VM, name: &str, args: Vec<Val>) {
    let capability = match args.last() {
        Some(Val::Closure(_)) => Capability::BlockStep(name.to_string()),
        _ => Capability::Step(name.to_string()),
    };
    if !require(vm, capability) {
        return;
    }

    let id = vm.next_id();
    vm.control = Control::Suspend(Suspension::Step(StepRequest {
        id,
        name: name.to_string(),
        args,
    }));
}

/// Suspend on a fork; the host runs each branch and resumes with their results
pub fn fork(vm: &mut VM, branches: Vec<Branch>) {
    if !require(vm, Capability::Parallel) {
        return;
    }
    if branches.is_empty() {
        return vm.set_acc(Val::Obj(BTreeMap::new()));
    }

    let id = vm.next_id();
    let bindings = vm.visible_bindings();
    vm.control = Control::Suspend(Suspension::Join(ForkRequest {
        id,
        branches,
        bindings,
    }));
}

/// Check `capability` against the open non-resumable regions
///
/// A mismatch is always reported. Capabilities with a synchronous fallback
/// carry on; the rest throw it where the script can catch it, and `false`
/// tells the caller to stop.
pub fn require(vm: &mut VM, capability: Capability) -> bool {
    let Err(mismatch) = vm.guard.check(&capability) else {
        return true;
    };
    vm.outbox.diagnostics.push(mismatch.message());
    if capability.has_fallback() {
        return true;
    }
    vm.throw(mismatch.into_error());
    false
}

fn bind_params(params: &[String], args: Vec<Val>) -> BTreeMap<String, Val> {
    let mut args = args.into_iter();
    params
        .iter()
        .map(|p| (p.clone(), args.next().unwrap_or(Val::Null)))
        .collect()
}

fn arity_error(name: &str, expected: usize, got: usize) -> ErrorInfo {
    ErrorInfo::new(
        errors::WRONG_ARG_COUNT,
        format!("{}() expects {} arguments, got {}", name, expected, got),
    )
}
