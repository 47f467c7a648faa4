//! Expression evaluation
//!
//! Leaf expressions (literals, identifiers, closure literals) finish
//! immediately by writing the accumulator. Anything with sub-expressions
//! pushes a frame, so a step call nested anywhere inside an expression can
//! suspend with the partially evaluated state on the frame stack.

use super::calls::{self, invoke_closure};
use super::errors::{self, ErrorInfo};
use super::stdlib::text;
use super::types::{
    BinaryOp, BinaryPhase, Closure, Collected, EvalPhase, Expr, FrameKind, UnaryOp, Val,
};
use super::vm::{undefined, Ctx, VM};
use std::cmp::Ordering;

/* ===================== Entry Point ===================== */

/// Start evaluating an expression
///
/// On return either `vm.acc` holds the value, a frame was pushed to finish the
/// work, or `vm.control` carries a throw or suspension.
pub fn eval_expr(vm: &mut VM, cx: Ctx<'_>, expr: &Expr) {
    if vm.frames.len() >= cx.max_frames {
        vm.throw(ErrorInfo::new(
            errors::STACK_OVERFLOW,
            format!("Frame stack exceeded {} entries", cx.max_frames),
        ));
        return;
    }

    match expr {
        Expr::LitNull => vm.set_acc(Val::Null),
        Expr::LitBool { v } => vm.set_acc(Val::Bool(*v)),
        Expr::LitNum { v } => vm.set_acc(Val::Num(*v)),
        Expr::LitStr { v } => vm.set_acc(Val::Str(v.clone())),

        Expr::Ident { name } => match vm.lookup(name).cloned() {
            Some(v) => vm.set_acc(v),
            None => vm.throw(undefined(name)),
        },

        Expr::LitList { elements } => collect(vm, elements.clone(), Collected::List),
        Expr::LitObj { properties } => {
            let (keys, exprs): (Vec<String>, Vec<Expr>) = properties.iter().cloned().unzip();
            collect(vm, exprs, Collected::Obj { keys });
        }
        Expr::Interpolate { parts } => collect(vm, parts.clone(), Collected::Interpolate),
        Expr::Call { callee, args } => collect(
            vm,
            args.clone(),
            Collected::Call {
                callee: callee.clone(),
            },
        ),

        Expr::Member { object, property } => vm.push_frame(FrameKind::Member {
            object: (**object).clone(),
            property: property.clone(),
            phase: EvalPhase::Eval,
        }),
        Expr::Unary { op, operand } => vm.push_frame(FrameKind::Unary {
            op: *op,
            operand: (**operand).clone(),
            phase: EvalPhase::Eval,
        }),
        Expr::Binary { op, left, right } => vm.push_frame(FrameKind::Binary {
            op: *op,
            left: (**left).clone(),
            right: (**right).clone(),
            lhs: None,
            phase: BinaryPhase::Left,
        }),

        Expr::Lambda { params, body } => {
            let closure = Closure {
                params: params.clone(),
                body: body.clone(),
                captured: vm.visible_bindings(),
            };
            vm.set_acc(Val::Closure(closure));
        }

        Expr::Parallel { branches } => calls::fork(vm, branches.clone()),
    }
}

fn collect(vm: &mut VM, exprs: Vec<Expr>, then: Collected) {
    vm.push_frame(FrameKind::Collect {
        exprs,
        done: vec![],
        pending: false,
        then,
    });
}

/* ===================== Frame Handlers ===================== */

/// Evaluate a list of expressions left to right, then finish
pub fn execute_collect(
    vm: &mut VM,
    cx: Ctx<'_>,
    exprs: Vec<Expr>,
    mut done: Vec<Val>,
    pending: bool,
    then: Collected,
    depth: usize,
) {
    if pending {
        done.push(vm.take_acc());
    }

    if let Some(next) = exprs.get(done.len()).cloned() {
        vm.repush(
            FrameKind::Collect {
                exprs,
                done,
                pending: true,
                then,
            },
            depth,
        );
        eval_expr(vm, cx, &next);
        return;
    }

    match then {
        Collected::List => vm.set_acc(Val::List(done)),
        Collected::Obj { keys } => vm.set_acc(Val::Obj(keys.into_iter().zip(done).collect())),
        Collected::Interpolate => text::interpolate(vm, cx, done),
        Collected::Call { callee } => calls::dispatch_call(vm, cx, &callee, done),
    }
}

/// Execute member access (`obj.prop`)
pub fn execute_member(
    vm: &mut VM,
    cx: Ctx<'_>,
    object: Expr,
    property: String,
    phase: EvalPhase,
    depth: usize,
) {
    match phase {
        EvalPhase::Eval => {
            let expr = object.clone();
            vm.repush(
                FrameKind::Member {
                    object,
                    property,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        EvalPhase::Apply => {
            let target = vm.take_acc();
            match member(&target, &property) {
                Ok(v) => vm.set_acc(v),
                Err(e) => vm.throw(e),
            }
        }
    }
}

/// Execute unary operator
pub fn execute_unary(
    vm: &mut VM,
    cx: Ctx<'_>,
    op: UnaryOp,
    operand: Expr,
    phase: EvalPhase,
    depth: usize,
) {
    match phase {
        EvalPhase::Eval => {
            let expr = operand.clone();
            vm.repush(
                FrameKind::Unary {
                    op,
                    operand,
                    phase: EvalPhase::Apply,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        EvalPhase::Apply => match (op, vm.take_acc()) {
            (UnaryOp::Not, v) => vm.set_acc(Val::Bool(!v.is_truthy())),
            (UnaryOp::Neg, Val::Num(n)) => vm.set_acc(Val::Num(-n)),
            (UnaryOp::Neg, other) => vm.throw(ErrorInfo::new(
                errors::TYPE_ERROR,
                format!("Cannot negate {}", other.type_name()),
            )),
        },
    }
}

/// Execute binary operator; `&&` and `||` short-circuit
#[allow(clippy::too_many_arguments)]
pub fn execute_binary(
    vm: &mut VM,
    cx: Ctx<'_>,
    op: BinaryOp,
    left: Expr,
    right: Expr,
    lhs: Option<Val>,
    phase: BinaryPhase,
    depth: usize,
) {
    match phase {
        BinaryPhase::Left => {
            let expr = left.clone();
            vm.repush(
                FrameKind::Binary {
                    op,
                    left,
                    right,
                    lhs: None,
                    phase: BinaryPhase::Right,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        BinaryPhase::Right => {
            let l = vm.take_acc();
            match op {
                BinaryOp::And if !l.is_truthy() => return vm.set_acc(Val::Bool(false)),
                BinaryOp::Or if l.is_truthy() => return vm.set_acc(Val::Bool(true)),
                _ => {}
            }
            let expr = right.clone();
            vm.repush(
                FrameKind::Binary {
                    op,
                    left,
                    right,
                    lhs: Some(l),
                    phase: BinaryPhase::Done,
                },
                depth,
            );
            eval_expr(vm, cx, &expr);
        }
        BinaryPhase::Done => {
            let r = vm.take_acc();
            let l = lhs.unwrap_or(Val::Null);
            match binary_op(op, l, r) {
                Ok(v) => vm.set_acc(v),
                Err(e) => vm.throw(e),
            }
        }
    }
}

/// A routine body ran off its end without `return`
pub fn execute_invoke(vm: &mut VM, guard_depth: usize, depth: usize) {
    vm.scopes.truncate(depth);
    vm.guard.truncate(guard_depth);
    vm.set_acc(Val::Null);
}

/// The resumable `each`: one closure call per item, then yield the list
pub fn execute_each(
    vm: &mut VM,
    cx: Ctx<'_>,
    items: Vec<Val>,
    idx: usize,
    closure: Closure,
    depth: usize,
) {
    // Result of the previous closure call is not used
    vm.acc = None;

    let Some(item) = items.get(idx).cloned() else {
        vm.set_acc(Val::List(items));
        return;
    };

    let body = closure.clone();
    vm.repush(
        FrameKind::Each {
            items,
            idx: idx + 1,
            closure,
        },
        depth,
    );
    invoke_closure(vm, cx, "each", body, vec![item]);
}

/* ===================== Operators ===================== */

/// Read a property off a value
pub fn member(target: &Val, property: &str) -> Result<Val, ErrorInfo> {
    match (target, property) {
        (Val::Obj(map), _) => map.get(property).cloned().ok_or_else(|| {
            ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("Property '{}' not found", property),
            )
        }),
        (Val::Error(err), "code") => Ok(Val::Str(err.code.clone())),
        (Val::Error(err), "message") => Ok(Val::Str(err.message.clone())),
        (Val::Error(err), _) => err.details.get(property).cloned().ok_or_else(|| {
            ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("Property '{}' not found", property),
            )
        }),
        (Val::List(items), "size") => Ok(Val::Num(items.len() as f64)),
        (Val::Str(s), "length") | (Val::Str(s), "size") => Ok(Val::Num(s.chars().count() as f64)),
        _ => Err(ErrorInfo::new(
            errors::TYPE_ERROR,
            format!(
                "Cannot access property '{}' on {}",
                property,
                target.type_name()
            ),
        )),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn type_mismatch(op: BinaryOp, l: &Val, r: &Val) -> ErrorInfo {
    ErrorInfo::new(
        errors::TYPE_ERROR,
        format!(
            "Cannot apply '{}' to {} and {}",
            op_symbol(op),
            l.type_name(),
            r.type_name()
        ),
    )
}

/// Numbers must stay finite: a continuation holding inf or NaN cannot be stored
fn finite(op: BinaryOp, n: f64) -> Result<Val, ErrorInfo> {
    if n.is_finite() {
        Ok(Val::Num(n))
    } else {
        Err(ErrorInfo::new(
            errors::NUMERIC_OVERFLOW,
            format!("Result of '{}' is not a finite number", op_symbol(op)),
        ))
    }
}

/// Apply a strict binary operator to two evaluated operands
pub fn binary_op(op: BinaryOp, l: Val, r: Val) -> Result<Val, ErrorInfo> {
    match op {
        BinaryOp::Eq => Ok(Val::Bool(l == r)),
        BinaryOp::Ne => Ok(Val::Bool(l != r)),
        BinaryOp::And | BinaryOp::Or => Ok(Val::Bool(r.is_truthy())),

        BinaryOp::Add => match (l, r) {
            (Val::Num(a), Val::Num(b)) => finite(op, a + b),
            (Val::List(mut a), Val::List(b)) => {
                a.extend(b);
                Ok(Val::List(a))
            }
            (l @ Val::Str(_), r) | (l, r @ Val::Str(_)) => Ok(Val::Str(format!("{}{}", l, r))),
            (l, r) => Err(type_mismatch(op, &l, &r)),
        },

        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (Val::Num(a), Val::Num(b)) = (&l, &r) else {
                return Err(type_mismatch(op, &l, &r));
            };
            let (a, b) = (*a, *b);
            let n = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ if b == 0.0 => {
                    return Err(ErrorInfo::new(
                        errors::DIVISION_BY_ZERO,
                        "Division by zero",
                    ))
                }
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            finite(op, n)
        }

        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
                (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
                _ => return Err(type_mismatch(op, &l, &r)),
            };
            let result = match ordering {
                None => false,
                Some(o) => match op {
                    BinaryOp::Lt => o == Ordering::Less,
                    BinaryOp::Le => o != Ordering::Greater,
                    BinaryOp::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                },
            };
            Ok(Val::Bool(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_concat_renders_other_side() {
        let v = binary_op(BinaryOp::Add, Val::str("n="), Val::Num(3.0)).unwrap();
        assert_eq!(v, Val::str("n=3"));
    }

    #[test]
    fn test_modulo_by_zero() {
        let err = binary_op(BinaryOp::Mod, Val::Num(1.0), Val::Num(0.0)).unwrap_err();
        assert_eq!(err.code, errors::DIVISION_BY_ZERO);
    }

    #[test]
    fn test_compare_mixed_types_is_type_error() {
        let err = binary_op(BinaryOp::Lt, Val::Num(1.0), Val::str("a")).unwrap_err();
        assert_eq!(err.code, errors::TYPE_ERROR);
        assert_eq!(err.message, "Cannot apply '<' to number and string");
    }

    #[test]
    fn test_error_members() {
        let err = ErrorInfo::new("Boom", "it broke").with_detail("step", Val::str("sh"));
        let v = Val::Error(err);
        assert_eq!(member(&v, "code").unwrap(), Val::str("Boom"));
        assert_eq!(member(&v, "message").unwrap(), Val::str("it broke"));
        assert_eq!(member(&v, "step").unwrap(), Val::str("sh"));
        assert_eq!(
            member(&v, "nope").unwrap_err().code,
            errors::PROPERTY_NOT_FOUND
        );
    }
}
