//! Collection built-ins: size, keys, push, sort, each

use super::{arg_count, arg_type};
use crate::executor::calls::{call_sync, require};
use crate::executor::errors::{self, ErrorInfo};
use crate::executor::guard::Capability;
use crate::executor::types::{Closure, Control, FrameKind, Val};
use crate::executor::vm::{Ctx, VM};
use std::cmp::Ordering;

/// size(x) - element count of a list or object, character count of a string
pub fn size(args: &[Val]) -> Result<Val, Val> {
    let [target] = args else {
        return Err(arg_count("size", 1, args.len()));
    };
    let n = match target {
        Val::List(items) => items.len(),
        Val::Obj(map) => map.len(),
        Val::Str(s) => s.chars().count(),
        other => {
            return Err(arg_type(format!(
                "size() expects a list, object or string, got {}",
                other.type_name()
            )))
        }
    };
    Ok(Val::Num(n as f64))
}

/// keys(obj) - property names in order
pub fn keys(args: &[Val]) -> Result<Val, Val> {
    match args {
        [Val::Obj(map)] => Ok(Val::List(map.keys().cloned().map(Val::Str).collect())),
        [other] => Err(arg_type(format!(
            "keys() expects an object, got {}",
            other.type_name()
        ))),
        _ => Err(arg_count("keys", 1, args.len())),
    }
}

/// push(list, item) - a new list with `item` appended
pub fn push(args: Vec<Val>) -> Result<Val, Val> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(Val::List(mut items)), Some(item), None) => {
            items.push(item);
            Ok(Val::List(items))
        }
        (Some(other), Some(_), None) => Err(arg_type(format!(
            "push() expects a list, got {}",
            other.type_name()
        ))),
        _ => Err(arg_count("push", 2, got)),
    }
}

/// sort(list, comparator?) - a sorted copy
///
/// Without a comparator values are ordered naturally. A comparator closure
/// runs synchronously inside a non-resumable region named `sort`; it returns
/// a negative number, zero, or a positive number.
pub fn sort(vm: &mut VM, cx: Ctx<'_>, args: Vec<Val>) -> Result<Val, Val> {
    let got = args.len();
    let mut args = args.into_iter();
    let items = match args.next() {
        Some(Val::List(items)) => items,
        Some(other) => {
            return Err(arg_type(format!(
                "sort() expects a list, got {}",
                other.type_name()
            )))
        }
        None => return Err(arg_count("sort", 1, got)),
    };

    match (args.next(), args.next()) {
        (None, _) => merge_sort(items, &mut natural_order).map(Val::List),
        (Some(Val::Closure(comparator)), None) => {
            require(vm, Capability::Sort);
            let mut compare = |a: &Val, b: &Val| compare_with(vm, cx, &comparator, a, b);
            merge_sort(items, &mut compare).map(Val::List)
        }
        (Some(other), None) => Err(arg_type(format!(
            "sort() comparator must be a closure, got {}",
            other.type_name()
        ))),
        _ => Err(arg_count("sort", 2, got)),
    }
}

/// each(list, closure) - call `closure` per item; yields the list
///
/// The iteration lives on the frame stack, so the closure may call steps.
pub fn each(vm: &mut VM, args: Vec<Val>) {
    let got = args.len();
    let mut args = args.into_iter();
    let (items, closure) = match (args.next(), args.next(), args.next()) {
        (Some(Val::List(items)), Some(Val::Closure(closure)), None) => (items, closure),
        (Some(Val::Obj(map)), Some(Val::Closure(closure)), None) => {
            (map.into_keys().map(Val::Str).collect(), closure)
        }
        (Some(_), Some(_), None) => {
            return throw(vm, arg_type("each() expects a list and a closure"));
        }
        _ => return throw(vm, arg_count("each", 2, got)),
    };

    vm.push_frame(FrameKind::Each {
        items,
        idx: 0,
        closure,
    });
}

fn throw(vm: &mut VM, error: Val) {
    vm.control = Control::Throw(error);
}

fn compare_with(
    vm: &mut VM,
    cx: Ctx<'_>,
    comparator: &Closure,
    a: &Val,
    b: &Val,
) -> Result<Ordering, Val> {
    match call_sync(vm, cx, "sort", comparator.clone(), vec![a.clone(), b.clone()])? {
        Val::Num(n) if n < 0.0 => Ok(Ordering::Less),
        Val::Num(n) if n > 0.0 => Ok(Ordering::Greater),
        Val::Num(_) => Ok(Ordering::Equal),
        other => Err(Val::Error(ErrorInfo::new(
            errors::TYPE_ERROR,
            format!("sort comparator must return a number, got {}", other.type_name()),
        ))),
    }
}

/// Natural ordering: numbers, strings, and booleans among themselves
pub fn natural_order(a: &Val, b: &Val) -> Result<Ordering, Val> {
    match (a, b) {
        (Val::Num(x), Val::Num(y)) => Ok(x.partial_cmp(y).unwrap_or(Ordering::Equal)),
        (Val::Str(x), Val::Str(y)) => Ok(x.cmp(y)),
        (Val::Bool(x), Val::Bool(y)) => Ok(x.cmp(y)),
        (Val::Null, Val::Null) => Ok(Ordering::Equal),
        _ => Err(Val::Error(ErrorInfo::new(
            errors::TYPE_ERROR,
            format!("Cannot compare {} and {}", a.type_name(), b.type_name()),
        ))),
    }
}

/// Stable top-down merge sort with a fallible comparator
///
/// Script comparators need not be consistent, so this never relies on the
/// total-order requirements of `slice::sort_by`.
fn merge_sort(
    mut items: Vec<Val>,
    compare: &mut dyn FnMut(&Val, &Val) -> Result<Ordering, Val>,
) -> Result<Vec<Val>, Val> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare)?;
    let right = merge_sort(right, compare)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(l, r)? != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        out.extend(next);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_size_of_each_container() {
        let list = Val::List(vec![Val::Null, Val::Null]);
        let obj = Val::Obj(btreemap! { "a".to_string() => Val::Null });
        assert_eq!(size(&[list]).unwrap(), Val::Num(2.0));
        assert_eq!(size(&[obj]).unwrap(), Val::Num(1.0));
        assert_eq!(size(&[Val::str("héllo")]).unwrap(), Val::Num(5.0));
        assert!(size(&[Val::Num(1.0)]).is_err());
    }

    #[test]
    fn test_push_returns_new_list() {
        let v = push(vec![Val::List(vec![Val::Num(1.0)]), Val::Num(2.0)]).unwrap();
        assert_eq!(v, Val::List(vec![Val::Num(1.0), Val::Num(2.0)]));
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let items = vec![
            Val::List(vec![Val::Num(2.0), Val::str("a")]),
            Val::List(vec![Val::Num(1.0), Val::str("b")]),
            Val::List(vec![Val::Num(2.0), Val::str("c")]),
        ];
        let by_first = &mut |a: &Val, b: &Val| match (a, b) {
            (Val::List(x), Val::List(y)) => natural_order(&x[0], &y[0]),
            _ => unreachable!(),
        };
        let sorted = merge_sort(items, by_first).unwrap();
        let tags: Vec<String> = sorted
            .iter()
            .map(|v| match v {
                Val::List(x) => x[1].to_string(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(tags, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_natural_order_rejects_mixed_types() {
        let err = merge_sort(vec![Val::Num(1.0), Val::str("x")], &mut natural_order).unwrap_err();
        let Val::Error(err) = err else {
            unreachable!("Expected error value");
        };
        assert_eq!(err.code, errors::TYPE_ERROR);
    }
}
