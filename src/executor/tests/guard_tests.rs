//! Tests for non-resumable regions and mismatch reporting

use super::helpers::{body, drive, drive_vm, script};
use crate::executor::errors;
use crate::executor::{Ctx, DriveResult, Suspension, Val};

fn failure(result: DriveResult) -> crate::executor::ErrorInfo {
    let DriveResult::Failed(err) = result else {
        unreachable!("Expected failure, got {:?}", result);
    };
    err
}

#[test]
fn test_step_in_non_resumable_function_is_catchable_mismatch() {
    let s = script(
        r#"{
        "functions": [{"name": "bad", "non_resumable": true, "body": {
            "t": "Expr", "expr": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 1}]}}}],
        "body": {"t": "Try",
            "body": {"t": "Expr", "expr": {"t": "Call", "callee": "bad"}},
            "catch_var": "e",
            "catch_body": {"t": "Return", "value": {"t": "LitList", "elements": [
                {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "code"},
                {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "routine"},
                {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "capability"},
                {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "message"}
            ]}}}
    }"#,
    );

    let (vm, result) = drive(&s);
    assert_eq!(
        result,
        DriveResult::Completed(Val::List(vec![
            Val::str(errors::MISMATCH),
            Val::str("bad"),
            Val::str("sleep"),
            Val::str("bad is not NonCPS-transparent (uses sleep)"),
        ]))
    );
    assert_eq!(
        vm.outbox.diagnostics,
        vec!["bad is not NonCPS-transparent (uses sleep)".to_string()]
    );
    assert!(!vm.guard.is_active());
}

#[test]
fn test_uncaught_mismatch_fails_the_run() {
    let s = script(
        r#"{
        "functions": [{"name": "bad", "non_resumable": true, "body": {
            "t": "Expr", "expr": {"t": "Call", "callee": "sleep"}}}],
        "body": {"t": "Expr", "expr": {"t": "Call", "callee": "bad"}}
    }"#,
    );

    let (_, result) = drive(&s);
    let err = failure(result);
    assert_eq!(err.code, errors::MISMATCH);
    assert_eq!(err.message, "bad is not NonCPS-transparent (uses sleep)");
}

#[test]
fn test_step_inside_each_inside_non_resumable_function() {
    let s = script(
        r#"{
        "functions": [{"name": "shouldBomb", "non_resumable": true, "body": {
            "t": "Expr", "expr": {"t": "Call", "callee": "each", "args": [
                {"t": "LitList", "elements": [{"t": "LitStr", "v": "f.txt"}]},
                {"t": "Lambda", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "writeFile", "args": [{"t": "Ident", "name": "it"}]}}}
            ]}}}],
        "body": {"t": "Expr", "expr": {"t": "Call", "callee": "shouldBomb"}}
    }"#,
    );

    let (_, result) = drive(&s);
    let err = failure(result);
    assert_eq!(err.details["routine"], Val::str("shouldBomb"));
    assert_eq!(err.details["capability"], Val::str("writeFile"));
}

#[test]
fn test_sort_with_comparator_falls_back_inside_non_resumable_function() {
    // sorter(list) { return sort(list, { a, b -> b - a }) }
    let s = script(
        r#"{
        "functions": [{"name": "sorter", "params": ["list"], "non_resumable": true, "body": {
            "t": "Return", "value": {"t": "Call", "callee": "sort", "args": [
                {"t": "Ident", "name": "list"},
                {"t": "Lambda", "params": ["a", "b"], "body": {"t": "Expr", "expr": {
                    "t": "Binary", "op": "Sub",
                    "left": {"t": "Ident", "name": "b"}, "right": {"t": "Ident", "name": "a"}}}}
            ]}}}],
        "body": {"t": "Return", "value": {"t": "Call", "callee": "sorter", "args": [
            {"t": "LitList", "elements": [{"t": "LitNum", "v": 1}, {"t": "LitNum", "v": 3}, {"t": "LitNum", "v": 2}]}]}}
    }"#,
    );

    let (vm, result) = drive(&s);
    assert_eq!(
        result,
        DriveResult::Completed(Val::List(vec![
            Val::Num(3.0),
            Val::Num(2.0),
            Val::Num(1.0)
        ]))
    );
    assert_eq!(
        vm.outbox.diagnostics,
        vec!["sorter is not NonCPS-transparent (uses sort)".to_string()]
    );
}

#[test]
fn test_sort_with_comparator_outside_region_is_silent() {
    let s = body(
        r#"[{"t": "Return", "value": {"t": "Call", "callee": "sort", "args": [
        {"t": "LitList", "elements": [{"t": "LitStr", "v": "b"}, {"t": "LitStr", "v": "a"}]},
        {"t": "Lambda", "params": ["x", "y"], "body": {"t": "Expr", "expr": {
            "t": "Binary", "op": "Sub",
            "left": {"t": "Call", "callee": "size", "args": [{"t": "Ident", "name": "x"}]},
            "right": {"t": "Call", "callee": "size", "args": [{"t": "Ident", "name": "y"}]}}}}
    ]}}]"#,
    );

    let (vm, result) = drive(&s);
    // Equal sizes keep the original order
    assert_eq!(
        result,
        DriveResult::Completed(Val::List(vec![Val::str("b"), Val::str("a")]))
    );
    assert!(vm.outbox.diagnostics.is_empty());
}

#[test]
fn test_step_inside_sort_comparator_names_sort() {
    let s = body(
        r#"[{"t": "Return", "value": {"t": "Call", "callee": "sort", "args": [
        {"t": "LitList", "elements": [{"t": "LitNum", "v": 2}, {"t": "LitNum", "v": 1}]},
        {"t": "Lambda", "params": ["a", "b"], "body": {"t": "Block", "body": [
            {"t": "Expr", "expr": {"t": "Call", "callee": "call"}},
            {"t": "Return", "value": {"t": "LitNum", "v": 0}}
        ]}}
    ]}}]"#,
    );

    let (vm, result) = drive(&s);
    let err = failure(result);
    assert_eq!(err.message, "sort is not NonCPS-transparent (uses call)");
    assert_eq!(vm.outbox.diagnostics, vec![err.message.clone()]);
}

#[test]
fn test_block_step_in_non_resumable_function_still_reaches_host() {
    // @NonCPS bad() { return polygon(17) { "inside" } }
    let s = script(
        r#"{
        "functions": [{"name": "bad", "non_resumable": true, "body": {
            "t": "Return", "value": {"t": "Call", "callee": "polygon", "args": [
                {"t": "LitNum", "v": 17},
                {"t": "Lambda", "body": {"t": "Expr", "expr": {"t": "LitStr", "v": "inside"}}}
            ]}}}],
        "body": {"t": "Return", "value": {"t": "Call", "callee": "bad"}}
    }"#,
    );

    let (mut vm, result) = drive(&s);
    let DriveResult::Suspended(Suspension::Step(req)) = result else {
        unreachable!("Expected step suspension, got {:?}", result);
    };
    assert_eq!(req.name, "polygon");
    assert_eq!(
        vm.take_diagnostics(),
        vec!["bad is not NonCPS-transparent (uses polygon)".to_string()]
    );

    let Val::Closure(block) = req.args[1].clone() else {
        unreachable!("Expected the body closure, got {:?}", req.args[1]);
    };
    vm.enter_body(req.id, block, Ctx::new(&s)).unwrap();
    let (vm, result) = drive_vm(vm, &s);
    assert_eq!(result, DriveResult::Completed(Val::str("inside")));
    assert!(!vm.guard.is_active());
}

#[test]
fn test_block_step_inside_sort_comparator_is_thrown() {
    let s = body(
        r#"[{"t": "Return", "value": {"t": "Call", "callee": "sort", "args": [
        {"t": "LitList", "elements": [{"t": "LitNum", "v": 2}, {"t": "LitNum", "v": 1}]},
        {"t": "Lambda", "params": ["a", "b"], "body": {"t": "Expr", "expr": {"t": "Call", "callee": "polygon", "args": [
            {"t": "LitNum", "v": 3},
            {"t": "Lambda", "body": {"t": "Block", "body": []}}
        ]}}}
    ]}}]"#,
    );

    let (vm, result) = drive(&s);
    let err = failure(result);
    assert_eq!(err.code, errors::MISMATCH);
    assert_eq!(err.details["routine"], Val::str("sort"));
    assert_eq!(err.details["capability"], Val::str("polygon"));
    assert_eq!(vm.outbox.diagnostics, vec![err.message.clone()]);
}

#[test]
fn test_parallel_inside_non_resumable_function() {
    let s = script(
        r#"{
        "functions": [{"name": "fan", "non_resumable": true, "body": {
            "t": "Expr", "expr": {"t": "Parallel", "branches": [
                {"name": "a", "body": {"t": "Block", "body": []}}]}}}],
        "body": {"t": "Expr", "expr": {"t": "Call", "callee": "fan"}}
    }"#,
    );

    let (_, result) = drive(&s);
    let err = failure(result);
    assert_eq!(err.message, "fan is not NonCPS-transparent (uses parallel)");
}

#[test]
fn test_region_closes_when_function_returns() {
    let s = script(
        r#"{
        "functions": [{"name": "quick", "non_resumable": true, "body": {
            "t": "Return", "value": {"t": "LitNum", "v": 1}}}],
        "body": {"t": "Block", "body": [
            {"t": "Declare", "name": "x", "init": {"t": "Call", "callee": "quick"}},
            {"t": "Expr", "expr": {"t": "Call", "callee": "sh", "args": [{"t": "Ident", "name": "x"}]}}
        ]}
    }"#,
    );

    let (vm, result) = drive(&s);
    let DriveResult::Suspended(Suspension::Step(req)) = result else {
        unreachable!("Expected step suspension, got {:?}", result);
    };
    assert_eq!(req.name, "sh");
    assert_eq!(req.args, vec![Val::Num(1.0)]);
    assert!(!vm.guard.is_active());
    assert!(vm.outbox.diagnostics.is_empty());
}

#[test]
fn test_lazy_interpolation_inside_non_resumable_function() {
    let s = script(
        r#"{
        "functions": [{"name": "render", "non_resumable": true, "body": {
            "t": "Return", "value": {"t": "Interpolate", "parts": [
                {"t": "LitStr", "v": "v="},
                {"t": "Lambda", "body": {"t": "Expr", "expr": {"t": "LitNum", "v": 7}}}
            ]}}}],
        "body": {"t": "Return", "value": {"t": "Call", "callee": "render"}}
    }"#,
    );

    let (vm, result) = drive(&s);
    assert_eq!(result, DriveResult::Completed(Val::str("v=7")));
    assert_eq!(
        vm.outbox.diagnostics,
        vec!["render is not NonCPS-transparent (uses interpolation)".to_string()]
    );
}

#[test]
fn test_to_string_coercion_inside_non_resumable_function() {
    let s = script(
        r#"{
        "functions": [{"name": "asType", "non_resumable": true, "body": {
            "t": "Return", "value": {"t": "Call", "callee": "str", "args": [
                {"t": "LitObj", "properties": [
                    ["toString", {"t": "Lambda", "body": {"t": "Expr", "expr": {"t": "LitStr", "v": "polygon"}}}]
                ]}
            ]}}}],
        "body": {"t": "Return", "value": {"t": "Call", "callee": "asType"}}
    }"#,
    );

    let (vm, result) = drive(&s);
    assert_eq!(result, DriveResult::Completed(Val::str("polygon")));
    assert_eq!(
        vm.outbox.diagnostics,
        vec!["asType is not NonCPS-transparent (uses toString)".to_string()]
    );
}
