//! End-to-end tests: programs driven by the controller against real stores

mod common;

use common::{body, controller, registry, script, wait_for_completion, wait_for_pending};
use rhythm_cps::executor::errors;
use rhythm_cps::{
    Caller, CauseOfInterruption, EngineError, FileStore, MemoryStore, ProgramId, ProgramStatus,
    StepDescriptor, Started, ThreadState, Val,
};
use std::sync::Arc;

#[tokio::test]
async fn test_unkillable_step_still_aborts() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(r#"[{"t": "Expr", "expr": {"t": "Call", "callee": "unkillable"}}]"#))
        .await
        .unwrap();
    wait_for_pending(&c, id, 1).await;

    c.interrupt(id, &Caller::Anonymous).unwrap();
    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Aborted);

    let causes = c.causes(id).await.unwrap();
    assert_eq!(causes.len(), 1);
    let CauseOfInterruption::UserInterruption { user, .. } = &causes[0] else {
        unreachable!("Expected a user interruption, got {:?}", causes[0]);
    };
    assert_eq!(user, "anonymous");

    let log = c.log(id).await.unwrap();
    assert!(log.iter().any(|l| l.contains("never going to stop")));
    assert!(!log.iter().any(|l| l.contains("\tat ")));
    assert!(log.contains(&"Aborted by anonymous".to_string()));

    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].state, ThreadState::Aborted);
    assert_eq!(
        program.threads[0].stop_failure.as_deref(),
        Some("never going to stop")
    );
}

#[tokio::test]
async fn test_asynchronous_step_resumes_thread() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[
            {"t": "Declare", "name": "x", "init": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 10}]}},
            {"t": "Expr", "expr": {"t": "Call", "callee": "echo", "args": [{"t": "Ident", "name": "x"}]}},
            {"t": "Return", "value": {"t": "Ident", "name": "x"}}
        ]"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);

    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::str("slept")));
    assert_eq!(program.log.lines(), vec!["slept", "Finished: SUCCESS"]);
    assert!(program.causes.is_empty());
}

#[tokio::test]
async fn test_failing_branch_fails_program() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[{"t": "Expr", "expr": {"t": "Parallel", "branches": [
                {"name": "ok", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 5}]}}},
                {"name": "bad", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "boom"}}}
            ]}}]"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Failure);

    let program = c.snapshot(id).await.unwrap();
    let states: Vec<ThreadState> = program.threads.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![ThreadState::Failed, ThreadState::Finished, ThreadState::Failed]
    );
    assert!(program.log.contains("ERROR: boom refused to start"));
    assert_eq!(
        program.threads[0].error.as_ref().map(|e| e.code.as_str()),
        Some(errors::PARALLEL_BRANCH_FAILED)
    );
}

#[tokio::test]
async fn test_interrupt_aborts_every_branch() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[{"t": "Expr", "expr": {"t": "Parallel", "branches": [
                {"name": "a", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "hang"}}},
                {"name": "b", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 60000}]}}}
            ]}}]"#,
        ))
        .await
        .unwrap();
    wait_for_pending(&c, id, 2).await;

    c.interrupt(id, &Caller::User("alice".into())).unwrap();
    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Aborted);

    let program = c.snapshot(id).await.unwrap();
    assert!(program
        .threads
        .iter()
        .all(|t| t.state == ThreadState::Aborted));
    assert!(program.log.contains("Aborted by alice"));
    assert!(program.pending_steps().is_empty());
}

#[tokio::test]
async fn test_mismatch_is_reported_and_catchable() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(script(
            r#"{
            "functions": [{"name": "fastPath", "non_resumable": true, "body": {
                "t": "Expr", "expr": {"t": "Call", "callee": "echo", "args": [{"t": "LitStr", "v": "hi"}]}}}],
            "body": {"t": "Try",
                "body": {"t": "Expr", "expr": {"t": "Call", "callee": "fastPath"}},
                "catch_var": "e",
                "catch_body": {"t": "Return", "value": {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "routine"}}}
        }"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);

    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::str("fastPath")));
    assert_eq!(
        program.log.lines(),
        vec![
            "fastPath is not NonCPS-transparent (uses echo)",
            "Finished: SUCCESS"
        ]
    );
}

#[tokio::test]
async fn test_external_completion() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[{"t": "Return", "value": {"t": "Call", "callee": "hang"}}]"#,
        ))
        .await
        .unwrap();
    wait_for_pending(&c, id, 1).await;

    let (thread, invocation) = {
        let pending = c.pending_steps(id).await.unwrap();
        (pending[0].0, pending[0].1.id)
    };

    // A stale id is ignored, the right one resumes the thread
    c.complete_step(id, thread, invocation + 7, Ok(Val::Null))
        .unwrap();
    c.complete_step(id, thread, invocation, Ok(Val::Num(42.0)))
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);
    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::Num(42.0)));
}

#[tokio::test]
async fn test_resume_after_restart_rearms_pending_step() {
    let dir = tempfile::tempdir().unwrap();
    let script = body(
        r#"[
        {"t": "Expr", "expr": {"t": "Call", "callee": "echo", "args": [{"t": "LitStr", "v": "before"}]}},
        {"t": "Declare", "name": "x", "init": {"t": "Call", "callee": "hang"}},
        {"t": "Expr", "expr": {"t": "Call", "callee": "echo", "args": [{"t": "Ident", "name": "x"}]}},
        {"t": "Return", "value": {"t": "Ident", "name": "x"}}
    ]"#,
    );

    let first = controller(Arc::new(FileStore::new(dir.path()).unwrap()), registry());
    let id = first.start(script).await.unwrap();
    wait_for_pending(&first, id, 1).await;
    first.shutdown().await;
    assert!(first.running().is_empty());

    // New process: the same step now completes as soon as it is re-armed
    let resumed = registry().with(
        StepDescriptor::new("hang", |_| Ok(Started::Pending)).with_on_resume(|cx| {
            cx.callback().success(Val::str("after"));
            Ok(())
        }),
    );
    let second = controller(Arc::new(FileStore::new(dir.path()).unwrap()), resumed);
    second.resume(id).await.unwrap();

    assert_eq!(wait_for_completion(&second, id).await, ProgramStatus::Success);
    let program = second.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::str("after")));
    assert_eq!(
        program.log.lines(),
        vec!["before", "after", "Finished: SUCCESS"]
    );

    // Resuming a finished program is a no-op
    second.resume(id).await.unwrap();
    assert_eq!(second.status(id).await.unwrap(), ProgramStatus::Success);
}

#[tokio::test]
async fn test_resume_unknown_program() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let missing = ProgramId::new();
    assert!(matches!(
        c.resume(missing).await,
        Err(EngineError::ProgramNotFound(id)) if id == missing
    ));
    assert!(matches!(
        c.interrupt(missing, &Caller::System),
        Err(EngineError::ProgramNotFound(_))
    ));
}

#[tokio::test]
async fn test_resume_rejects_tampered_script() {
    let store = Arc::new(MemoryStore::new());
    let c = controller(store.clone(), registry());
    let id = c
        .start(body(r#"[{"t": "Expr", "expr": {"t": "Call", "callee": "hang"}}]"#))
        .await
        .unwrap();
    wait_for_pending(&c, id, 1).await;
    c.shutdown().await;

    let mut program = rhythm_cps::ProgramStore::load(store.as_ref(), id)
        .await
        .unwrap()
        .unwrap();
    program.script_hash = "0".repeat(64);
    rhythm_cps::ProgramStore::save(store.as_ref(), &program)
        .await
        .unwrap();

    let fresh = controller(store, registry());
    assert!(matches!(
        fresh.resume(id).await,
        Err(EngineError::Corrupted { .. })
    ));
}

#[tokio::test]
async fn test_persistence_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let c = controller(store.clone(), registry());
    let id = c
        .start(body(
            r#"[{"t": "Expr", "expr": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 200}]}}]"#,
        ))
        .await
        .unwrap();
    wait_for_pending(&c, id, 1).await;

    let waiter = {
        let c = c.clone();
        tokio::spawn(async move { c.wait_for_completion(id).await })
    };
    store.fail_writes(true);

    let status = tokio::time::timeout(common::TIMEOUT, waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status, ProgramStatus::Failure);

    // The last good record is still what a restart would see
    store.fail_writes(false);
    let stored = rhythm_cps::ProgramStore::load(store.as_ref(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ProgramStatus::Running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_step_free_loop_can_be_interrupted() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[{"t": "While", "test": {"t": "LitBool", "v": true}, "body": {"t": "Block", "body": []}}]"#,
        ))
        .await
        .unwrap();

    // The runtime still serves other tasks while the script spins
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(c.running(), vec![id]);

    c.interrupt(id, &Caller::User("alice".into())).unwrap();
    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Aborted);
    assert!(c.log(id).await.unwrap().contains(&"Aborted by alice".to_string()));
}

#[tokio::test]
async fn test_block_step_in_non_resumable_function_runs_body() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(script(
            r#"{
            "functions": [{"name": "bad", "non_resumable": true, "body": {
                "t": "Expr", "expr": {"t": "Call", "callee": "polygon", "args": [
                    {"t": "LitNum", "v": 17},
                    {"t": "Lambda", "body": {"t": "Block", "body": []}}
                ]}}}],
            "body": {"t": "Expr", "expr": {"t": "Call", "callee": "bad"}}
        }"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);
    assert_eq!(
        c.log(id).await.unwrap(),
        vec![
            "bad is not NonCPS-transparent (uses polygon)",
            "wrapping in a 17-gon",
            "Finished: SUCCESS"
        ]
    );
}

#[tokio::test]
async fn test_step_body_can_suspend() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(body(
            r#"[{"t": "Return", "value": {"t": "Call", "callee": "polygon", "args": [
                {"t": "LitNum", "v": 5},
                {"t": "Lambda", "body": {"t": "Expr", "expr": {"t": "Call", "callee": "sleep", "args": [{"t": "LitNum", "v": 10}]}}}
            ]}}]"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);
    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::str("slept")));
    assert_eq!(
        program.log.lines(),
        vec!["wrapping in a 5-gon", "Finished: SUCCESS"]
    );
}

#[tokio::test]
async fn test_suspending_block_step_in_non_resumable_function_is_mismatch() {
    let c = controller(Arc::new(MemoryStore::new()), registry());
    let id = c
        .start(script(
            r#"{
            "functions": [{"name": "bad", "non_resumable": true, "body": {
                "t": "Expr", "expr": {"t": "Call", "callee": "hang", "args": [
                    {"t": "Lambda", "body": {"t": "Block", "body": []}}
                ]}}}],
            "body": {"t": "Try",
                "body": {"t": "Expr", "expr": {"t": "Call", "callee": "bad"}},
                "catch_var": "e",
                "catch_body": {"t": "Return", "value": {"t": "Member", "object": {"t": "Ident", "name": "e"}, "property": "capability"}}}
        }"#,
        ))
        .await
        .unwrap();

    assert_eq!(wait_for_completion(&c, id).await, ProgramStatus::Success);
    let program = c.snapshot(id).await.unwrap();
    assert_eq!(program.threads[0].result, Some(Val::str("hang")));
    assert!(program.pending_steps().is_empty());
}
