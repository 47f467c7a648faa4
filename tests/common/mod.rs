//! Shared fixtures for controller tests: scripts, steps, and polling helpers

#![allow(dead_code)]

use rhythm_cps::{
    EngineConfig, ProgramController, ProgramId, ProgramStore, Script, StepDescriptor, StepError,
    StepRegistry, Started, Val,
};
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Script whose top-level body is a block of the given statements
pub fn body(statements: &str) -> Script {
    Script::from_json(&format!(
        r#"{{"body": {{"t": "Block", "body": {}}}}}"#,
        statements
    ))
    .expect("Script parse failed")
}

pub fn script(json: &str) -> Script {
    Script::from_json(json).expect("Script parse failed")
}

/// Steps used across tests
///
/// - `echo(x)`: logs `x`, completes synchronously with `x`
/// - `sleep(ms)`: completes with "slept" after `ms` milliseconds on a tokio task
/// - `hang()`: never completes; stopping it succeeds
/// - `unkillable()`: never completes; its stop hook always fails with a traced message
/// - `boom()`: fails to start
/// - `polygon(n) { ... }`: logs, then hands its body back to run
pub fn registry() -> StepRegistry {
    StepRegistry::new()
        .with(StepDescriptor::new("echo", |cx| {
            let value = cx.arg(0).cloned().unwrap_or(Val::Null);
            cx.log(value.to_string());
            Ok(Started::Done(value))
        }))
        .with(StepDescriptor::new("sleep", |cx| {
            let ms = match cx.arg(0) {
                Some(Val::Num(n)) => *n as u64,
                _ => 0,
            };
            let callback = cx.callback();
            let cancel = cx.cancellation();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => callback.success(Val::str("slept")),
                    _ = cancel.cancelled() => {}
                }
            });
            Ok(Started::Pending)
        }))
        .with(StepDescriptor::new("hang", |_| Ok(Started::Pending)))
        .with(
            StepDescriptor::new("unkillable", |_| Ok(Started::Pending))
                .with_stop(|_, _| Err(StepError::new("never going to stop\n\tat Foo.bar"))),
        )
        .with(StepDescriptor::new("boom", |_| {
            Err(anyhow::anyhow!("boom refused to start").into())
        }))
        .with(StepDescriptor::new("polygon", |cx| {
            let sides = cx.arg(0).cloned().unwrap_or(Val::Null);
            cx.log(format!("wrapping in a {}-gon", sides));
            Ok(match cx.body() {
                Some(body) => Started::Body(body),
                None => Started::Done(Val::Null),
            })
        }))
}

pub fn controller(store: Arc<dyn ProgramStore>, registry: StepRegistry) -> ProgramController {
    ProgramController::new(store, registry, EngineConfig::default())
}

/// Poll until the program is parked on at least `count` steps
pub async fn wait_for_pending(controller: &ProgramController, id: ProgramId, count: usize) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if controller.pending_steps(id).await.unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("program never reached the expected pending steps");
}

pub async fn wait_for_completion(
    controller: &ProgramController,
    id: ProgramId,
) -> rhythm_cps::ProgramStatus {
    tokio::time::timeout(TIMEOUT, controller.wait_for_completion(id))
        .await
        .expect("program did not finish in time")
        .unwrap()
}
