//! The seam between a thread and step implementations

use super::{StepContext, StepError, StepRegistry, Started};
use crate::executor::errors;
use crate::executor::{Closure, ErrorInfo, StepRequest, Val};
use crate::program::events::EventSender;
use crate::program::log::RunLog;
use crate::program::types::{CauseOfInterruption, ProgramId, ThreadId};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of handing a step request across the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Invoked {
    /// The step finished (or failed to start) synchronously
    Completed(Result<Val, ErrorInfo>),
    /// The step is running; its callback will deliver the outcome
    Pending,
    /// The step is done and hands its body back to the thread to run
    Body(Closure),
}

/// How threads start and stop steps
pub trait Boundary {
    fn invoke(&mut self, thread: ThreadId, request: &StepRequest) -> Invoked;

    /// Stop a pending invocation. Errors come from the step's own stop hook.
    fn stop(
        &mut self,
        thread: ThreadId,
        invocation: u64,
        cause: &CauseOfInterruption,
    ) -> Result<(), StepError>;

    /// Forget an invocation whose outcome has been delivered
    fn complete(&mut self, thread: ThreadId, invocation: u64);

    /// Re-attach a pending invocation after the program was loaded from storage
    fn rearm(&mut self, thread: ThreadId, request: &StepRequest) -> Result<(), StepError>;
}

/// Message for a call that matches no step
pub fn no_such_step(name: &str) -> ErrorInfo {
    ErrorInfo::new(
        errors::NO_SUCH_STEP,
        format!("No such DSL method '{}'", name),
    )
}

/// Boundary backed by a [`StepRegistry`], one per live program
pub struct StepHost {
    program: ProgramId,
    registry: Arc<StepRegistry>,
    events: EventSender,
    log: RunLog,
    live: HashMap<(ThreadId, u64), StepContext>,
}

impl StepHost {
    pub fn new(
        program: ProgramId,
        registry: Arc<StepRegistry>,
        events: EventSender,
        log: RunLog,
    ) -> Self {
        Self {
            program,
            registry,
            events,
            log,
            live: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.live.len()
    }

    fn context(&self, thread: ThreadId, request: &StepRequest) -> StepContext {
        StepContext::new(
            self.program,
            thread,
            request.id,
            request.name.clone(),
            request.args.clone(),
            self.events.clone(),
            self.log.clone(),
        )
    }
}

impl Boundary for StepHost {
    fn invoke(&mut self, thread: ThreadId, request: &StepRequest) -> Invoked {
        let Some(descriptor) = self.registry.get(&request.name) else {
            return Invoked::Completed(Err(no_such_step(&request.name)));
        };

        let cx = self.context(thread, request);
        match descriptor.start(&cx) {
            Ok(Started::Done(value)) => {
                cx.callback().settle();
                Invoked::Completed(Ok(value))
            }
            Ok(Started::Body(body)) => {
                cx.callback().settle();
                tracing::debug!(
                    program = %self.program,
                    %thread,
                    step = %request.name,
                    invocation = request.id,
                    "Step entering body"
                );
                Invoked::Body(body)
            }
            Ok(Started::Pending) => {
                tracing::debug!(
                    program = %self.program,
                    %thread,
                    step = %request.name,
                    invocation = request.id,
                    "Step pending"
                );
                self.live.insert((thread, request.id), cx);
                Invoked::Pending
            }
            Err(err) => {
                cx.callback().settle();
                Invoked::Completed(Err(ErrorInfo::new(errors::STEP_FAILED, err.message())))
            }
        }
    }

    fn stop(
        &mut self,
        thread: ThreadId,
        invocation: u64,
        cause: &CauseOfInterruption,
    ) -> Result<(), StepError> {
        let Some(cx) = self.live.remove(&(thread, invocation)) else {
            return Ok(());
        };
        cx.callback().settle();
        cx.cancel();

        match self.registry.get(cx.name()) {
            Some(descriptor) => descriptor.stop(&cx, cause),
            None => Ok(()),
        }
    }

    fn complete(&mut self, thread: ThreadId, invocation: u64) {
        self.live.remove(&(thread, invocation));
    }

    fn rearm(&mut self, thread: ThreadId, request: &StepRequest) -> Result<(), StepError> {
        let Some(descriptor) = self.registry.get(&request.name) else {
            return Err(StepError::new(no_such_step(&request.name).message));
        };
        let cx = self.context(thread, request);
        descriptor.on_resume(&cx)?;
        self.live.insert((thread, request.id), cx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::events::{self, ProgramEvent};
    use crate::program::types::Caller;
    use crate::steps::StepDescriptor;

    fn host(registry: StepRegistry) -> (StepHost, events::EventReceiver, RunLog) {
        let (tx, rx) = events::channel();
        let log = RunLog::new();
        let host = StepHost::new(ProgramId::new(), Arc::new(registry), tx, log.clone());
        (host, rx, log)
    }

    fn request(id: u64, name: &str) -> StepRequest {
        StepRequest {
            id,
            name: name.to_string(),
            args: vec![Val::str("x")],
        }
    }

    #[test]
    fn test_unknown_step_fails_synchronously() {
        let (mut host, _rx, _) = host(StepRegistry::new());
        let Invoked::Completed(Err(err)) = host.invoke(ThreadId::MAIN, &request(0, "sh")) else {
            unreachable!("Expected synchronous failure");
        };
        assert_eq!(err.code, errors::NO_SUCH_STEP);
        assert_eq!(err.message, "No such DSL method 'sh'");
    }

    #[test]
    fn test_synchronous_step_logs_and_returns() {
        let registry = StepRegistry::new().with(StepDescriptor::new("echo", |cx| {
            cx.log(cx.arg(0).map(|v| v.to_string()).unwrap_or_default());
            Ok(Started::Done(Val::Null))
        }));
        let (mut host, _rx, log) = host(registry);

        let invoked = host.invoke(ThreadId::MAIN, &request(0, "echo"));
        assert_eq!(invoked, Invoked::Completed(Ok(Val::Null)));
        assert_eq!(log.lines(), vec!["x"]);
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn test_start_error_becomes_step_failed() {
        let registry =
            StepRegistry::new().with(StepDescriptor::new("boom", |_| Err("bad args".into())));
        let (mut host, _rx, _) = host(registry);

        let Invoked::Completed(Err(err)) = host.invoke(ThreadId::MAIN, &request(0, "boom")) else {
            unreachable!("Expected synchronous failure");
        };
        assert_eq!(err.code, errors::STEP_FAILED);
        assert_eq!(err.message, "bad args");
    }

    #[tokio::test]
    async fn test_stop_cancels_and_reports_hook_failure() {
        let registry = StepRegistry::new().with(
            StepDescriptor::new("unkillable", |_| Ok(Started::Pending))
                .with_stop(|_, _| Err(StepError::new("never going to stop"))),
        );
        let (mut host, mut rx, _) = host(registry);

        assert_eq!(
            host.invoke(ThreadId::MAIN, &request(4, "unkillable")),
            Invoked::Pending
        );
        let cx = host.live[&(ThreadId::MAIN, 4)].clone();

        let cause = CauseOfInterruption::for_caller(&Caller::Anonymous);
        let err = host.stop(ThreadId::MAIN, 4, &cause).unwrap_err();
        assert_eq!(err.message(), "never going to stop");
        assert!(cx.is_cancelled());

        // A completion after the stop is dropped
        cx.callback().success(Val::Null);
        drop(cx);
        drop(host);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rearm_runs_on_resume_hook() {
        let registry = StepRegistry::new().with(
            StepDescriptor::new("sleep", |_| Ok(Started::Pending)).with_on_resume(|cx| {
                cx.callback().success(Val::str("woke"));
                Ok(())
            }),
        );
        let (mut host, mut rx, _) = host(registry);

        host.rearm(ThreadId(1), &request(9, "sleep")).unwrap();
        assert_eq!(host.pending(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ProgramEvent::StepCompleted {
                thread: ThreadId(1),
                invocation: 9,
                outcome: Ok(Val::str("woke")),
            }
        );
    }
}
