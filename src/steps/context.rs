//! What a running step sees: its arguments, a way to report back, the run
//! log, and a cancellation token

use super::StepError;
use crate::executor::errors;
use crate::executor::{Closure, ErrorInfo, Val};
use crate::program::events::{EventSender, ProgramEvent};
use crate::program::log::RunLog;
use crate::program::types::{ProgramId, ThreadId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Completion handle for one step invocation
///
/// Cheap to clone and safe to move into a spawned task. Only the first
/// outcome reported counts.
#[derive(Debug, Clone)]
pub struct StepCallback {
    thread: ThreadId,
    invocation: u64,
    events: EventSender,
    settled: Arc<AtomicBool>,
}

impl StepCallback {
    pub(crate) fn new(thread: ThreadId, invocation: u64, events: EventSender) -> Self {
        Self {
            thread,
            invocation,
            events,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn success(&self, value: Val) {
        self.send(Ok(value));
    }

    pub fn failure(&self, error: impl Into<StepError>) {
        let error = error.into();
        self.send(Err(ErrorInfo::new(errors::STEP_FAILED, error.message())));
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Refuse any later outcome (the step was stopped or finished synchronously)
    pub(crate) fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    fn send(&self, outcome: Result<Val, ErrorInfo>) {
        if !self.settle() {
            tracing::debug!(
                thread = %self.thread,
                invocation = self.invocation,
                "Ignoring duplicate step completion"
            );
            return;
        }

        let event = ProgramEvent::StepCompleted {
            thread: self.thread,
            invocation: self.invocation,
            outcome,
        };
        if self.events.send(event).is_err() {
            tracing::debug!(
                thread = %self.thread,
                invocation = self.invocation,
                "Program is no longer scheduled; dropping step completion"
            );
        }
    }
}

/// Context handed to every step hook
#[derive(Debug, Clone)]
pub struct StepContext {
    program: ProgramId,
    thread: ThreadId,
    invocation: u64,
    name: String,
    args: Vec<Val>,
    callback: StepCallback,
    log: RunLog,
    cancel: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(
        program: ProgramId,
        thread: ThreadId,
        invocation: u64,
        name: String,
        args: Vec<Val>,
        events: EventSender,
        log: RunLog,
    ) -> Self {
        Self {
            program,
            thread,
            invocation,
            name,
            args,
            callback: StepCallback::new(thread, invocation, events),
            log,
            cancel: CancellationToken::new(),
        }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn invocation(&self) -> u64 {
        self.invocation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Val] {
        &self.args
    }

    pub fn arg(&self, idx: usize) -> Option<&Val> {
        self.args.get(idx)
    }

    /// Trailing closure argument of a block-scoped call, `polygon(17) { ... }`
    pub fn body(&self) -> Option<Closure> {
        match self.args.last() {
            Some(Val::Closure(body)) => Some(body.clone()),
            _ => None,
        }
    }

    pub fn callback(&self) -> StepCallback {
        self.callback.clone()
    }

    /// Write a line to the program's run log
    pub fn log(&self, line: impl AsRef<str>) {
        self.log.push(line);
    }

    /// Cancelled when the step is stopped
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}
