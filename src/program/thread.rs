//! Execution Thread: one continuation plus its lifecycle

use super::log::RunLog;
use super::types::{CauseOfInterruption, ThreadId, ThreadState};
use crate::error::EngineError;
use crate::executor::{
    drive_forward, Ctx, DriveResult, ErrorInfo, ForkRequest, Mismatch, StepRequest, Suspension,
    Val, VM,
};
use crate::steps::{Boundary, Invoked, StepInvocation};
use serde::{Deserialize, Serialize};

/// Branches a thread is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinState {
    /// Fork id the join result must quote
    pub id: u64,
    /// (branch name, child thread) in declaration order
    pub children: Vec<(String, ThreadId)>,
}

/// Where a call to [`ExecutionThread::run`] left the thread
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Waiting on an asynchronous step
    Suspended,
    /// Waiting on a fork; the program must create the branches
    Forked(ForkRequest),
    Finished,
    Failed,
    /// The interrupt flag was seen at a resumable point
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionThread {
    pub id: ThreadId,
    /// "main", or the branch name for forked threads
    pub name: String,
    #[serde(default)]
    pub parent: Option<ThreadId>,
    pub state: ThreadState,
    pub vm: VM,
    /// Step invocation the continuation is parked on
    #[serde(default)]
    pub pending: Option<StepInvocation>,
    #[serde(default)]
    pub join: Option<JoinState>,
    #[serde(default)]
    pub result: Option<Val>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// Message of a stop hook that failed while this thread was aborted
    #[serde(default)]
    pub stop_failure: Option<String>,
}

impl ExecutionThread {
    pub fn new(id: ThreadId, name: impl Into<String>, parent: Option<ThreadId>, vm: VM) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            state: ThreadState::Created,
            vm,
            pending: None,
            join: None,
            result: None,
            error: None,
            stop_failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Has work it can do right now
    pub fn is_runnable(&self) -> bool {
        match self.state {
            ThreadState::Created => true,
            ThreadState::Running | ThreadState::Suspended => !self.vm.is_suspended(),
            _ => false,
        }
    }

    pub fn transition(&mut self, to: ThreadState) -> Result<(), EngineError> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(thread = %self.id, from = %self.state, %to, "Thread transition");
        self.state = to;
        Ok(())
    }

    /// Drive the continuation until it parks, ends, or is interrupted
    ///
    /// Steps that finish synchronously are fed straight back in. A step is
    /// never started once the interrupt flag is up.
    pub fn run(
        &mut self,
        cx: Ctx<'_>,
        boundary: &mut dyn Boundary,
        log: &RunLog,
    ) -> Result<RunOutcome, EngineError> {
        if !self.is_runnable() {
            return Err(EngineError::InvalidState(format!(
                "{} is {} and cannot run",
                self.id, self.state
            )));
        }
        self.transition(ThreadState::Running)?;

        loop {
            let vm = std::mem::replace(&mut self.vm, VM::detached(Default::default()));
            let (vm, result) = drive_forward(vm, cx)?;
            self.vm = vm;

            for line in self.vm.take_diagnostics() {
                tracing::warn!(thread = %self.id, "{}", line);
                log.push(line);
            }

            match result {
                DriveResult::Suspended(Suspension::Step(request)) => {
                    if cx.interrupt_requested() && !self.vm.guard.is_active() {
                        return Ok(RunOutcome::Interrupted);
                    }
                    match boundary.invoke(self.id, &request) {
                        Invoked::Completed(outcome) => {
                            self.vm.resume(request.id, outcome)?;
                        }
                        Invoked::Body(body) => {
                            self.vm.enter_body(request.id, body, cx)?;
                        }
                        Invoked::Pending if self.vm.guard.is_active() => {
                            self.refuse_suspension(&request, boundary, log)?;
                        }
                        Invoked::Pending => {
                            self.pending = Some(StepInvocation::started(&request));
                            self.transition(ThreadState::Suspended)?;
                            return Ok(RunOutcome::Suspended);
                        }
                    }
                }
                DriveResult::Suspended(Suspension::Join(fork)) => {
                    self.transition(ThreadState::Suspended)?;
                    return Ok(RunOutcome::Forked(fork));
                }
                DriveResult::Completed(value) => {
                    self.result = Some(value);
                    self.transition(ThreadState::Finished)?;
                    return Ok(RunOutcome::Finished);
                }
                DriveResult::Failed(error) => {
                    self.error = Some(error);
                    self.transition(ThreadState::Failed)?;
                    return Ok(RunOutcome::Failed);
                }
                DriveResult::Interrupted => return Ok(RunOutcome::Interrupted),
            }
        }
    }

    /// A block-scoped step inside a non-resumable region tried to suspend
    ///
    /// The thread cannot be saved there, so the step is stopped and the
    /// mismatch is thrown at the call instead.
    fn refuse_suspension(
        &mut self,
        request: &StepRequest,
        boundary: &mut dyn Boundary,
        log: &RunLog,
    ) -> Result<(), EngineError> {
        let routine = self.vm.guard.enclosing().unwrap_or_default().to_string();
        let mismatch = Mismatch {
            routine,
            capability: request.name.clone(),
        };
        let cause = CauseOfInterruption::system(mismatch.message());
        if let Err(err) = boundary.stop(self.id, request.id, &cause) {
            tracing::warn!(
                thread = %self.id,
                step = %request.name,
                error = %err,
                "Step stop hook failed"
            );
            log.push(err.message());
        }
        self.vm.resume(request.id, Err(mismatch.into_error()))
    }

    /// Hand a step outcome to the thread; false if it is stale or unexpected
    pub fn deliver(
        &mut self,
        invocation: u64,
        outcome: Result<Val, ErrorInfo>,
    ) -> Result<bool, EngineError> {
        let expected = self.pending.as_ref().map(|p| p.id);
        if self.is_terminal() || expected != Some(invocation) {
            tracing::debug!(
                thread = %self.id,
                invocation,
                ?expected,
                "Ignoring stale step completion"
            );
            return Ok(false);
        }
        self.vm.resume(invocation, outcome)?;
        self.pending = None;
        Ok(true)
    }

    /// Resume a thread waiting on a join with the combined branch outcome
    pub fn deliver_join(&mut self, outcome: Result<Val, ErrorInfo>) -> Result<(), EngineError> {
        let Some(join) = self.join.take() else {
            return Err(EngineError::InvalidState(format!(
                "{} is not waiting on a join",
                self.id
            )));
        };
        self.vm.resume(join.id, outcome)
    }

    /// Stop the thread for good
    ///
    /// A pending step is stopped first. If its stop hook fails, the failure
    /// goes to the run log as a plain message and the thread is aborted anyway.
    pub fn abort(
        &mut self,
        cause: &CauseOfInterruption,
        boundary: &mut dyn Boundary,
        log: &RunLog,
    ) -> Result<(), EngineError> {
        if self.is_terminal() {
            return Ok(());
        }

        if let Some(pending) = self.pending.take() {
            if let Err(err) = boundary.stop(self.id, pending.id, cause) {
                tracing::warn!(
                    thread = %self.id,
                    step = %pending.name,
                    error = %err,
                    "Step stop hook failed"
                );
                log.push(err.message());
                self.stop_failure = Some(err.message().to_string());
            }
        }
        self.join = None;
        self.transition(ThreadState::Aborted)
    }
}
