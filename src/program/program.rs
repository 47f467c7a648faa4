//! Program: one run of a script and every thread it spawned

use super::log::RunLog;
use super::thread::{ExecutionThread, JoinState, RunOutcome};
use super::types::{CauseOfInterruption, ProgramId, ProgramStatus, ThreadId, ThreadState};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::errors;
use crate::executor::{Ctx, ErrorInfo, ForkRequest, Script, Val, VM};
use crate::steps::{Boundary, StepError, StepInvocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

/// Durable record of a run
///
/// Everything needed to resume lives here: the script, each thread's
/// continuation, the interruption causes and the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub script: Script,
    /// SHA-256 of the script, checked on resume
    pub script_hash: String,
    pub threads: Vec<ExecutionThread>,
    pub status: ProgramStatus,
    #[serde(default)]
    pub causes: Vec<CauseOfInterruption>,
    #[serde(default)]
    pub log: RunLog,
    /// Engine failure that ended the run regardless of thread states
    #[serde(default)]
    pub fatal: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    /// A fresh run with a single main thread, not yet started
    pub fn new(script: Script) -> Result<Self, EngineError> {
        script.validate()?;
        let script_hash = script.digest()?;
        let main = ExecutionThread::new(ThreadId::MAIN, "main", None, VM::for_script(&script));
        let now = Utc::now();

        Ok(Self {
            id: ProgramId::new(),
            script,
            script_hash,
            threads: vec![main],
            status: ProgramStatus::Running,
            causes: vec![],
            log: RunLog::new(),
            fatal: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ExecutionThread> {
        self.threads.get(id.0)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut ExecutionThread> {
        self.threads.get_mut(id.0)
    }

    /// Every step invocation some thread is parked on
    pub fn pending_steps(&self) -> Vec<(ThreadId, StepInvocation)> {
        self.threads
            .iter()
            .filter(|t| !t.is_terminal())
            .filter_map(|t| t.pending.clone().map(|p| (t.id, p)))
            .collect()
    }

    /// Drive runnable threads, one at a time, until none can make progress
    ///
    /// Returns early when the interrupt flag is seen so the caller can
    /// deliver the queued causes.
    pub fn run_until_quiescent(
        &mut self,
        engine: &EngineConfig,
        interrupt: &AtomicBool,
        boundary: &mut dyn Boundary,
    ) -> Result<(), EngineError> {
        while !self.is_finished() {
            let Some(idx) = self.threads.iter().position(|t| t.is_runnable()) else {
                break;
            };

            let cx = Ctx::new(&self.script)
                .with_max_frames(engine.max_stack_depth)
                .with_interrupt(interrupt);
            let thread = &mut self.threads[idx];
            let outcome = thread.run(cx, boundary, &self.log)?;
            tracing::debug!(program = %self.id, thread = %thread.id, ?outcome, "Thread yielded");

            match outcome {
                RunOutcome::Forked(fork) => self.fork(idx, fork, engine)?,
                RunOutcome::Failed => {
                    if let Some(err) = &self.threads[idx].error {
                        self.log.push(format!("ERROR: {}", err.message));
                    }
                }
                RunOutcome::Interrupted => {
                    self.touch();
                    return Ok(());
                }
                RunOutcome::Suspended | RunOutcome::Finished => {}
            }

            self.settle_joins()?;
            self.refresh_status();
        }

        self.touch();
        Ok(())
    }

    /// Start one child thread per branch, or fail the fork straight away
    fn fork(
        &mut self,
        parent: usize,
        fork: ForkRequest,
        engine: &EngineConfig,
    ) -> Result<(), EngineError> {
        let wanted = self.threads.len() + fork.branches.len();
        if wanted > engine.max_threads {
            let err = ErrorInfo::new(
                errors::TOO_MANY_THREADS,
                format!(
                    "parallel would need {} threads, the limit is {}",
                    wanted, engine.max_threads
                ),
            );
            return self.threads[parent].vm.resume(fork.id, Err(err));
        }

        let parent_id = self.threads[parent].id;
        let mut children = Vec::with_capacity(fork.branches.len());
        for branch in fork.branches {
            let id = ThreadId(self.threads.len());
            let vm = VM::new(branch.body, fork.bindings.clone());
            tracing::debug!(program = %self.id, parent = %parent_id, thread = %id, branch = %branch.name, "Forking");
            children.push((branch.name.clone(), id));
            self.threads
                .push(ExecutionThread::new(id, branch.name, Some(parent_id), vm));
        }

        self.threads[parent].join = Some(JoinState {
            id: fork.id,
            children,
        });
        Ok(())
    }

    /// Resume parents whose branches have all ended
    ///
    /// A failed branch is thrown into the parent as `ParallelBranchFailed`.
    /// An aborted branch aborts the parent.
    fn settle_joins(&mut self) -> Result<(), EngineError> {
        loop {
            let mut changed = false;

            for idx in 0..self.threads.len() {
                let Some(join) = self.threads[idx].join.clone() else {
                    continue;
                };
                if self.threads[idx].is_terminal() {
                    continue;
                }
                let branches: Vec<(&String, &ExecutionThread)> = join
                    .children
                    .iter()
                    .filter_map(|(name, id)| self.thread(*id).map(|t| (name, t)))
                    .collect();
                if branches.iter().any(|(_, t)| !t.is_terminal()) {
                    continue;
                }

                let aborted = branches
                    .iter()
                    .any(|(_, t)| t.state == ThreadState::Aborted);
                let failed = branches.iter().find_map(|(name, t)| {
                    (t.state == ThreadState::Failed).then(|| branch_failure(name, t))
                });
                let results: BTreeMap<String, Val> = branches
                    .iter()
                    .map(|(name, t)| ((*name).clone(), t.result.clone().unwrap_or(Val::Null)))
                    .collect();

                let parent = &mut self.threads[idx];
                if aborted {
                    parent.join = None;
                    parent.transition(ThreadState::Aborted)?;
                } else if let Some(err) = failed {
                    parent.deliver_join(Err(err))?;
                } else {
                    parent.deliver_join(Ok(Val::Obj(results)))?;
                }
                changed = true;
            }

            if !changed {
                return Ok(());
            }
        }
    }

    /// Hand a step outcome to its thread. Stale completions are dropped.
    pub fn deliver(
        &mut self,
        thread: ThreadId,
        invocation: u64,
        outcome: Result<Val, ErrorInfo>,
        boundary: &mut dyn Boundary,
    ) -> Result<bool, EngineError> {
        let Some(t) = self.thread_mut(thread) else {
            tracing::debug!(%thread, invocation, "Completion for unknown thread");
            return Ok(false);
        };
        let accepted = t.deliver(invocation, outcome)?;
        if accepted {
            boundary.complete(thread, invocation);
        }
        Ok(accepted)
    }

    /// Record the cause and abort every thread that is still live
    pub fn interrupt(
        &mut self,
        cause: CauseOfInterruption,
        boundary: &mut dyn Boundary,
    ) -> Result<(), EngineError> {
        if self.is_finished() {
            tracing::debug!(program = %self.id, status = %self.status, "Interrupt after completion ignored");
            return Ok(());
        }

        tracing::info!(program = %self.id, cause = %cause.short_description(), "Interrupting program");
        self.log.push(cause.short_description());

        for thread in self.threads.iter_mut().rev() {
            thread.abort(&cause, boundary, &self.log)?;
        }
        self.causes.push(cause);
        self.refresh_status();
        self.touch();
        Ok(())
    }

    /// End the run after an engine failure
    ///
    /// Overrides a status reached in memory but never persisted.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.fatal.is_some() {
            return;
        }
        let reason = reason.into();
        self.log.push(format!("ERROR: {}", reason));
        self.fatal = Some(reason);
        if self.is_finished() {
            self.status = ProgramStatus::Failure;
        } else {
            self.refresh_status();
        }
        self.touch();
    }

    /// Re-attach pending steps after loading from storage
    ///
    /// A step that cannot be re-attached is failed back into its thread as a
    /// catchable error.
    pub fn rearm(&mut self, boundary: &mut dyn Boundary) -> Result<(), EngineError> {
        for (thread, pending) in self.pending_steps() {
            if let Err(err) = boundary.rearm(thread, &pending.request()) {
                tracing::warn!(
                    program = %self.id,
                    %thread,
                    step = %pending.name,
                    error = %err,
                    "Could not re-arm step"
                );
                self.deliver(thread, pending.id, Err(rearm_failure(&err)), boundary)?;
            }
        }
        Ok(())
    }

    /// Recompute the aggregate status; logs the final line once
    pub fn refresh_status(&mut self) {
        let before = self.status;
        self.status = if self.fatal.is_some() {
            ProgramStatus::Failure
        } else {
            ProgramStatus::aggregate(self.threads.iter().map(|t| t.state))
        };

        if !before.is_terminal() && self.status.is_terminal() {
            tracing::info!(program = %self.id, status = %self.status, "Program finished");
            self.log.push(format!("Finished: {}", self.status));
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn branch_failure(name: &str, thread: &ExecutionThread) -> ErrorInfo {
    let message = thread
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_default();
    let mut err = ErrorInfo::new(
        errors::PARALLEL_BRANCH_FAILED,
        format!("branch '{}' failed: {}", name, message),
    )
    .with_detail("branch", Val::str(name));
    if let Some(cause) = &thread.error {
        err = err.with_detail("cause", Val::Error(cause.clone()));
    }
    err
}

fn rearm_failure(err: &StepError) -> ErrorInfo {
    ErrorInfo::new(errors::STEP_FAILED, err.message())
}
