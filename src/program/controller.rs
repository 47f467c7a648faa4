//! Program Controller
//!
//! Owns every live program. Each live program gets a scheduler task that
//! consumes its event channel, and a `tokio::sync::Mutex<Program>` that
//! makes driving a program single-flight.
//!
//! One scheduler turn:
//! 1. deliver the event that woke it (a step completion, say)
//! 2. apply queued interrupts
//! 3. drive runnable threads until quiescent
//! 4. persist the program
//!
//! Script code is driven with `block_in_place` on a multi-threaded runtime.
//!
//! Persistence failures and invalid drives are fatal: the program is marked
//! FAILURE and its scheduler stops.

use super::events::{self, EventReceiver, EventSender, ProgramEvent};
use super::program::Program;
use super::types::{Caller, CauseOfInterruption, ProgramId, ProgramStatus, ThreadId};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{ErrorInfo, Script, Val};
use crate::steps::{Boundary, StepHost, StepInvocation, StepRegistry};
use crate::store::ProgramStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::{block_in_place, JoinHandle};

/// Starts, resumes and interrupts programs
#[derive(Clone)]
pub struct ProgramController {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ProgramStore>,
    registry: Arc<StepRegistry>,
    engine: EngineConfig,
    live: Mutex<HashMap<ProgramId, Arc<ProgramHandle>>>,
}

/// Everything shared between the API and one program's scheduler task
struct ProgramHandle {
    program: tokio::sync::Mutex<Program>,
    events: EventSender,
    interrupts: Mutex<Vec<CauseOfInterruption>>,
    /// Raised while `interrupts` is non-empty; read by the VM between steps
    interrupt_flag: AtomicBool,
    status: watch::Sender<ProgramStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProgramHandle {
    fn queue_interrupt(&self, cause: CauseOfInterruption) {
        let mut queue = self.interrupts.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(cause);
        self.interrupt_flag.store(true, Ordering::Release);
    }

    fn take_interrupts(&self) -> Vec<CauseOfInterruption> {
        let mut queue = self.interrupts.lock().unwrap_or_else(|e| e.into_inner());
        self.interrupt_flag.store(false, Ordering::Release);
        std::mem::take(&mut *queue)
    }

    fn has_interrupts(&self) -> bool {
        self.interrupt_flag.load(Ordering::Acquire)
    }
}

impl ProgramController {
    pub fn new(store: Arc<dyn ProgramStore>, registry: StepRegistry, engine: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry: Arc::new(registry),
                engine,
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgramStore> {
        &self.inner.store
    }

    /// Persist a new run of `script` and start driving it
    pub async fn start(&self, script: Script) -> Result<ProgramId, EngineError> {
        let program = Program::new(script)?;
        let id = program.id;
        self.inner.store.save(&program).await?;

        tracing::info!(program = %id, "Starting program");
        self.spawn(program, |_, _| Ok(()))?;
        Ok(id)
    }

    /// Reload a stored program, re-arm its pending steps and keep driving it
    ///
    /// A program that already finished is left alone.
    pub async fn resume(&self, id: ProgramId) -> Result<(), EngineError> {
        if let Some(handle) = self.handle(id) {
            // Finished but its scheduler has not deregistered yet
            if handle.status.borrow().is_terminal() {
                return Ok(());
            }
            return Err(EngineError::AlreadyRunning(id));
        }

        let program = self
            .inner
            .store
            .load(id)
            .await?
            .ok_or(EngineError::ProgramNotFound(id))?;

        let digest = program.script.digest()?;
        if digest != program.script_hash {
            return Err(EngineError::Corrupted {
                id,
                reason: format!(
                    "script digest {} does not match recorded {}",
                    digest, program.script_hash
                ),
            });
        }

        if program.is_finished() {
            tracing::info!(program = %id, status = %program.status, "Program already finished");
            return Ok(());
        }

        tracing::info!(
            program = %id,
            pending = program.pending_steps().len(),
            "Resuming program"
        );
        self.spawn(program, |program, host| program.rearm(host))
    }

    /// Interrupt on behalf of `caller` with the default cause
    pub fn interrupt(&self, id: ProgramId, caller: &Caller) -> Result<(), EngineError> {
        self.interrupt_with(id, caller, CauseOfInterruption::for_caller(caller))
    }

    /// Queue an interrupt and return; the scheduler applies it at the next
    /// resumable point
    pub fn interrupt_with(
        &self,
        id: ProgramId,
        caller: &Caller,
        cause: CauseOfInterruption,
    ) -> Result<(), EngineError> {
        let handle = self.handle(id).ok_or(EngineError::ProgramNotFound(id))?;
        tracing::info!(program = %id, caller = %caller.name(), "Interrupt requested");
        handle.queue_interrupt(cause);
        // A closed channel means the scheduler already finished
        let _ = handle.events.send(ProgramEvent::Wake);
        Ok(())
    }

    /// Report the outcome of a step from outside its callback
    pub fn complete_step(
        &self,
        id: ProgramId,
        thread: ThreadId,
        invocation: u64,
        outcome: Result<Val, ErrorInfo>,
    ) -> Result<(), EngineError> {
        let handle = self.handle(id).ok_or(EngineError::ProgramNotFound(id))?;
        handle
            .events
            .send(ProgramEvent::StepCompleted {
                thread,
                invocation,
                outcome,
            })
            .map_err(|_| EngineError::InvalidState(format!("program {} is not scheduled", id)))
    }

    pub async fn status(&self, id: ProgramId) -> Result<ProgramStatus, EngineError> {
        if let Some(handle) = self.handle(id) {
            return Ok(*handle.status.borrow());
        }
        Ok(self.load(id).await?.status)
    }

    /// Wait until the program reaches a terminal status
    pub async fn wait_for_completion(&self, id: ProgramId) -> Result<ProgramStatus, EngineError> {
        if let Some(handle) = self.handle(id) {
            let mut rx = handle.status.subscribe();
            drop(handle);
            let reached = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
            if let Ok(status) = reached {
                return Ok(status);
            }
        }
        // The scheduler is gone; the stored record is authoritative
        Ok(self.load(id).await?.status)
    }

    /// Copy of the program as it stands now
    pub async fn snapshot(&self, id: ProgramId) -> Result<Program, EngineError> {
        if let Some(handle) = self.handle(id) {
            return Ok(handle.program.lock().await.clone());
        }
        self.load(id).await
    }

    pub async fn log(&self, id: ProgramId) -> Result<Vec<String>, EngineError> {
        Ok(self.snapshot(id).await?.log.lines())
    }

    pub async fn causes(&self, id: ProgramId) -> Result<Vec<CauseOfInterruption>, EngineError> {
        Ok(self.snapshot(id).await?.causes)
    }

    pub async fn pending_steps(
        &self,
        id: ProgramId,
    ) -> Result<Vec<(ThreadId, StepInvocation)>, EngineError> {
        Ok(self.snapshot(id).await?.pending_steps())
    }

    /// Live program ids
    pub fn running(&self) -> Vec<ProgramId> {
        let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.keys().copied().collect()
    }

    /// Stop every scheduler without touching program state
    ///
    /// Stored records stay as they were after the last turn, so a new
    /// controller can `resume` them.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ProgramHandle>> = {
            let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
            live.values().cloned().collect()
        };

        for handle in handles {
            let _ = handle.events.send(ProgramEvent::Shutdown);
            let task = handle.task.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(task) = task {
                if let Err(err) = task.await {
                    tracing::error!(error = %err, "Scheduler task panicked");
                }
            }
        }
    }

    /* ===================== internals ===================== */

    fn handle(&self, id: ProgramId) -> Option<Arc<ProgramHandle>> {
        let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.get(&id).cloned()
    }

    async fn load(&self, id: ProgramId) -> Result<Program, EngineError> {
        self.inner
            .store
            .load(id)
            .await?
            .ok_or(EngineError::ProgramNotFound(id))
    }

    /// Register the program and start its scheduler task
    ///
    /// `prepare` runs against the program and its step host before the first turn.
    fn spawn<F>(&self, mut program: Program, prepare: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Program, &mut StepHost) -> Result<(), EngineError>,
    {
        let id = program.id;
        let (tx, rx) = events::channel();
        let mut host = StepHost::new(
            id,
            Arc::clone(&self.inner.registry),
            tx.clone(),
            program.log.clone(),
        );
        prepare(&mut program, &mut host)?;

        let (status, _) = watch::channel(program.status);
        let handle = Arc::new(ProgramHandle {
            program: tokio::sync::Mutex::new(program),
            events: tx,
            interrupts: Mutex::new(vec![]),
            interrupt_flag: AtomicBool::new(false),
            status,
            task: Mutex::new(None),
        });

        {
            let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
            if live.contains_key(&id) {
                return Err(EngineError::AlreadyRunning(id));
            }
            live.insert(id, Arc::clone(&handle));
        }

        let task = tokio::spawn(schedule(
            Arc::clone(&self.inner),
            Arc::clone(&handle),
            host,
            rx,
        ));
        *handle.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }
}

/// Scheduler loop for one program
async fn schedule(
    inner: Arc<Inner>,
    handle: Arc<ProgramHandle>,
    mut host: StepHost,
    mut events: EventReceiver,
) {
    let mut event = None;

    loop {
        match turn(&inner, &handle, &mut host, event.take()).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => {
                fail(&inner, &handle, &mut host, err).await;
                break;
            }
        }

        match events.recv().await {
            Some(ProgramEvent::Shutdown) | None => {
                tracing::debug!("Scheduler shutting down");
                break;
            }
            Some(next) => event = Some(next),
        }
    }

    let id = handle.program.lock().await.id;
    let mut live = inner.live.lock().unwrap_or_else(|e| e.into_inner());
    live.remove(&id);
}

/// One scheduler turn; true once the program is finished
async fn turn(
    inner: &Inner,
    handle: &ProgramHandle,
    host: &mut StepHost,
    event: Option<ProgramEvent>,
) -> Result<bool, EngineError> {
    let mut program = handle.program.lock().await;

    if let Some(ProgramEvent::StepCompleted {
        thread,
        invocation,
        outcome,
    }) = event
    {
        program.deliver(thread, invocation, outcome, host)?;
    }

    loop {
        for cause in handle.take_interrupts() {
            program.interrupt(cause, host)?;
        }
        drive_blocking(|| {
            program.run_until_quiescent(&inner.engine, &handle.interrupt_flag, &mut *host)
        })?;
        if !handle.has_interrupts() {
            break;
        }
    }

    inner.store.save(&program).await?;
    handle.status.send_replace(program.status);

    tracing::debug!(
        program = %program.id,
        status = %program.status,
        pending = host.pending(),
        "Scheduler turn done"
    );
    Ok(program.is_finished())
}

/// Run script code that may not yield for a while
///
/// On a multi-threaded runtime the worker is handed off first, so a long
/// step-free loop only occupies this task. A current-thread runtime has no
/// other worker to hand off to: there the loop holds the runtime until an
/// interrupt flag set from another thread stops it.
fn drive_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(rt) if rt.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

/// Fatal engine error: fail the program, stop its steps, try to record it
async fn fail(inner: &Inner, handle: &ProgramHandle, host: &mut StepHost, err: EngineError) {
    let mut program = handle.program.lock().await;
    tracing::error!(program = %program.id, error = %err, "Program failed fatally");

    let cause = CauseOfInterruption::system(err.to_string());
    for (thread, pending) in program.pending_steps() {
        if let Err(stop_err) = host.stop(thread, pending.id, &cause) {
            tracing::warn!(%thread, error = %stop_err, "Stop hook failed during fatal shutdown");
        }
    }
    program.fail(err.to_string());

    if let Err(save_err) = inner.store.save(&program).await {
        tracing::error!(program = %program.id, error = %save_err, "Could not record fatal failure");
    }
    handle.status.send_replace(program.status);
}
