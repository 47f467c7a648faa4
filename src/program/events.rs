//! Events consumed by a program's scheduler task

use super::types::ThreadId;
use crate::executor::{ErrorInfo, Val};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgramEvent {
    /// An asynchronous step reported its outcome
    StepCompleted {
        thread: ThreadId,
        invocation: u64,
        outcome: Result<Val, ErrorInfo>,
    },
    /// Something changed that the scheduler should look at (interrupt queued)
    Wake,
    /// Stop the scheduler task without touching program state
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<ProgramEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProgramEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
