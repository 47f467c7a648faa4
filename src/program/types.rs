//! Identifiers, states, and interruption causes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Program identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(pub Uuid);

impl ProgramId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ProgramId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a thread within its program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub usize);

impl ThreadId {
    pub const MAIN: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/* ===================== Thread State ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    Created,
    Running,
    Suspended,
    Finished,
    Failed,
    Aborted,
}

impl ThreadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ThreadState::Finished | ThreadState::Failed | ThreadState::Aborted
        )
    }

    /// Allowed edges of the thread lifecycle
    pub fn can_transition(self, to: ThreadState) -> bool {
        use ThreadState::*;
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Aborted) => true,
            (Created, Running) => true,
            (Running, Suspended | Finished | Failed) => true,
            (Suspended, Running | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Created => "CREATED",
            ThreadState::Running => "RUNNING",
            ThreadState::Suspended => "SUSPENDED",
            ThreadState::Finished => "FINISHED",
            ThreadState::Failed => "FAILED",
            ThreadState::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/* ===================== Program Status ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramStatus {
    Running,
    Success,
    Failure,
    Aborted,
}

impl ProgramStatus {
    pub fn is_terminal(self) -> bool {
        self != ProgramStatus::Running
    }

    /// Combine the states of every thread: FAILURE beats ABORTED beats SUCCESS,
    /// and nothing is decided while any thread is still live
    pub fn aggregate<I>(states: I) -> ProgramStatus
    where
        I: IntoIterator<Item = ThreadState>,
    {
        let mut status = ProgramStatus::Success;
        for state in states {
            match state {
                ThreadState::Failed => status = ProgramStatus::Failure,
                ThreadState::Aborted if status == ProgramStatus::Success => {
                    status = ProgramStatus::Aborted
                }
                ThreadState::Finished | ThreadState::Aborted => {}
                _ => return ProgramStatus::Running,
            }
        }
        status
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgramStatus::Running => "RUNNING",
            ProgramStatus::Success => "SUCCESS",
            ProgramStatus::Failure => "FAILURE",
            ProgramStatus::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ProgramStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ProgramStatus::Running),
            "SUCCESS" => Ok(ProgramStatus::Success),
            "FAILURE" => Ok(ProgramStatus::Failure),
            "ABORTED" => Ok(ProgramStatus::Aborted),
            other => Err(format!("unknown program status '{}'", other)),
        }
    }
}

/* ===================== Interruption ===================== */

/// Who asked for an interruption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(String),
    Anonymous,
    System,
}

impl Caller {
    pub fn name(&self) -> &str {
        match self {
            Caller::User(name) => name,
            Caller::Anonymous => "anonymous",
            Caller::System => "SYSTEM",
        }
    }
}

/// Why a program was interrupted; append-only on the program record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum CauseOfInterruption {
    /// A person (possibly anonymous) asked for the stop
    UserInterruption { user: String, at: DateTime<Utc> },
    /// The engine or its host stopped the run
    System { reason: String, at: DateTime<Utc> },
}

impl CauseOfInterruption {
    pub fn user(caller: &Caller) -> Self {
        CauseOfInterruption::UserInterruption {
            user: caller.name().to_string(),
            at: Utc::now(),
        }
    }

    pub fn system(reason: impl Into<String>) -> Self {
        CauseOfInterruption::System {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    /// Default cause for an interrupt request from `caller`
    pub fn for_caller(caller: &Caller) -> Self {
        match caller {
            Caller::System => CauseOfInterruption::system("interrupted by the system"),
            other => CauseOfInterruption::user(other),
        }
    }

    /// One-line run-log rendering
    pub fn short_description(&self) -> String {
        match self {
            CauseOfInterruption::UserInterruption { user, .. } => format!("Aborted by {}", user),
            CauseOfInterruption::System { reason, .. } => format!("Interrupted: {}", reason),
        }
    }
}
