//! Run log: the user-facing console of a program
//!
//! Lines are plain text. Failures are rendered as their message only, never
//! with a backtrace.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, append-only run log
///
/// Clones write to the same buffer, so step contexts can log from any task.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock cannot leave a half-written line
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one or more lines; embedded newlines split into separate lines
    pub fn push(&self, text: impl AsRef<str>) {
        let mut lines = self.guard();
        lines.extend(text.as_ref().lines().map(str::to_string));
    }

    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.guard().iter().any(|line| line.contains(needle))
    }

    /// Whole log as one string
    pub fn text(&self) -> String {
        let lines = self.guard();
        let mut out = String::new();
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Independent copy that no longer shares the buffer
    pub fn detached(&self) -> RunLog {
        RunLog {
            lines: Arc::new(Mutex::new(self.lines())),
        }
    }
}

impl PartialEq for RunLog {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lines, &other.lines) || self.lines() == other.lines()
    }
}

impl Serialize for RunLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.lines().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RunLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lines = Vec::<String>::deserialize(deserializer)?;
        Ok(RunLog {
            lines: Arc::new(Mutex::new(lines)),
        })
    }
}
