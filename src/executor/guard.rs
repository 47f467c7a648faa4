//! Non-resumable execution guard
//!
//! Some routines are flagged to run to completion without ever serializing
//! mid-execution (the `@NonCPS` marker, or native built-ins that call back into
//! script closures). While such a region is open the VM must not suspend. Any
//! construct that needs a suspendable context raises a [`Mismatch`] instead.

use super::errors::{self, ErrorInfo};
use super::types::Val;
use serde::{Deserialize, Serialize};

/// Build the human-readable mismatch text
pub fn mismatch_message(routine: &str, capability: &str) -> String {
    format!("{} is not NonCPS-transparent (uses {})", routine, capability)
}

/// A construct that only works from a resumable context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Invoking an external step
    Step(String),
    /// Invoking a step with a trailing body closure
    BlockStep(String),
    /// Forking branches with `parallel`
    Parallel,
    /// `sort` with a script comparator
    Sort,
    /// Rendering a lazily evaluated interpolation part
    Interpolation,
    /// Coercing a value through a closure implementing an interface method
    Interface(String),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Capability::Step(name) | Capability::BlockStep(name) => name,
            Capability::Parallel => "parallel",
            Capability::Sort => "sort",
            Capability::Interpolation => "interpolation",
            Capability::Interface(method) => method,
        }
    }

    /// Whether a synchronous fallback exists. Without one the mismatch is thrown.
    ///
    /// A block-scoped step may still run as long as it finishes, or hands
    /// its body back, without suspending.
    pub fn has_fallback(&self) -> bool {
        matches!(
            self,
            Capability::Sort
                | Capability::Interpolation
                | Capability::Interface(_)
                | Capability::BlockStep(_)
        )
    }
}

/// Structured mismatch signal: `(enclosing routine, required capability)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub routine: String,
    pub capability: String,
}

impl Mismatch {
    pub fn message(&self) -> String {
        mismatch_message(&self.routine, &self.capability)
    }

    /// Script-catchable form; `routine` and `capability` are readable as members
    pub fn into_error(self) -> ErrorInfo {
        let message = self.message();
        ErrorInfo::new(errors::MISMATCH, message)
            .with_detail("routine", Val::Str(self.routine))
            .with_detail("capability", Val::Str(self.capability))
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Stack of open non-resumable regions, innermost last
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NonResumableGuard {
    regions: Vec<String>,
}

impl NonResumableGuard {
    /// Open a region named after the enclosing routine
    pub fn mark(&mut self, routine: impl Into<String>) {
        self.regions.push(routine.into());
    }

    /// Close the innermost region
    pub fn clear(&mut self) -> Option<String> {
        self.regions.pop()
    }

    pub fn depth(&self) -> usize {
        self.regions.len()
    }

    /// Close every region opened above `depth` (used when frames unwind)
    pub fn truncate(&mut self, depth: usize) {
        self.regions.truncate(depth);
    }

    pub fn is_active(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn enclosing(&self) -> Option<&str> {
        self.regions.last().map(String::as_str)
    }

    /// Ok outside any region; inside one, the mismatch naming the innermost routine
    pub fn check(&self, capability: &Capability) -> Result<(), Mismatch> {
        match self.enclosing() {
            None => Ok(()),
            Some(routine) => Err(Mismatch {
                routine: routine.to_string(),
                capability: capability.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outside_region_is_ok() {
        let guard = NonResumableGuard::default();
        assert!(guard.check(&Capability::Step("sleep".into())).is_ok());
    }

    #[test]
    fn test_check_names_innermost_region() {
        let mut guard = NonResumableGuard::default();
        guard.mark("outer");
        guard.mark("bad");

        let mismatch = guard.check(&Capability::Step("sleep".into())).unwrap_err();
        assert_eq!(mismatch.routine, "bad");
        assert_eq!(mismatch.capability, "sleep");
        assert_eq!(
            mismatch.message(),
            "bad is not NonCPS-transparent (uses sleep)"
        );

        assert_eq!(guard.clear().as_deref(), Some("bad"));
        assert_eq!(guard.enclosing(), Some("outer"));
        guard.truncate(0);
        assert!(!guard.is_active());
    }

    #[test]
    fn test_mismatch_error_carries_both_fields() {
        let err = Mismatch {
            routine: "shouldBomb".into(),
            capability: "writeFile".into(),
        }
        .into_error();

        assert_eq!(err.code, errors::MISMATCH);
        assert_eq!(err.details["routine"], Val::str("shouldBomb"));
        assert_eq!(err.details["capability"], Val::str("writeFile"));
    }

    #[test]
    fn test_fallback_capabilities() {
        assert!(Capability::Sort.has_fallback());
        assert!(!Capability::Step("echo".into()).has_fallback());
        assert!(!Capability::Parallel.has_fallback());
        assert!(Capability::BlockStep("polygon".into()).has_fallback());
        assert_eq!(Capability::BlockStep("polygon".into()).name(), "polygon");
    }
}
