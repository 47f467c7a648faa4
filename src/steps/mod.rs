//! Step Invocation Boundary
//!
//! Steps are the only way a script reaches the outside world. A step is a
//! descriptor (a function table) registered under the name scripts call it
//! by. Starting a step either completes it on the spot or leaves it pending;
//! pending steps report back through their [`StepCallback`].

pub mod boundary;
pub mod context;
pub mod invocation;

pub use boundary::{Boundary, Invoked, StepHost};
pub use context::{StepCallback, StepContext};
pub use invocation::StepInvocation;

use crate::executor::{Closure, Val};
use crate::program::types::CauseOfInterruption;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Failure raised by step code
///
/// Only the first line of the message is kept. It is what ends up in the
/// run log and in the script-visible error, so no trace ever leaks out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let headline = message
            .lines()
            .map(str::trim_end)
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        Self {
            message: headline.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        StepError::new(err.to_string())
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::new(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::new(message)
    }
}

/// What `start` did
#[derive(Debug, Clone, PartialEq)]
pub enum Started {
    /// Finished synchronously with this value
    Done(Val),
    /// Running elsewhere; the callback will report the outcome
    Pending,
    /// Run this closure in the calling thread; its value is the step's value
    ///
    /// Block-scoped steps hand back their trailing body this way, so the
    /// body can itself call steps and suspend.
    Body(Closure),
}

pub type StartFn = dyn Fn(&StepContext) -> Result<Started, StepError> + Send + Sync;
pub type StopFn = dyn Fn(&StepContext, &CauseOfInterruption) -> Result<(), StepError> + Send + Sync;
pub type ResumeFn = dyn Fn(&StepContext) -> Result<(), StepError> + Send + Sync;

/// A step implementation: start, and optionally stop and on-resume hooks
#[derive(Clone)]
pub struct StepDescriptor {
    pub function_name: String,
    start: Arc<StartFn>,
    stop: Option<Arc<StopFn>>,
    on_resume: Option<Arc<ResumeFn>>,
}

impl StepDescriptor {
    pub fn new<F>(function_name: impl Into<String>, start: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Started, StepError> + Send + Sync + 'static,
    {
        Self {
            function_name: function_name.into(),
            start: Arc::new(start),
            stop: None,
            on_resume: None,
        }
    }

    pub fn with_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn(&StepContext, &CauseOfInterruption) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.stop = Some(Arc::new(stop));
        self
    }

    /// Hook run for each pending invocation when a program is resumed after a restart
    pub fn with_on_resume<F>(mut self, on_resume: F) -> Self
    where
        F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.on_resume = Some(Arc::new(on_resume));
        self
    }

    pub fn start(&self, cx: &StepContext) -> Result<Started, StepError> {
        (self.start)(cx)
    }

    /// Without a stop hook, stopping only cancels the context's token
    pub fn stop(&self, cx: &StepContext, cause: &CauseOfInterruption) -> Result<(), StepError> {
        match &self.stop {
            Some(stop) => stop(cx, cause),
            None => Ok(()),
        }
    }

    pub fn on_resume(&self, cx: &StepContext) -> Result<(), StepError> {
        match &self.on_resume {
            Some(hook) => hook(cx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("function_name", &self.function_name)
            .field("stop", &self.stop.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .finish()
    }
}

/// Steps available to scripts, by function name
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepDescriptor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step, replacing any previous one with the same name
    pub fn register(&mut self, descriptor: StepDescriptor) -> &mut Self {
        self.steps
            .insert(descriptor.function_name.clone(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: StepDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_function_name() {
        let registry = StepRegistry::new()
            .with(StepDescriptor::new("echo", |cx| {
                Ok(Started::Done(cx.arg(0).cloned().unwrap_or(Val::Null)))
            }))
            .with(StepDescriptor::new("sleep", |_| Ok(Started::Pending)));

        assert_eq!(registry.names(), vec!["echo", "sleep"]);
        assert!(registry.contains("sleep"));
        assert!(registry.get("sh").is_none());
    }

    #[test]
    fn test_step_error_keeps_message_only() {
        let err: StepError = anyhow::anyhow!("never going to stop")
            .context("while stopping")
            .into();
        assert_eq!(err.message(), "while stopping");
        assert!(!err.to_string().contains('\t'));
    }

    #[test]
    fn test_step_error_drops_trace_lines() {
        let err = StepError::new("never going to stop\n\tat Foo.bar(Foo.java:12)\n\tat Main.main");
        assert_eq!(err.message(), "never going to stop");

        let err = StepError::new("\n  \nrefused\n\tat x");
        assert_eq!(err.message(), "refused");
    }
}
