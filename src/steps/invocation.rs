//! Durable record of a step a thread is waiting on

use crate::executor::{StepRequest, Val};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInvocation {
    /// Sequence number the completion must quote
    pub id: u64,
    pub name: String,
    pub args: Vec<Val>,
    pub started_at: DateTime<Utc>,
}

impl StepInvocation {
    pub fn started(request: &StepRequest) -> Self {
        Self {
            id: request.id,
            name: request.name.clone(),
            args: request.args.clone(),
            started_at: Utc::now(),
        }
    }

    pub fn request(&self) -> StepRequest {
        StepRequest {
            id: self.id,
            name: self.name.clone(),
            args: self.args.clone(),
        }
    }
}
