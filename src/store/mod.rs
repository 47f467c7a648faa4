//! Durable program records
//!
//! A store holds one record per program. `save` replaces the whole record
//! atomically: a reader sees the previous record or the new one, never a mix.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::program::types::{ProgramId, ProgramStatus};
use crate::program::Program;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Stored record for {id} is corrupted: {reason}")]
    Corrupted { id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// Listing entry for a stored program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSummary {
    pub id: ProgramId,
    pub status: ProgramStatus,
    pub threads: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgramSummary {
    pub fn of(program: &Program) -> Self {
        Self {
            id: program.id,
            status: program.status,
            threads: program.threads.len(),
            created_at: program.created_at,
            updated_at: program.updated_at,
        }
    }
}

#[async_trait]
pub trait ProgramStore: Send + Sync {
    async fn save(&self, program: &Program) -> Result<(), StoreError>;

    async fn load(&self, id: ProgramId) -> Result<Option<Program>, StoreError>;

    /// Most recently updated first
    async fn list(&self) -> Result<Vec<ProgramSummary>, StoreError>;
}

pub(crate) fn encode(program: &Program) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(program).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode(id: &str, bytes: &[u8]) -> Result<Program, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupted {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn newest_first(mut summaries: Vec<ProgramSummary>) -> Vec<ProgramSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}
