//! In-memory store
//!
//! Records are kept serialized so a loaded program never shares state (the
//! run log buffer, say) with the one that was saved.

use super::{decode, encode, newest_first, ProgramStore, ProgramSummary, StoreError};
use crate::program::types::ProgramId;
use crate::program::Program;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: tokio::sync::RwLock<HashMap<ProgramId, (ProgramSummary, Vec<u8>)>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail, for exercising fatal persistence errors
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProgramStore for MemoryStore {
    async fn save(&self, program: &Program) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("writes are disabled".to_string()));
        }
        let bytes = encode(program)?;
        self.records
            .write()
            .await
            .insert(program.id, (ProgramSummary::of(program), bytes));
        Ok(())
    }

    async fn load(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        let records = self.records.read().await;
        match records.get(&id) {
            Some((_, bytes)) => decode(&id.to_string(), bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ProgramSummary>, StoreError> {
        let records = self.records.read().await;
        Ok(newest_first(
            records.values().map(|(summary, _)| summary.clone()).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Script;
    use crate::program::ProgramStatus;

    fn program() -> Program {
        Program::new(Script::from_json(r#"{"body": {"t": "Block", "body": []}}"#).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_save_load_list() {
        let store = MemoryStore::new();
        let p = program();
        tokio_test::assert_ok!(store.save(&p).await);

        let loaded = tokio_test::assert_ok!(store.load(p.id).await).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(store.list().await.unwrap()[0].status, ProgramStatus::Running);
        assert!(store.load(ProgramId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loaded_log_is_independent() {
        let store = MemoryStore::new();
        let p = program();
        store.save(&p).await.unwrap();

        p.log.push("after save");
        let loaded = store.load(p.id).await.unwrap().unwrap();
        assert!(loaded.log.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_record() {
        let store = MemoryStore::new();
        let mut p = program();
        store.save(&p).await.unwrap();

        store.fail_writes(true);
        p.status = ProgramStatus::Success;
        assert!(matches!(store.save(&p).await, Err(StoreError::Storage(_))));

        let loaded = store.load(p.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ProgramStatus::Running);
    }
}
