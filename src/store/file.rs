//! One JSON file per program
//!
//! Saves go to a temporary file that is fsynced and then renamed over the
//! record, so a crash mid-save leaves the previous record in place.

use super::{decode, encode, newest_first, ProgramStore, ProgramSummary, StoreError};
use crate::program::types::ProgramId;
use crate::program::Program;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const EXTENSION: &str = "program.json";

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: ProgramId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }

    fn tmp_path_for(&self, id: ProgramId) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", id, EXTENSION))
    }
}

fn storage(e: std::io::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

#[async_trait]
impl ProgramStore for FileStore {
    async fn save(&self, program: &Program) -> Result<(), StoreError> {
        let bytes = encode(program)?;
        let tmp = self.tmp_path_for(program.id);

        let mut file = tokio::fs::File::create(&tmp).await.map_err(storage)?;
        file.write_all(&bytes).await.map_err(storage)?;
        file.sync_all().await.map_err(storage)?;
        drop(file);

        tokio::fs::rename(&tmp, self.path_for(program.id))
            .await
            .map_err(storage)?;

        // Make the rename itself durable
        if let Ok(dir) = tokio::fs::File::open(&self.dir).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }

    async fn load(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(e)),
        };
        decode(&id.to_string(), &bytes).map(Some)
    }

    async fn list(&self) -> Result<Vec<ProgramSummary>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(storage)?;
        let suffix = format!(".{}", EXTENSION);
        let mut summaries = vec![];

        while let Some(entry) = entries.next_entry().await.map_err(storage)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(&suffix) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            let Ok(id) = ProgramId::parse(stem) else {
                tracing::debug!(file = %name, "Skipping unrecognised file in store directory");
                continue;
            };
            if let Some(program) = self.load(id).await? {
                summaries.push(ProgramSummary::of(&program));
            }
        }

        Ok(newest_first(summaries))
    }
}
