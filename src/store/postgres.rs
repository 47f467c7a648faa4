//! Postgres-backed store
//!
//! One row per program in `cps_programs`; the serialized program lives in a
//! JSONB column and is replaced in a single upsert.

use super::{ProgramStore, ProgramSummary, StoreError};
use crate::config::StoreConfig;
use crate::program::types::{ProgramId, ProgramStatus};
use crate::program::Program;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the store settings and run migrations
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Storage("database URL not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to run migrations: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProgramStore for PgStore {
    async fn save(&self, program: &Program) -> Result<(), StoreError> {
        let record = serde_json::to_value(program)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO cps_programs (id, status, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(program.id.0)
        .bind(program.status.to_string())
        .bind(&record)
        .bind(program.created_at)
        .bind(program.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn load(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT record FROM cps_programs WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((record,)) => serde_json::from_value(record)
                .map(Some)
                .map_err(|e| StoreError::Corrupted {
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ProgramSummary>, StoreError> {
        let rows: Vec<(Uuid, String, i32, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, status, jsonb_array_length(record->'threads'), created_at, updated_at
            FROM cps_programs
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, status, threads, created_at, updated_at)| {
                let status: ProgramStatus =
                    status.parse().map_err(|reason| StoreError::Corrupted {
                        id: id.to_string(),
                        reason,
                    })?;
                Ok(ProgramSummary {
                    id: ProgramId(id),
                    status,
                    threads: threads.max(0) as usize,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Script;

    #[tokio::test]
    #[ignore] // Requires database to be running
    async fn test_upsert_and_load() {
        let config = StoreConfig {
            database_url: std::env::var("RHYTHM_CPS_STORE__DATABASE_URL").ok(),
            ..StoreConfig::default()
        };
        let store = PgStore::connect(&config).await.unwrap();

        let mut program =
            Program::new(Script::from_json(r#"{"body": {"t": "Block", "body": []}}"#).unwrap())
                .unwrap();
        store.save(&program).await.unwrap();

        program.status = ProgramStatus::Success;
        program.log.push("Finished: SUCCESS");
        store.save(&program).await.unwrap();

        let loaded = store.load(program.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ProgramStatus::Success);
        assert_eq!(loaded.log.lines(), vec!["Finished: SUCCESS"]);

        let listed = store.list().await.unwrap();
        assert!(listed.iter().any(|s| s.id == program.id));
    }
}
