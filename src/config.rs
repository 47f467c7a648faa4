//! Configuration management
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Builder overrides (CLI flags such as --database-url)
//! 2. Environment variables (RHYTHM_CPS_ENGINE__MAX_THREADS, etc.)
//! 3. Config file (rhythm-cps.toml in the working directory, or an explicit path)
//! 4. Built-in defaults
//!
//! # Example Config File (rhythm-cps.toml)
//!
//! ```toml
//! [engine]
//! max_stack_depth = 1024
//! max_threads = 64
//!
//! [store]
//! backend = "file"
//! path = "./programs"
//! ```
//!
//! # Environment Variables
//!
//! Values nest with a double underscore after the RHYTHM_CPS_ prefix:
//! - RHYTHM_CPS_STORE__BACKEND
//! - RHYTHM_CPS_STORE__DATABASE_URL
//! - RHYTHM_CPS_ENGINE__MAX_STACK_DEPTH

use crate::executor::vm::DEFAULT_MAX_FRAMES;
use crate::store::{FileStore, MemoryStore, PgStore, ProgramStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_FILE: &str = "rhythm-cps.toml";
const ENV_PREFIX: &str = "RHYTHM_CPS";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Limits applied while driving programs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Frames a continuation may hold before throwing StackOverflow
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Threads (main plus forked branches) a single program may own
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

/// Where program records are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// PostgreSQL connection URL (postgres backend only)
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

// Default value functions for serde
fn default_max_stack_depth() -> usize {
    DEFAULT_MAX_FRAMES
}
fn default_max_threads() -> usize {
    64
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./programs")
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_acquire_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: default_max_stack_depth(),
            max_threads: default_max_threads(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            database_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration with the full priority chain
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for constructing config with overrides
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("Failed to parse configuration")
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_stack_depth == 0 {
            anyhow::bail!("engine.max_stack_depth must be at least 1");
        }
        if self.engine.max_threads == 0 {
            anyhow::bail!("engine.max_threads must be at least 1");
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            anyhow::bail!(
                "Database URL not configured\n\n\
                The postgres store needs a URL, set with one of:\n\
                  1. Config file: Add 'database_url = \"postgresql://...\"' to [store] in {}\n\
                  2. Environment variable: {}_STORE__DATABASE_URL=postgresql://...\n\
                  3. CLI flag: --database-url postgresql://...",
                DEFAULT_FILE,
                ENV_PREFIX
            );
        }
        if self.store.min_connections > self.store.max_connections {
            anyhow::bail!("store.min_connections exceeds store.max_connections");
        }
        Ok(())
    }

    /// Open the configured store
    pub async fn open_store(&self) -> Result<Arc<dyn ProgramStore>> {
        let store: Arc<dyn ProgramStore> = match self.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => Arc::new(
                FileStore::new(&self.store.path)
                    .with_context(|| format!("Failed to open store at {:?}", self.store.path))?,
            ),
            StoreBackend::Postgres => Arc::new(
                PgStore::connect(&self.store)
                    .await
                    .context("Failed to connect to database")?,
            ),
        };
        Ok(store)
    }
}

/// Builder for constructing Config with optional overrides
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    database_url: Option<String>,
    backend: Option<StoreBackend>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Override the config file path
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Override the database URL; also selects the postgres backend
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn backend(mut self, backend: Option<StoreBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Ignore `.env` and the process environment
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Build the final config by applying the priority chain
    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            // A missing .env is fine
            let _ = dotenvy::dotenv();
        }

        let mut sources = config::Config::builder();

        match self.resolve_path()? {
            Some(path) => {
                sources = sources.add_source(config::File::from(path).required(true));
            }
            None => {
                sources = sources.add_source(config::File::with_name(DEFAULT_FILE).required(false));
            }
        }

        if !self.skip_env {
            sources = sources.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Config = sources
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Result<Option<PathBuf>> {
        let path = match &self.config_path {
            Some(path) => Some(path.clone()),
            None if !self.skip_env => env::var(format!("{}_CONFIG_PATH", ENV_PREFIX))
                .ok()
                .map(PathBuf::from),
            None => None,
        };

        if let Some(path) = &path {
            if !path.exists() {
                anyhow::bail!("Config file not found: {:?}", path);
            }
        }
        Ok(path)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.database_url {
            config.store.database_url = Some(url.clone());
            config.store.backend = StoreBackend::Postgres;
        }
        if let Some(backend) = self.backend {
            config.store.backend = backend;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.max_stack_depth, DEFAULT_MAX_FRAMES);
        assert_eq!(config.engine.max_threads, 64);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml(
            r#"
            [engine]
            max_threads = 8

            [store]
            backend = "file"
            path = "/var/lib/rhythm-cps"
        "#,
        )
        .unwrap();

        assert_eq!(config.engine.max_threads, 8);
        assert_eq!(config.engine.max_stack_depth, DEFAULT_MAX_FRAMES); // Default
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/rhythm-cps"));
    }

    #[test]
    fn test_builder_reads_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nmax_stack_depth = 99").unwrap();

        let config = Config::builder()
            .without_env()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();
        assert_eq!(config.engine.max_stack_depth, 99);
    }

    #[test]
    fn test_database_url_override_selects_postgres() {
        let config = Config::builder()
            .without_env()
            .database_url(Some("postgresql://override/db".to_string()))
            .build()
            .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(
            config.store.database_url.as_deref(),
            Some("postgresql://override/db")
        );
    }

    #[test]
    fn test_postgres_without_url_is_rejected() {
        let result = Config::builder()
            .without_env()
            .backend(Some(StoreBackend::Postgres))
            .build();
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("Database URL not configured"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .without_env()
            .config_path(Some(PathBuf::from("/nonexistent/rhythm-cps.toml")))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = Config::default();
        config.engine.max_threads = 3;
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("max_threads = 3"));
        assert_eq!(Config::from_toml(&rendered).unwrap(), config);
    }
}
