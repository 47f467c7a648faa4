use crate::config::{Config, StoreBackend};
use crate::executor::Script;
use crate::program::{ProgramId, ProgramStatus};
use crate::store::PgStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rhythm-cps")]
#[command(about = "Rhythm CPS - durable, resumable workflow script engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that a script file parses and validates
    Validate {
        /// Script file (JSON AST)
        script: PathBuf,
    },

    /// List stored programs
    List {
        /// Filter by status (running, success, failure, aborted)
        #[arg(short = 's', long = "status")]
        status: Option<String>,

        /// Number of results
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: usize,
    },

    /// Show a stored program: threads, interruption causes and run log
    Inspect {
        /// Program ID
        program_id: String,
    },

    /// Print the effective configuration
    Config,

    /// Run database migrations (postgres store)
    Migrate,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    run_cli_with_args(Cli::parse()).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    run_cli_with_args(Cli::parse_from(args)).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load and validate configuration before any command runs
    let config = Config::builder()
        .config_path(cli.config)
        .database_url(cli.database_url)
        .build()?;

    match cli.command {
        Commands::Validate { script } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script: {:?}", script))?;
            let parsed = Script::from_json(&source)?;
            println!("✓ {:?} is valid", script);
            println!("  Functions: {}", parsed.functions.len());
            let non_resumable: Vec<&str> = parsed
                .functions
                .iter()
                .filter(|f| f.non_resumable)
                .map(|f| f.name.as_str())
                .collect();
            if !non_resumable.is_empty() {
                println!("  Non-resumable: {}", non_resumable.join(", "));
            }
            println!("  Digest: {}", parsed.digest()?);
        }

        Commands::List { status, limit } => {
            let status_filter = status
                .map(|s| s.to_uppercase().parse::<ProgramStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;

            let store = config.open_store().await?;
            let programs: Vec<_> = store
                .list()
                .await?
                .into_iter()
                .filter(|p| status_filter.map_or(true, |s| p.status == s))
                .take(limit)
                .collect();

            if programs.is_empty() {
                println!("No programs found");
                return Ok(());
            }

            println!("Found {} program(s):\n", programs.len());
            for p in programs {
                println!(
                    "  {} | {} | {} thread(s) | updated {}",
                    p.id, p.status, p.threads, p.updated_at
                );
            }
        }

        Commands::Inspect { program_id } => {
            let id = ProgramId::parse(&program_id)
                .with_context(|| format!("Invalid program ID: {}", program_id))?;
            let store = config.open_store().await?;
            let program = store
                .load(id)
                .await?
                .with_context(|| format!("Program {} not found", id))?;

            println!("Program: {}", program.id);
            println!("Status: {}", program.status);
            println!("Created: {}", program.created_at);
            println!("Updated: {}", program.updated_at);

            println!("\nThreads:");
            for thread in &program.threads {
                let waiting = thread
                    .pending
                    .as_ref()
                    .map(|p| format!(" (waiting on {} #{})", p.name, p.id))
                    .unwrap_or_default();
                println!("  {} {} {}{}", thread.id, thread.name, thread.state, waiting);
            }

            if !program.causes.is_empty() {
                println!("\nCauses of interruption:");
                for cause in &program.causes {
                    println!("  {}", cause.short_description());
                }
            }

            println!("\nLog:");
            for line in program.log.lines() {
                println!("  {}", line);
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Migrate => {
            if config.store.backend != StoreBackend::Postgres {
                anyhow::bail!("Migrations only apply to the postgres store");
            }
            println!("Running migrations...");
            // Connecting runs the migrations
            PgStore::connect(&config.store)
                .await
                .context("Failed to run migrations")?;
            println!("Migrations complete!");
        }
    }

    Ok(())
}
