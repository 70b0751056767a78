use std::fs;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tabula_kernel::adapters::auth::{CallerContext, StaticAuthorizer};
use tabula_kernel::backup::BackupChunk;
use tabula_kernel::column::{ColumnId, NewColumn};
use tabula_kernel::invariants::max_row_size;
use tabula_kernel::log::Version;
use tabula_kernel::{EngineConfig, TableEngine};

/// Tabula table engine CLI
#[derive(Parser, Debug)]
#[command(name = "tabula")]
#[command(about = "Offline tools for tabula schemas and row history", long_about = None)]
struct Cli {
    /// Path to engine config JSON
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a list of columns fits in one table
    CheckSchema {
        /// Path to a JSON array of column definitions
        #[arg(long)]
        columns: String,
    },
    /// Rebuild table content from an exported backup
    Replay {
        /// Path to a JSON array of backup chunks
        #[arg(long)]
        backup: String,

        /// Stop after this version
        #[arg(long)]
        version: Option<Version>,
    },
}

#[derive(Debug, Serialize)]
struct SchemaCheckOutput {
    columns: usize,
    column_ids: Vec<ColumnId>,
    max_row_bytes: u64,
    ok: bool,
    error: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    debug!(?config, "engine config loaded");

    let engine = TableEngine::in_memory(config, Arc::new(StaticAuthorizer::permissive()));

    match cli.command {
        Command::CheckSchema { columns } => check_schema(&engine, &columns),
        Command::Replay { backup, version } => replay(&engine, &backup, version),
    }
}

fn check_schema(engine: &TableEngine, path: &str) -> Result<()> {
    let columns: Vec<NewColumn> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let created = engine.create_columns(&CallerContext::admin(0), &columns)?;
    let column_ids: Vec<ColumnId> = created.iter().map(|c| c.id.clone()).collect();

    let (ok, error) = match engine.validate_schema_size(&column_ids) {
        Ok(_) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    };
    info!(columns = created.len(), ok, "schema checked");

    let output = SchemaCheckOutput {
        columns: created.len(),
        max_row_bytes: max_row_size(&created),
        column_ids,
        ok,
        error,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn replay(engine: &TableEngine, path: &str, version: Option<Version>) -> Result<()> {
    let chunks: Vec<BackupChunk> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let Some(summary) = engine.restore_table(chunks)? else {
        bail!("backup {path} contains no chunks");
    };
    info!(table = %summary.table_id, versions = summary.versions, "backup restored");

    let snapshot = engine.replay(&summary.table_id, version)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
