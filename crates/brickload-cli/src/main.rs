//! brickload - drive catalog imports from the command line.
//!
//! State (job descriptors, catalog, extracted sources) lives under `--state-dir`,
//! so separate invocations resume the same job.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use brickload_core::app::BuildError;
use brickload_core::config::ConfigError;
use brickload_core::impls::{DirScratchSpace, SqliteCatalog, SqliteDatabase, SqliteJobStore};
use brickload_core::observability::init_tracing;
use brickload_core::ports::StoreError;
use brickload_core::{ImportConfig, ImportError, Importer, ImporterBuilder};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "brickload")]
#[command(about = "Resumable batch importer for colors / parts / elements catalogs")]
#[command(version)]
struct Cli {
    /// Directory holding the database and scratch space
    #[arg(long, env = "BRICKLOAD_STATE_DIR", default_value = ".brickload")]
    state_dir: PathBuf,

    /// JSON config file (BRICKLOAD_* variables override it)
    #[arg(long, env = "BRICKLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an archive and create an import job
    Prepare {
        /// ZIP, CSV or CSV.GZ file
        file: PathBuf,
    },
    /// Run one batch of a job
    Run {
        job_id: String,
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Show a job's progress without changing it
    Status { job_id: String },
    /// Prepare a file and run batches until the job finishes
    Drive {
        file: PathBuf,
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Expire idle jobs and purge old tombstones
    Reap,
}

/// Error surfaced to the caller as `{"error": code, "message": ...}`.
struct CliError {
    code: &'static str,
    message: String,
    exit: u8,
}

impl From<ImportError> for CliError {
    fn from(e: ImportError) -> Self {
        let exit = match e {
            ImportError::Conflict { .. } => 2,
            _ => 1,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            exit,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self {
            code: "config_error",
            message: e.to_string(),
            exit: 1,
        }
    }
}

impl From<BuildError> for CliError {
    fn from(e: BuildError) -> Self {
        Self {
            code: "build_error",
            message: e.to_string(),
            exit: 1,
        }
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        ImportError::from(e).into()
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self {
            code: "output_error",
            message: e.to_string(),
            exit: 1,
        }
    }
}

fn open_importer(state_dir: &Path, config: Option<&Path>) -> Result<Importer, CliError> {
    let config = ImportConfig::resolve(config)?;
    let db = SqliteDatabase::open(&state_dir.join("brickload.db"))?;
    let importer = ImporterBuilder::new()
        .config(config)
        .job_store(SqliteJobStore::new(db.clone()))
        .catalog(SqliteCatalog::new(db))
        .scratch(DirScratchSpace::new(state_dir.join("scratch")))
        .build()?;
    Ok(importer)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn drive(importer: &Importer, file: &Path, batch_size: Option<u32>) -> Result<(), CliError> {
    let report = importer.prepare(file).await?;
    let job_id = report.job_id.to_string();
    for warning in &report.warnings {
        tracing::warn!(job_id = %job_id, "{warning}");
    }

    loop {
        let snapshot = importer.run_batch(&job_id, batch_size).await?;
        tracing::info!(
            job_id = %job_id,
            phase = %snapshot.phase,
            cursor = snapshot.cursor,
            total_rows = snapshot.total_rows,
            "batch done"
        );
        if snapshot.status.is_finished() {
            return print_json(&snapshot);
        }
    }
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let importer = open_importer(&cli.state_dir, cli.config.as_deref())?;
    match cli.command {
        Commands::Prepare { file } => print_json(&importer.prepare(&file).await?),
        Commands::Run { job_id, batch_size } => {
            print_json(&importer.run_batch(&job_id, batch_size).await?)
        }
        Commands::Status { job_id } => print_json(&importer.status(&job_id).await?),
        Commands::Drive { file, batch_size } => drive(&importer, &file, batch_size).await,
        Commands::Reap => print_json(&importer.reap_expired(chrono::Utc::now()).await?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let body = serde_json::json!({ "error": e.code, "message": e.message });
            println!("{body}");
            ExitCode::from(e.exit)
        }
    }
}
