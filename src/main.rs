//! pacsflow - clinical imaging saga runner
//!
//! Usage:
//!   pacsflow import <dir>        → import DICOM files from a directory
//!   pacsflow resume <id>         → continue an interrupted import
//!   pacsflow status <id>         → show one saga
//!   pacsflow list                → show every saga on disk
//!   pacsflow config              → print the default configuration

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pacsflow::{check_label, collect_files, LocalLibrary};
use pacsflow_core::{
    CorrelationId, ImportOptions, PacsflowConfig, SagaState, TracingAudit, WorkflowEvent,
    WorkflowId, WorkflowKind, WorkflowStatus,
};
use pacsflow_saga::{FileStateStore, ImportWorkflow, Orchestrator, ResourceGovernor, StateStoreExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "pacsflow",
    about = "Resumable import, anonymization, export and sync sagas for clinical imaging",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "pacsflow.toml")]
    config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit stderr logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import every matching file under a directory
    Import {
        dir: PathBuf,
        /// Glob of files to include, relative to <dir> (repeatable; default: all)
        #[arg(short, long)]
        include: Vec<String>,
        /// Replace files already present in the library
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Library subdirectory for this batch
        #[arg(long)]
        label: Option<String>,
        /// Correlation id of the request that started this import
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Continue an interrupted import from its last checkpoint
    Resume { id: WorkflowId },
    /// Show one saga
    Status { id: WorkflowId },
    /// List every saga in the state directory
    List,
    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", PacsflowConfig::default().to_toml());
        return Ok(());
    }

    let _log_guard = init_tracing(cli.log_file.as_deref(), cli.json_logs)?;
    let config = PacsflowConfig::load(&cli.config)?;

    match cli.command {
        Commands::Import {
            dir,
            include,
            overwrite,
            label,
            correlation_id,
        } => {
            if let Some(label) = &label {
                check_label(label).map_err(anyhow::Error::msg)?;
            }
            let files = collect_files(&dir, &include)?;
            if files.is_empty() {
                bail!("no files matched under {}", dir.display());
            }
            println!("Importing {} file(s) from {}", files.len(), dir.display());
            let options = ImportOptions {
                overwrite_existing: overwrite,
                source_label: label,
                source_root: Some(dir.clone()),
            };
            let state = ImportWorkflow::new_state(
                files.iter().map(|p| p.to_string_lossy().into_owned()),
                options,
                config.default_limits(),
                correlation_id.map(CorrelationId::new),
            );
            let done = drive(&config, Some(state), None).await?;
            finish(&done)
        }
        Commands::Resume { id } => {
            let done = drive(&config, None, Some(id)).await?;
            finish(&done)
        }
        Commands::Status { id } => {
            let store = FileStateStore::new(&config.storage.state_dir);
            let state: SagaState = store
                .get_state(id)
                .await?
                .with_context(|| format!("no saga {} in {}", id, config.storage.state_dir.display()))?;
            print_status(&state);
            Ok(())
        }
        Commands::List => {
            let store = FileStateStore::new(&config.storage.state_dir);
            let sagas = store.list_sagas().await?;
            if sagas.is_empty() {
                println!("No sagas in {}", config.storage.state_dir.display());
            }
            for s in sagas {
                println!(
                    "{}  {:<13} {:<11} {:>3}%  {}/{}  {}",
                    s.workflow_id,
                    s.kind().to_string(),
                    s.status().to_string(),
                    s.percent_complete(),
                    s.ledger().settled_count(),
                    s.ledger().total(),
                    s.updated_at().format("%Y-%m-%d %H:%M:%S"),
                );
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

fn init_tracing(
    log_file: Option<&std::path::Path>,
    json: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pacsflow=info".into());

    let (plain, json_layer) = if json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None)
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Run a new import or resume one, with Ctrl-C cancelling it and progress
/// printed as it arrives.
async fn drive(
    config: &PacsflowConfig,
    state: Option<SagaState>,
    resume: Option<WorkflowId>,
) -> anyhow::Result<SagaState> {
    let store = Arc::new(FileStateStore::new(&config.storage.state_dir));
    let governor = Arc::new(ResourceGovernor::from_config(config));
    let orchestrator = Orchestrator::new(governor, store.clone(), Arc::new(TracingAudit));
    let workflow = ImportWorkflow::new(Arc::new(LocalLibrary::new(&config.storage.library_dir)));

    let workflow_id = match (&state, resume) {
        (Some(s), _) => s.workflow_id,
        (None, Some(id)) => id,
        (None, None) => bail!("nothing to run"),
    };
    if state.is_none() {
        let existing: SagaState = store
            .get_state(workflow_id)
            .await?
            .with_context(|| format!("no saga {}", workflow_id))?;
        if existing.kind() != WorkflowKind::Import {
            bail!(
                "saga {} is a {} saga; only imports can be resumed from the command line",
                workflow_id,
                existing.kind()
            );
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            on_signal.cancel();
        }
    });

    let printer = tokio::spawn(print_events(orchestrator.subscribe(), workflow_id));
    println!("Workflow {}", workflow_id);
    let done = match state {
        Some(state) => orchestrator.run(state, &workflow, &cancel).await?,
        None => orchestrator.resume(workflow_id, &workflow, &cancel).await?,
    };
    // Closing the channel ends the printer even when nothing was emitted.
    drop(orchestrator);
    let _ = printer.await;
    Ok(done)
}

async fn print_events(mut rx: broadcast::Receiver<WorkflowEvent>, workflow_id: WorkflowId) {
    loop {
        match rx.recv().await {
            Ok(event) if event.workflow_id() != workflow_id => continue,
            Ok(WorkflowEvent::ProgressUpdated(p)) => {
                println!(
                    "[{:>3}%] {}/{}  {}",
                    p.percent_complete, p.processed_items, p.total_items, p.step_description
                );
            }
            Ok(event) => {
                if let WorkflowEvent::Failed { failed_step, error_details, .. } = &event {
                    println!("Failed at {}: {}", failed_step, error_details);
                }
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("({} progress updates skipped)", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_status(state: &SagaState) {
    let ledger = state.ledger();
    println!("Workflow   {}", state.workflow_id);
    println!("Kind       {}", state.kind());
    println!("Status     {}", state.status());
    println!("Correlation {}", state.correlation_id);
    println!("Created    {}", state.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated    {}", state.updated_at().format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Progress   {}% ({} processed, {} failed, {} total)",
        state.percent_complete(),
        ledger.processed().len(),
        ledger.failed().len(),
        ledger.total()
    );
    println!("Resumed    {} time(s)", state.retry_count);
    if let (Some(step), Some(details)) = (&state.failed_step, &state.error_details) {
        println!("Failed at  {}: {}", step, details);
    }
    for (item, reason) in ledger.failed() {
        println!("  failed   {}  ({})", item, reason);
    }
}

fn finish(state: &SagaState) -> anyhow::Result<()> {
    let ledger = state.ledger();
    match state.status() {
        WorkflowStatus::Completed => {
            println!(
                "Completed: {} processed, {} failed",
                ledger.processed().len(),
                ledger.failed().len()
            );
            for (item, reason) in ledger.failed() {
                println!("  failed   {}  ({})", item, reason);
            }
            Ok(())
        }
        WorkflowStatus::Cancelled => {
            println!(
                "Cancelled with {} item(s) left; run `pacsflow resume {}` to continue",
                ledger.remaining().len(),
                state.workflow_id
            );
            Ok(())
        }
        other => bail!(
            "workflow {} ended {}: {}",
            state.workflow_id,
            other,
            state.error_details.as_deref().unwrap_or("no details")
        ),
    }
}
