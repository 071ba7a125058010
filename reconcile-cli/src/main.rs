//! CLI front-end for the sync engine (spec §6): `sync full|incremental|
//! resolve|status`, `schema validate|migrate`, with `--policy`,
//! `--timeout`, `--batch-size` flags and the documented exit codes.
//! This binary constructs its own short-lived `Engine` per invocation —
//! there is no persisted daemon state, so `sync resolve` only succeeds
//! against conflicts surfaced by the same invocation (`sync status`
//! following a prior `sync full`/`sync incremental` run that reported
//! manual conflicts).

use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reconcile_core::{ExitCode, Payload, ResolutionStrategy, RuntimeConditions, SyncError, SyncEventKind, SyncPolicy};
use reconcile_engine::Engine;
use reconcile_store_mem::MemoryStore;
use reconcile_transport_http::HttpRemoteCollaborator;

#[derive(Parser)]
#[command(name = "reconcile", about = "Offline-first sync engine CLI")]
struct Cli {
    /// Base URL of the remote sync server (see `reconcile-sync-server`).
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// A policy preset name, or an inline JSON object overriding `SyncPolicy` defaults.
    #[arg(long, global = true)]
    policy: Option<String>,

    /// Overrides `SyncPolicy::max_sync_duration_secs`.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Overrides `SyncPolicy::batch_size`.
    #[arg(long = "batch-size", global = true)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a sync operation or inspect sync status.
    #[command(subcommand)]
    Sync(SyncCommand),
    /// Inspect or migrate the remote schema.
    #[command(subcommand)]
    Schema(SchemaCommand),
}

#[derive(Subcommand)]
enum SyncCommand {
    Full {
        #[arg(long)]
        family: String,
    },
    Incremental {
        #[arg(long)]
        family: String,
    },
    Resolve {
        #[arg(long)]
        id: String,
        #[arg(long)]
        strategy: StrategyArg,
    },
    Status {
        #[arg(long)]
        family: Option<String>,
        /// Keep printing status/completion/failure events as they occur
        /// instead of printing the current snapshot once and exiting.
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum SchemaCommand {
    Validate {
        #[arg(long)]
        family: String,
        /// JSON array of `{"name","kind","nullable"}` declaring the model's
        /// syncable properties (required sync columns are added implicitly).
        #[arg(long)]
        properties: Option<String>,
    },
    Migrate {
        #[arg(long)]
        family: String,
        #[arg(long)]
        properties: Option<String>,
    },
}

fn parse_properties(raw: &Option<String>) -> Result<Vec<reconcile_engine::ColumnSpec>, SyncError> {
    match raw {
        None => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json).map_err(|err| SyncError::StoreFailure {
            kind: format!("invalid --properties JSON: {err}"),
        }),
    }
}

#[derive(Clone, clap::ValueEnum)]
enum StrategyArg {
    LocalWins,
    RemoteWins,
    LastWriteWins,
    Merge,
    Manual,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::LocalWins => ResolutionStrategy::LocalWins,
            StrategyArg::RemoteWins => ResolutionStrategy::RemoteWins,
            StrategyArg::LastWriteWins => ResolutionStrategy::LastWriteWins,
            StrategyArg::Merge => ResolutionStrategy::Merge,
            StrategyArg::Manual => ResolutionStrategy::Manual,
        }
    }
}

fn event_family<'a>(event: &'a SyncEventKind) -> Option<&'a str> {
    match event {
        SyncEventKind::Status(s) => Some(s.family.as_str()),
        SyncEventKind::Progress { family, .. }
        | SyncEventKind::Completion { family, .. }
        | SyncEventKind::Failure { family, .. }
        | SyncEventKind::Conflicts { family, .. } => Some(family.as_str()),
    }
}

fn print_sync_event(filter: Option<&str>, event: &SyncEventKind) {
    if let (Some(filter), Some(family)) = (filter, event_family(event)) {
        if filter != family {
            return;
        }
    }
    match event {
        SyncEventKind::Status(s) => println!("{}: {:?} pending={}", s.family, s.state, s.pending_count),
        SyncEventKind::Progress { family, uploaded, downloaded } => {
            println!("{family}: progress uploaded={uploaded} downloaded={downloaded}")
        }
        SyncEventKind::Completion { family, result } => println!(
            "{family}: completed uploaded={} downloaded={} conflicts={} manual={}",
            result.uploaded, result.downloaded, result.conflicts_total, result.conflicts_manual
        ),
        SyncEventKind::Failure { family, error } => println!("{family}: failed {error}"),
        SyncEventKind::Conflicts { family, conflicts } => {
            println!("{family}: {} conflict(s) need manual resolution", conflicts.len())
        }
    }
}

fn build_policy(cli: &Cli) -> Result<SyncPolicy, SyncError> {
    let mut policy = match &cli.policy {
        None => SyncPolicy::default(),
        Some(raw) => serde_json::from_str(raw).map_err(|err| SyncError::StoreFailure {
            kind: format!("invalid --policy JSON: {err}"),
        })?,
    };
    if let Some(timeout) = cli.timeout {
        policy.max_sync_duration_secs = timeout;
    }
    if let Some(batch_size) = cli.batch_size {
        policy.batch_size = batch_size;
    }
    Ok(policy)
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(output) => {
            println!("{output}");
            ProcessExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err.user_message());
            ProcessExitCode::from(ExitCode::from(&err) as i32 as u8)
        }
    }
}

async fn run(cli: &Cli) -> Result<String, SyncError> {
    let policy = build_policy(cli)?;
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(HttpRemoteCollaborator::new(cli.server.clone()));
    let engine = Engine::builder(store, remote).policy(policy).build();

    match &cli.command {
        Command::Sync(SyncCommand::Full { family }) => {
            let result = engine.start_full_sync(family, RuntimeConditions::default()).await?;
            Ok(format!(
                "uploaded={} downloaded={} conflicts={} manual={} duration_ms={}",
                result.uploaded, result.downloaded, result.conflicts_total, result.conflicts_manual, result.duration_ms
            ))
        }
        Command::Sync(SyncCommand::Incremental { family }) => {
            let result = engine.start_incremental_sync(family, RuntimeConditions::default()).await?;
            Ok(format!(
                "uploaded={} downloaded={} conflicts={} manual={} fell_back_to_full={} duration_ms={}",
                result.uploaded,
                result.downloaded,
                result.conflicts_total,
                result.conflicts_manual,
                result.fell_back_to_full,
                result.duration_ms
            ))
        }
        Command::Sync(SyncCommand::Resolve { id, strategy }) => {
            let resolution = engine.resolve_conflict(id, strategy.clone().into(), None::<Payload>)?;
            Ok(format!(
                "resolved {id} via {:?}, automatic={}",
                resolution.strategy, resolution.was_automatic
            ))
        }
        Command::Sync(SyncCommand::Status { family, watch: false }) => {
            let statuses = engine.get_status(family.as_deref());
            if statuses.is_empty() {
                return Ok("no tracked families".to_string());
            }
            Ok(statuses
                .into_iter()
                .map(|s| format!("{}: {:?} pending={}", s.family, s.state, s.pending_count))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Sync(SyncCommand::Status { family, watch: true }) => {
            let (replay, mut rx) = engine.observe();
            if let Some(events) = replay {
                for event in &events {
                    print_sync_event(family.as_deref(), event);
                }
            }
            loop {
                match rx.recv().await {
                    Ok(event) => print_sync_event(family.as_deref(), &event),
                    Err(_) => return Ok("event stream closed".to_string()),
                }
            }
        }
        Command::Schema(SchemaCommand::Validate { family, properties }) => {
            engine.register_model(reconcile_engine::FamilyDescriptor {
                family: family.clone(),
                properties: parse_properties(properties)?,
            });
            let diffs = engine.validate_schema(family).await?;
            if diffs.is_empty() {
                Ok(format!("{family}: schema is up to date"))
            } else {
                Ok(diffs.into_iter().map(|d| format!("{d:?}")).collect::<Vec<_>>().join("\n"))
            }
        }
        Command::Schema(SchemaCommand::Migrate { family, properties }) => {
            engine.register_model(reconcile_engine::FamilyDescriptor {
                family: family.clone(),
                properties: parse_properties(properties)?,
            });
            engine.migrate_schema(family).await
        }
    }
}
