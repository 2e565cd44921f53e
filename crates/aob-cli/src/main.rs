//! `aob`: a CLI binding for the AOB Control API (compile, start, resume,
//! events, snapshot, replay, cancel, DLQ) over a local, single-file
//! backend. A hosted deployment binds the same `aob-core` engine to
//! HTTP/gRPC ingress instead; this binary exists for local development,
//! scripting, and operator runbooks.

mod backend;
mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use backend::FileBackend;
use commands::{cancel, compile, dlq, events, replay, resume, snapshot, start};

#[derive(Debug, Parser)]
#[command(name = "aob", version, about = "Control API CLI for the Agentic Orchestration Builder")]
struct Cli {
    /// Path to the local state file. Defaults to the platform state
    /// directory (see `FileBackend::default_path`).
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compiles a declarative workflow spec into a runtime graph.
    Compile(compile::CompileArgs),
    /// Starts a new run of a compiled graph.
    Start(start::StartArgs),
    /// Resumes a suspended Human checkpoint.
    Resume(resume::ResumeArgs),
    /// Lists a run's durable event log.
    Events(events::EventsArgs),
    /// Forces or shows a run's snapshot.
    Snapshot(snapshot::SnapshotArgs),
    /// Reconstructs a run's state by replaying its event log from scratch.
    Replay(replay::ReplayArgs),
    /// Forcibly fails an in-flight run.
    Cancel(cancel::CancelArgs),
    /// Dead-letter queue operations.
    #[command(subcommand)]
    Dlq(dlq::DlqCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let state_path = cli.state.unwrap_or_else(FileBackend::default_path);
    let backend = Arc::new(FileBackend::load(&state_path)?);

    match cli.command {
        Command::Compile(args) => compile::run(backend, args).await,
        Command::Start(args) => start::run(backend, args).await,
        Command::Resume(args) => resume::run(backend, args).await,
        Command::Events(args) => events::run(backend, args).await,
        Command::Snapshot(args) => snapshot::run(backend, args).await,
        Command::Replay(args) => replay::run(backend, args).await,
        Command::Cancel(args) => cancel::run(backend, args).await,
        Command::Dlq(command) => dlq::run(backend, command).await,
    }
}
