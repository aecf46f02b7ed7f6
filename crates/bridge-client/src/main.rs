use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridge_client::{ApiClient, Session};
use bridge_core::{load_config, BridgeConfig};

#[derive(Parser, Debug)]
#[command(name = "bridge", about = "Live console for the issue pipeline orchestrator")]
struct Args {
    /// Base URL of the orchestrator (overrides the config file).
    #[arg(long)]
    server: Option<String>,
    /// Path to a bridge.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live pipeline state (default).
    Watch,
    /// Ask the orchestrator to start a run.
    Start,
    /// Ask the orchestrator to stop the current run.
    Stop,
    /// Answer a pending human-input request.
    Answer { issue_number: u64, answer: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(server) = args.server {
        config.server_url = server;
    }

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            let session = Session::spawn(config);
            watch(&session).await;
            session.shutdown();
        }
        Command::Start => {
            ApiClient::new(&config.server_url).start_orchestrator().await?;
            info!("orchestrator start requested");
        }
        Command::Stop => {
            ApiClient::new(&config.server_url).stop_orchestrator().await?;
            info!("orchestrator stop requested");
        }
        Command::Answer {
            issue_number,
            answer,
        } => {
            ApiClient::new(&config.server_url)
                .submit_human_input(issue_number, &answer)
                .await?;
            info!(issue_number, "answer submitted");
        }
    }

    Ok(())
}

async fn watch(session: &Session) {
    let mut state = session.state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                info!(
                    connected = snapshot.connected,
                    phase = %snapshot.phase,
                    status = %snapshot.orchestrator_status,
                    workers = snapshot.workers.len(),
                    open_prs = snapshot.prs.iter().filter(|pr| !pr.merged).count(),
                    merged = snapshot.counters.merged_count,
                    hitl = snapshot.hitl.len(),
                    pending_input = snapshot.pending_input.len(),
                    "pipeline state",
                );
            }
        }
    }
}
