use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moltapp::models::RoundTrigger;
use moltapp::scheduler::Scheduler;
use moltapp::store::RoundStore;
use moltapp::stream::EventFilter;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "moltapp", about = "Competitive AI trading rounds")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/moltapp.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scheduled rounds until Ctrl-C
    Run,
    /// Run one manual round and print it with its consensus
    Round {
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Print recent rounds from the history database
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Only this agent's results
        #[arg(long)]
        agent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = moltapp::load_config(&cli.config)?;

    if matches!(cli.command, Command::Run | Command::Round { .. })
        && !moltapp::agents::check_cli_available("claude").await
    {
        tracing::warn!("claude CLI not found on PATH; every agent decision will fail");
    }

    match cli.command {
        Command::Run => {
            let runtime = moltapp::build_runtime(&config).context("Failed to build runtime")?;

            // Mirror the live stream into the log.
            runtime
                .orchestrator
                .event_bus()
                .subscribe(EventFilter::all(), |event| {
                    tracing::debug!(
                        event_id = event.id,
                        event_type = ?event.event_type,
                        data = %event.data,
                        "Stream event"
                    );
                    Ok(())
                });

            let scheduler = Scheduler::new(
                runtime.orchestrator.clone(),
                Duration::from_secs(config.orchestrator.round_interval_seconds),
            );
            let cancel = scheduler.cancel_token();

            // Handle shutdown signals
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            let summary = scheduler.run().await;
            runtime.shutdown().await;
            tracing::info!(
                completed = summary.rounds_completed,
                failed = summary.rounds_failed,
                "MoltApp stopped"
            );
        }
        Command::Round { requested_by } => {
            let runtime = moltapp::build_runtime(&config).context("Failed to build runtime")?;
            let outcome = runtime
                .orchestrator
                .run_round(RoundTrigger::Manual { requested_by })
                .await;
            runtime.shutdown().await;

            let round = outcome.context("Trading round failed")?;
            let consensus = runtime.orchestrator.consensus().round(&round.round_id);
            print_json(
                &json!({
                    "round": round,
                    "consensus": consensus,
                    "rate_limits": runtime.orchestrator.limiters().metrics(),
                }),
                cli.pretty,
            )?;
        }
        Command::History { limit, agent } => {
            let store = moltapp::open_store(&config.store)?;
            let output = match agent {
                Some(agent_id) => {
                    let results = store
                        .agent_history(&agent_id, limit)
                        .await
                        .context("Failed to read agent history")?;
                    json!(results)
                }
                None => {
                    let rounds = store
                        .recent_rounds(limit)
                        .await
                        .context("Failed to read round history")?;
                    json!(rounds)
                }
            };
            print_json(&output, cli.pretty)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}
