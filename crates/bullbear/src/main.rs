use std::process::ExitCode;

use anyhow::{Context, Result};
use bullbear_models::{BullbearConfig, RecordId};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bullbear", about = "Multi-agent trading deliberation engine")]
struct Cli {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deliberate on one instrument and print the transcript and decision
    Run {
        #[arg(short, long)]
        symbol: String,

        /// Analysis date, YYYY-MM-DD
        #[arg(short, long)]
        date: NaiveDate,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Label a run's memory record with its realized return
    Reflect {
        /// Signed return, e.g. 0.042 for +4.2%
        #[arg(long = "return", allow_hyphen_values = true)]
        realized_return: Decimal,

        /// Record to label, as printed by `run`; defaults to the newest
        /// record if it is still unlabeled
        #[arg(long)]
        record: Option<RecordId>,
    },
    /// List stored memory records
    Memory {
        #[arg(long)]
        pretty: bool,
    },
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

fn load_config(path: Option<&str>) -> Result<BullbearConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {path}"))?;
            bullbear::parse_config(&text)
        }
        None => Ok(BullbearConfig::default()),
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "bullbear failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let graph = bullbear::build_graph(&config)
        .await
        .context("Failed to build deliberation graph")?;

    match cli.command {
        Command::Run {
            symbol,
            date,
            pretty,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling after the current phase");
                    on_interrupt.cancel();
                }
            });

            match graph.propagate_with_cancel(&symbol, date, &cancel).await {
                Ok(result) => {
                    let output = serde_json::json!({
                        "transcript": result.transcript,
                        "final_decision": result.final_decision,
                        "memory_record_id": result.memory_record_id,
                        "processing_time_ms": result.processing_time_ms,
                    });
                    println!("{}", to_json(&output, pretty)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    let message = failure.to_string();
                    let output = serde_json::json!({
                        "failed_stage": failure.phase,
                        "error": failure.error.to_string(),
                        "transcript": failure.transcript,
                    });
                    println!("{}", to_json(&output, pretty)?);
                    eprintln!("error: {message}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Reflect {
            realized_return,
            record,
        } => {
            let id = match record {
                Some(id) => id,
                None => graph
                    .memory()
                    .pending_reflection()
                    .context("No record given and the newest record is not awaiting reflection")?
                    .id,
            };
            let id = graph
                .reflect_on(id, realized_return)
                .await
                .with_context(|| format!("Reflection on record {id} failed"))?;
            info!(record_id = id, "Labeled");
            println!("{}", serde_json::json!({ "labeled_record_id": id }));
            Ok(ExitCode::SUCCESS)
        }
        Command::Memory { pretty } => {
            let records = graph
                .memory()
                .records()
                .context("Failed to read memory records")?;
            println!("{}", to_json(&records, pretty)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
