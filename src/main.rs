//! `testgen` command-line entry point.
//!
//! Exit codes: 0 when every task succeeded, 1 when any task failed (or the
//! probe reports the tool unusable), 2 on a run-level error.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use testgen::events::{EventEmitter, OrchestratorEvent, TimedEvent};
use testgen::process::{AuthProbe, CommandProbe};
use testgen::{logging, Batch, OrchestratorConfig, OutputFormat, Result, TaskOrchestrator};

#[derive(Parser)]
#[command(
    name = "testgen",
    version,
    about = "Run test-generation tasks through a supervised pool of AI tool processes"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a batch of tasks from a JSON file.
    Run {
        /// Batch file: `{ "tasks": [...], "maxConcurrency": N }`.
        #[arg(short, long)]
        batch: PathBuf,

        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Cap on concurrent processes.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Model passed to the tool.
        #[arg(long)]
        model: Option<String>,

        /// Output encoding requested from the tool (json or text).
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Substitute placeholder output when the tool cannot authenticate.
        #[arg(long)]
        degrade: bool,

        /// Print results as JSON instead of the report.
        #[arg(long)]
        json: bool,
    },
    /// Check whether the external tool is installed and authenticated.
    Probe {
        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            batch,
            config,
            max_concurrency,
            model,
            format,
            degrade,
            json,
        } => {
            let mut config = OrchestratorConfig::load(config.as_deref())?;
            if let Some(max) = max_concurrency {
                config = config.with_max_concurrent(max);
            }
            if let Some(model) = model {
                config = config.with_model(model);
            }
            if let Some(format) = format {
                config = config.with_output_format(format);
            }
            if degrade {
                config = config.with_graceful_degradation(true);
            }
            cmd_run(config.validate()?, &batch, json).await
        }
        Command::Probe { config } => {
            let config = OrchestratorConfig::load(config.as_deref())?;
            cmd_probe(&config).await
        }
    }
}

async fn cmd_run(config: OrchestratorConfig, batch_path: &Path, json: bool) -> Result<i32> {
    let batch = Batch::load(batch_path)?;
    let total = batch.len();

    let (events, receiver) = EventEmitter::channel();
    let orchestrator = TaskOrchestrator::with_events(config, events);
    let progress = if json {
        ProgressBar::hidden()
    } else {
        progress_bar(total as u64)
    };
    let listener = tokio::spawn(follow_events(receiver, progress.clone()));

    let results = tokio::select! {
        results = orchestrator.process_batch(batch) => results?,
        never = cancel_on_interrupt(&orchestrator, &progress) => match never {},
    };
    progress.finish_and_clear();

    let stats = orchestrator.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("{}", orchestrator.generate_report());
        if stats.failed_tasks == 0 {
            println!(
                "{} {} of {} tasks completed",
                "✓".green().bold(),
                stats.completed_tasks,
                stats.total_tasks
            );
        } else {
            println!(
                "{} {} of {} tasks failed",
                "✗".red().bold(),
                stats.failed_tasks,
                stats.total_tasks
            );
        }
        if stats.degraded_tasks > 0 {
            println!(
                "{} {} tasks received placeholder output",
                "!".yellow().bold(),
                stats.degraded_tasks
            );
        }
    }

    // Closes the event channel so the listener finishes
    drop(orchestrator);
    let _ = listener.await;

    Ok(if stats.failed_tasks == 0 { 0 } else { 1 })
}

async fn cmd_probe(config: &OrchestratorConfig) -> Result<i32> {
    let status = CommandProbe::from_config(config).probe().await;
    if status.authenticated {
        println!(
            "{} {} is available: {}",
            "✓".green().bold(),
            config.command.display(),
            status.message
        );
        Ok(0)
    } else {
        println!(
            "{} {} is not usable: {}",
            "✗".red().bold(),
            config.command.display(),
            status.message
        );
        if status.can_degrade {
            println!("  runs will fall back to placeholder output");
        }
        Ok(1)
    }
}

/// Cancels the batch on Ctrl-C, then waits forever so the batch future
/// decides when the run ends.
async fn cancel_on_interrupt(orchestrator: &TaskOrchestrator, progress: &ProgressBar) -> Infallible {
    if tokio::signal::ctrl_c().await.is_ok() {
        progress.println(format!("{} interrupted, cancelling running tasks", "!".yellow().bold()));
        orchestrator.cancel_all().await;
    }
    std::future::pending().await
}

fn progress_bar(total: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    let bar = ProgressBar::new(total);
    bar.set_style(style);
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

async fn follow_events(mut receiver: mpsc::UnboundedReceiver<TimedEvent>, progress: ProgressBar) {
    while let Some(timed) = receiver.recv().await {
        match timed.event {
            OrchestratorEvent::Progress {
                completed,
                failed,
                total,
            } => {
                progress.set_length(total as u64);
                progress.set_position((completed + failed) as u64);
                if failed > 0 {
                    progress.set_message(format!("{} failed", failed).red().to_string());
                }
            }
            OrchestratorEvent::TaskStart { task_id, attempt } if attempt == 1 => {
                progress.set_message(task_id);
            }
            OrchestratorEvent::TaskRetry {
                task_id,
                attempt,
                error,
                ..
            } => {
                progress.println(format!(
                    "{} {} attempt {} failed: {}",
                    "↻".yellow(),
                    task_id,
                    attempt,
                    error
                ));
            }
            OrchestratorEvent::TaskFailed { task_id, error, .. } => {
                progress.println(format!("{} {}: {}", "✗".red(), task_id, error));
            }
            OrchestratorEvent::ProcessDead { task_id, idle_ms, .. } => {
                progress.println(format!(
                    "{} {} silent for {}s, terminating",
                    "!".yellow(),
                    task_id,
                    idle_ms / 1000
                ));
            }
            _ => {}
        }
    }
}
