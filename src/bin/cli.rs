//! Kiosk calendar mirror CLI
//!
//! `serve` runs the schedule until interrupted; the other commands are for
//! one-off runs and checking a deployment's configuration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use kiosk::{
    config::Settings,
    error::{AppError, Result},
    pipeline::{RunOutcome, Scheduler, TaskRunner, build_heartbeat},
    renderer::{Renderer, build_renderer},
    services::PageFetcher,
    storage::build_publisher,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Kiosk - calendar page mirror for unattended displays
#[derive(Parser, Debug)]
#[command(name = "kiosk", version, about = "Mirrors calendar pages for kiosk screens")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "kiosk.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the schedule until interrupted
    Serve,

    /// Run the pipeline once for the given locations
    Run {
        /// Location ids
        #[arg(required = true)]
        locations: Vec<String>,
    },

    /// Validate configuration, rules and environment
    Validate,

    /// Print upcoming firings per schedule entry
    Schedule {
        /// Firings to show per entry
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
}

/// Initialize tracing; `RUST_LOG` overrides the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<bool> {
    let settings = Settings::load(&cli.config)?;
    info!(
        "Loaded {} locations from {}",
        settings.config.locations.len(),
        cli.config.display()
    );

    match cli.command {
        Command::Serve => {
            let (renderer, runner) = build_runner(&settings).await?;
            let mut scheduler = Scheduler::new(runner, build_heartbeat(&settings)?)
                .with_leak_threshold(settings.config.schedule.leak_warn_threshold);
            for entry in settings.schedule.iter().cloned() {
                scheduler.register(entry);
            }

            tokio::select! {
                result = scheduler.run() => result?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
            }

            renderer.shutdown().await?;
            Ok(true)
        }

        Command::Run { locations } => {
            let targets = locations
                .iter()
                .map(|id| {
                    let location = settings
                        .config
                        .location(id)
                        .ok_or_else(|| AppError::config(format!("Unknown location '{id}'")))?;
                    settings.config.site.target(location)
                })
                .collect::<Result<Vec<_>>>()?;

            let (renderer, runner) = build_runner(&settings).await?;
            let reports = join_all(targets.iter().map(|t| runner.run(t))).await;
            renderer.shutdown().await?;

            for report in &reports {
                match &report.outcome {
                    RunOutcome::Published(receipt) => info!(
                        "{}: published {} bytes to {} in {:?}",
                        report.location, receipt.bytes, receipt.location, report.elapsed
                    ),
                    RunOutcome::Failed { phase, error } => {
                        warn!("{}: failed while {}: {}", report.location, phase, error)
                    }
                }
            }
            Ok(reports.iter().all(|r| r.succeeded()))
        }

        Command::Validate => {
            info!(
                "Configuration OK: {} locations, {} rules, {} schedule entries, sink {:?}",
                settings.config.locations.len(),
                settings.rules.len(),
                settings.schedule.len(),
                settings.config.publisher.sink
            );
            if settings.heartbeat_url().is_none() {
                info!("No heartbeat URL configured");
            }
            Ok(true)
        }

        Command::Schedule { count } => {
            let now = Utc::now();
            for entry in &settings.schedule {
                let ids: Vec<&str> = entry.targets.iter().map(|t| t.id()).collect();
                println!(
                    "{} [{}] -> {}",
                    entry.job_name,
                    entry.cadence.expression(),
                    ids.join(", ")
                );
                for tick in entry.cadence.upcoming(&now, count) {
                    println!("    {}", tick.to_rfc3339());
                }
            }
            Ok(true)
        }
    }
}

async fn build_runner(settings: &Settings) -> Result<(Arc<dyn Renderer>, Arc<TaskRunner>)> {
    let renderer = build_renderer(&settings.config.fetcher)?;
    let publisher = build_publisher(&settings.config.publisher, &settings.environment).await?;
    info!(
        "Rendering with {}, publishing to {}",
        renderer.name(),
        publisher.describe()
    );

    let runner = TaskRunner::new(
        Arc::clone(&renderer),
        publisher,
        settings.rules.clone(),
        PageFetcher::from_config(&settings.config.fetcher),
        settings.config.publisher.clone(),
    );
    Ok((renderer, Arc::new(runner)))
}
