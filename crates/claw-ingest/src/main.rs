//! claw-ingest - Clawbernetes metrics ingest agent
//!
//! Scrapes Prometheus targets on an interval and pushes the samples to a
//! remote-write backend, optionally running the OTLP tenant proxy alongside.

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use claw_ingest::{IngestArgs, IngestConfig, OtlpProxy, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_FILTER: &str = "claw_ingest=info,claw_remote_write=info";

#[derive(Parser)]
#[command(name = "claw-ingest")]
#[command(about = "Clawbernetes metrics ingest agent")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape and push until interrupted
    Run(IngestArgs),

    /// Scrape every target once and print the series without pushing
    Scrape(IngestArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run(args) => run(args.into_config()?).await,
        Commands::Scrape(args) => scrape_once(args.into_config()?).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run(config: IngestConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Bind before the first scrape so a taken port fails startup.
    let proxy = match &config.proxy {
        Some(proxy_config) => Some(OtlpProxy::bind(proxy_config, &config.tenant_id).await?),
        None => None,
    };
    let scheduler = Scheduler::new(config)?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    // A failing proxy cancels `shutdown`, which ends the scheduler after its
    // current cycle.
    let proxy_task = proxy.map(|p| p.spawn(shutdown.clone()));

    scheduler.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(task) = proxy_task {
        task.await??;
    }
    Ok(())
}

async fn scrape_once(config: IngestConfig) -> anyhow::Result<()> {
    let timestamp_ms = Utc::now().timestamp_millis();
    let scheduler = Scheduler::new(config)?;

    for target in &scheduler.config().targets {
        let collected = scheduler.collect(target, timestamp_ms).await?;
        println!(
            "{} ({}): {} samples, {} series",
            target.name,
            target.url,
            collected.samples,
            collected.request.timeseries.len()
        );
        for series in &collected.request.timeseries {
            let labels: Vec<String> = series
                .labels
                .iter()
                .map(|l| format!("{}={:?}", l.name, l.value))
                .collect();
            println!("  {{{}}} x{}", labels.join(","), series.samples.len());
        }
    }
    Ok(())
}
