#![doc = include_str!("../README.md")]

mod config;
mod replay;
mod telemetry;

use clap::Parser;
use config::{CliArgs, ReplayConfig};
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ReplayConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let report = replay::run(&config).await?;
    let throughput = report.submitted as f64 / report.elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        "Replayed {} events in {:?} ({throughput:.0} events/s): {} ok, {} failed, {} abandoned",
        report.submitted,
        report.elapsed,
        report.succeeded,
        report.failed,
        report.abandoned
    );

    if report.lingering_keys > 0 {
        tracing::warn!("{} keys still in the ledger after drain", report.lingering_keys);
    }

    if !report.is_clean() {
        anyhow::bail!(
            "ordering violated: {} out-of-order, {} overlapping, {} abandoned",
            report.out_of_order,
            report.overlapping,
            report.abandoned
        );
    }

    tracing::info!("Every key observed its events in order");
    Ok(())
}

fn log_startup_info(config: &ReplayConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting replay with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting replay of {} events on the {:?} pool",
            config.events,
            config.pool
        );
    }
}
