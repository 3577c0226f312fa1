//! Log output for the replay binary.
//!
//! Everything goes through `tracing`; the subscriber prints to stdout with
//! RFC 3339 local timestamps. Verbosity comes from `RUST_LOG` and defaults to
//! `info`. Use `RUST_LOG=conseq=trace` to watch chains being reclaimed.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .try_init()?;
    Ok(())
}
