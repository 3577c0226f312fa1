use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;

/// Which worker pool runs the replayed tasks.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// One thread per task, no queueing.
    Threads,
    /// A fixed pool of `--workers` threads.
    Fixed,
    /// The blocking pool of the replay's own tokio runtime.
    Tokio,
}

/// Command line for the `conseq-replay` binary.
///
/// Generates a stream of events spread over `--keys` sequence keys, submits
/// them in order, and checks that every key saw its events in exactly that
/// order. Every option can also come from the environment or a `.env` file.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "conseq-replay",
    version,
    about = "Replays a keyed event stream through conseq and verifies per-key order"
)]
pub struct CliArgs {
    /// Worker pool to run tasks on.
    ///
    /// Environment variable: `REPLAY_POOL`
    #[arg(long, env = "REPLAY_POOL", value_enum, default_value_t = PoolKind::Fixed)]
    pub pool: PoolKind,

    /// Threads in the fixed pool. Only used with `--pool fixed`.
    ///
    /// Environment variable: `REPLAY_WORKERS`
    #[arg(long, env = "REPLAY_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Number of distinct sequence keys the events are spread over.
    ///
    /// Environment variable: `REPLAY_KEYS`
    #[arg(long, env = "REPLAY_KEYS", default_value_t = 64)]
    pub keys: u32,

    /// Total number of events to replay.
    ///
    /// Environment variable: `REPLAY_EVENTS`
    #[arg(long, env = "REPLAY_EVENTS", default_value_t = 100_000)]
    pub events: u64,

    /// Upper bound on the simulated work per event, in microseconds. Each
    /// event sleeps a uniformly random duration up to this bound.
    ///
    /// Environment variable: `REPLAY_MAX_TASK_MICROS`
    #[arg(long, env = "REPLAY_MAX_TASK_MICROS", default_value_t = 200)]
    pub max_task_micros: u64,

    /// Queue capacity of the fixed pool. Submissions that hit a full queue
    /// are retried. Only valid with `--pool fixed`.
    ///
    /// Environment variable: `REPLAY_QUEUE_CAPACITY`
    #[arg(long, env = "REPLAY_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Probability that an event's task fails. Failures must not disturb the
    /// order of the events behind them.
    ///
    /// Environment variable: `REPLAY_FAILURE_RATE`
    #[arg(long, env = "REPLAY_FAILURE_RATE", default_value_t = 0.01)]
    pub failure_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub pool: PoolKind,
    pub workers: usize,
    pub keys: u32,
    pub events: u64,
    pub max_task: Duration,
    pub queue_capacity: Option<usize>,
    pub failure_rate: f64,
}

impl TryFrom<CliArgs> for ReplayConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.keys == 0 {
            bail!("REPLAY_KEYS must be greater than 0");
        }

        if args.pool == PoolKind::Fixed && args.workers == 0 {
            bail!("REPLAY_WORKERS must be greater than 0");
        }

        if args.queue_capacity.is_some() && args.pool != PoolKind::Fixed {
            bail!(
                "REPLAY_QUEUE_CAPACITY only applies to the fixed pool (got pool {:?})",
                args.pool
            );
        }

        if !(0.0..=1.0).contains(&args.failure_rate) {
            bail!(
                "REPLAY_FAILURE_RATE ({}) must be within [0, 1]",
                args.failure_rate
            );
        }

        Ok(Self {
            pool: args.pool,
            workers: args.workers,
            keys: args.keys,
            events: args.events,
            max_task: Duration::from_micros(args.max_task_micros),
            queue_capacity: args.queue_capacity,
            failure_rate: args.failure_rate,
        })
    }
}
