//! Drives a synthetic keyed event stream through an executor.

use crate::config::{PoolKind, ReplayConfig};
use conseq::{Error, RejectReason, ResultHandle, SequentialExecutor, TaskError, TokioPool};
use futures::future::join_all;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use rand::Rng;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Upper bound on handle slots reserved up front; larger runs grow as they go.
const MAX_PREALLOCATED_HANDLES: u64 = 1 << 20;

fn preallocated(events: u64) -> usize {
    usize::try_from(events.min(MAX_PREALLOCATED_HANDLES)).unwrap_or_default()
}

/// Per-key bookkeeping shared by every task of the replay.
struct Tracker {
    /// Next sequence number each key expects to observe.
    expected: Vec<AtomicU64>,
    /// Set while a task for the key is running.
    running: Vec<AtomicBool>,
    out_of_order: AtomicUsize,
    overlapping: AtomicUsize,
}

impl Tracker {
    fn new(keys: u32) -> Self {
        Self {
            expected: (0..keys).map(|_| AtomicU64::new(0)).collect(),
            running: (0..keys).map(|_| AtomicBool::new(false)).collect(),
            out_of_order: AtomicUsize::new(0),
            overlapping: AtomicUsize::new(0),
        }
    }

    fn observe(&self, key: u32, seq: u64, work: Duration) {
        let k = key as usize;
        if self.running[k].swap(true, Ordering::SeqCst) {
            self.overlapping.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Key {key}: event {seq} started while another was running");
        }
        let previous = self.expected[k].swap(seq + 1, Ordering::SeqCst);
        if previous != seq {
            self.out_of_order.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Key {key}: expected event {previous}, observed {seq}");
        }
        if !work.is_zero() {
            thread::sleep(work);
        }
        self.running[k].store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub retries: u64,
    pub out_of_order: usize,
    pub overlapping: usize,
    pub lingering_keys: usize,
    pub elapsed: Duration,
}

impl ReplayReport {
    pub const fn is_clean(&self) -> bool {
        self.out_of_order == 0 && self.overlapping == 0 && self.abandoned == 0
    }
}

pub async fn run(config: &ReplayConfig) -> anyhow::Result<ReplayReport> {
    let executor = build_executor(config)?;
    let tracker = Arc::new(Tracker::new(config.keys));
    let mut next_seq = vec![0_u64; config.keys as usize];
    let mut rng = rand::rng();
    let mut report = ReplayReport::default();
    let mut handles: Vec<ResultHandle<(), String>> =
        Vec::with_capacity(preallocated(config.events));
    let max_micros = config.max_task.as_micros() as u64;

    let started = Instant::now();
    for _ in 0..config.events {
        let key = rng.random_range(0..config.keys);
        let seq = next_seq[key as usize];
        next_seq[key as usize] += 1;
        let work = Duration::from_micros(rng.random_range(0..=max_micros));
        let fails = rng.random_bool(config.failure_rate);

        loop {
            let tracker = Arc::clone(&tracker);
            let submitted = executor.submit(key, move || {
                tracker.observe(key, seq, work);
                if fails {
                    Err(format!("simulated failure for key {key} event {seq}"))
                } else {
                    Ok(())
                }
            });
            match submitted {
                Ok(handle) => {
                    handles.push(handle);
                    break;
                }
                // Nothing was enqueued, so resubmitting keeps the key's order.
                Err(Error::Rejected {
                    reason: RejectReason::Saturated { .. },
                }) => {
                    report.retries += 1;
                    tokio::time::sleep(Duration::from_micros(50)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        report.submitted += 1;
    }
    tracing::info!(
        "Submitted {} events over {} keys ({} retries)",
        report.submitted,
        config.keys,
        report.retries
    );

    for outcome in join_all(handles).await {
        match outcome {
            Ok(()) => report.succeeded += 1,
            Err(TaskError::Failed(_)) => report.failed += 1,
            Err(TaskError::Panicked(msg)) => {
                tracing::error!("Task panicked: {msg}");
                report.failed += 1;
            }
            Err(TaskError::Abandoned | TaskError::Cancelled) => report.abandoned += 1,
        }
    }
    report.elapsed = started.elapsed();

    // Reclaim runs asynchronously after the last task settles.
    for _ in 0..1000 {
        if executor.active_keys() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    report.lingering_keys = executor.active_keys();

    tokio::task::spawn_blocking(move || executor.close()).await?;

    report.out_of_order = tracker.out_of_order.load(Ordering::SeqCst);
    report.overlapping = tracker.overlapping.load(Ordering::SeqCst);
    Ok(report)
}

fn build_executor(config: &ReplayConfig) -> anyhow::Result<SequentialExecutor<u32>> {
    let builder = SequentialExecutor::builder().thread_name("replay");
    let builder = match config.pool {
        PoolKind::Threads => builder,
        PoolKind::Fixed => {
            let builder = builder.worker_concurrency(config.workers);
            match config.queue_capacity {
                Some(capacity) => builder.queue_capacity(capacity),
                None => builder,
            }
        }
        PoolKind::Tokio => builder.worker_pool(Arc::new(TokioPool::current()?)),
    };
    Ok(builder.build()?)
}
