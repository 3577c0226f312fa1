use crate::{
    Error, FixedPool, LifecycleState, RejectReason, SequentialExecutor, TaskError, Terminable,
    ThreadPerTaskPool, WorkerPool,
};
use core::{num::NonZeroUsize, time::Duration};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc, mpsc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};

const PATIENCE: Duration = Duration::from_secs(10);

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// A task body that blocks until the test opens the gate, and reports when
/// it has started.
fn gated() -> (
    impl FnOnce() -> Result<(), ()> + Send + 'static,
    mpsc::Receiver<()>,
    mpsc::Sender<()>,
) {
    let (started_tx, started_rx) = mpsc::channel();
    let (open_tx, open_rx) = mpsc::channel::<()>();
    let task = move || {
        started_tx.send(()).unwrap();
        open_rx.recv_timeout(PATIENCE).unwrap();
        Ok(())
    };
    (task, started_rx, open_tx)
}

#[test]
fn same_key_tasks_run_in_submission_order() {
    let executor = SequentialExecutor::with_concurrency(8).unwrap();
    let log = Arc::new(Mutex::new(HashMap::<u32, Vec<u32>>::new()));

    let mut handles = Vec::new();
    for seq in 0..200 {
        for key in 0..5 {
            let log = Arc::clone(&log);
            handles.push(
                executor
                    .submit(key, move || {
                        log.lock().entry(key).or_default().push(seq);
                        Ok::<_, ()>(())
                    })
                    .unwrap(),
            );
        }
    }
    for handle in handles {
        handle.wait().unwrap();
    }

    let log = log.lock();
    for key in 0..5_u32 {
        assert_eq!(log[&key], (0..200).collect::<Vec<_>>(), "key {key}");
    }
}

#[test]
fn cart_events_apply_in_order_without_overlap() {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Size {
        Medium,
        Large,
    }

    let executor = SequentialExecutor::with_concurrency(4).unwrap();
    let current = Arc::new(Mutex::new(None));
    let ticket = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(false));
    let spans = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..100 {
        let size = if i % 2 == 0 { Size::Large } else { Size::Medium };
        let current = Arc::clone(&current);
        let ticket = Arc::clone(&ticket);
        let running = Arc::clone(&running);
        let spans = Arc::clone(&spans);
        handles.push(
            executor
                .submit("cart-42", move || {
                    assert!(!running.swap(true, Ordering::SeqCst), "overlapping tasks");
                    let start = Instant::now();
                    let taken = ticket.fetch_add(1, Ordering::SeqCst);
                    *current.lock() = Some(size);
                    thread::sleep(Duration::from_micros(50));
                    spans.lock().push((taken, start, Instant::now()));
                    running.store(false, Ordering::SeqCst);
                    Ok::<_, ()>(taken)
                })
                .unwrap(),
        );
    }

    let tickets: Vec<u64> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
    assert_eq!(tickets, (0..100).collect::<Vec<_>>());
    assert_eq!(*current.lock(), Some(Size::Medium));

    let spans = spans.lock();
    for pair in spans.windows(2) {
        let (_, _, prev_end) = pair[0];
        let (_, next_start, _) = pair[1];
        assert!(next_start >= prev_end);
    }
}

#[test]
fn different_keys_run_concurrently() {
    let executor = SequentialExecutor::with_concurrency(2).unwrap();
    let arrived = Arc::new(AtomicUsize::new(0));

    let rendezvous = |arrived: Arc<AtomicUsize>| {
        move || {
            arrived.fetch_add(1, Ordering::SeqCst);
            // Both keys must be running at once for this to return true.
            Ok::<_, ()>(wait_until(|| arrived.load(Ordering::SeqCst) == 2))
        }
    };
    let a = executor
        .submit("a", rendezvous(Arc::clone(&arrived)))
        .unwrap();
    let b = executor
        .submit("b", rendezvous(Arc::clone(&arrived)))
        .unwrap();
    assert_eq!(a.wait(), Ok(true));
    assert_eq!(b.wait(), Ok(true));
}

#[test]
fn single_worker_with_two_keys_does_not_deadlock() {
    let executor = SequentialExecutor::with_concurrency(1).unwrap();
    let mut handles = Vec::new();
    for i in 0..50_u32 {
        let key = if i % 2 == 0 { "even" } else { "odd" };
        handles.push(executor.submit(key, move || Ok::<_, ()>(i)).unwrap());
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.wait_timeout(PATIENCE).expect("task finished");
        assert_eq!(outcome, Ok(i as u32));
    }
}

#[test]
fn failure_and_panic_do_not_block_successors() {
    let executor = SequentialExecutor::<&str>::new().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let failing = {
        let order = Arc::clone(&order);
        executor
            .submit("k", move || {
                order.lock().push("fail");
                Err::<(), _>("bad input")
            })
            .unwrap()
    };
    let panicking = {
        let order = Arc::clone(&order);
        executor
            .submit("k", move || -> Result<(), &'static str> {
                order.lock().push("panic");
                panic!("task blew up");
            })
            .unwrap()
    };
    let succeeding = {
        let order = Arc::clone(&order);
        executor
            .submit("k", move || {
                order.lock().push("ok");
                Ok::<_, &str>(42)
            })
            .unwrap()
    };

    assert_eq!(failing.wait(), Err(TaskError::Failed("bad input")));
    assert_eq!(
        panicking.wait(),
        Err(TaskError::Panicked(String::from("task blew up")))
    );
    assert_eq!(succeeding.wait(), Ok(42));
    assert_eq!(*order.lock(), ["fail", "panic", "ok"]);
}

#[test]
fn cancelling_a_handle_does_not_let_successor_overtake() {
    let executor = SequentialExecutor::with_concurrency(4).unwrap();
    let first_done = Arc::new(AtomicBool::new(false));

    let (body, started, open) = gated();
    let first = {
        let first_done = Arc::clone(&first_done);
        executor
            .submit(1_u8, move || {
                body()?;
                first_done.store(true, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .unwrap()
    };
    let second = {
        let first_done = Arc::clone(&first_done);
        executor
            .submit(1_u8, move || Ok::<_, ()>(first_done.load(Ordering::SeqCst)))
            .unwrap()
    };

    started.recv_timeout(PATIENCE).unwrap();
    assert!(first.cancel());
    assert_eq!(first.wait(), Err(TaskError::Cancelled));

    // The successor is still parked behind the running task.
    thread::sleep(Duration::from_millis(20));
    assert!(!second.is_done());

    open.send(()).unwrap();
    assert_eq!(second.wait(), Ok(true));
}

#[test]
fn cancelling_a_queued_handle_still_runs_the_task() {
    let executor = SequentialExecutor::with_concurrency(1).unwrap();
    let ran = Arc::new(AtomicBool::new(false));

    let (body, started, open) = gated();
    let blocker = executor.submit("k", body).unwrap();
    let queued = {
        let ran = Arc::clone(&ran);
        executor
            .submit("k", move || {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .unwrap()
    };
    started.recv_timeout(PATIENCE).unwrap();
    assert!(queued.cancel());

    open.send(()).unwrap();
    blocker.wait().unwrap();
    executor.close();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn idle_keys_are_reclaimed() {
    let executor = SequentialExecutor::with_concurrency(4).unwrap();
    let handles: Vec<_> = (0..10_u32)
        .flat_map(|key| (0..5).map(move |i| (key, i)))
        .map(|(key, i)| executor.submit(key, move || Ok::<_, ()>(i)).unwrap())
        .collect();
    assert!(executor.active_keys() > 0);
    for handle in handles {
        handle.wait().unwrap();
    }
    assert!(wait_until(|| executor.active_keys() == 0));
    assert!(!executor.is_active(&3));
    assert!(executor.is_idle());
}

#[test]
fn concurrent_submitters_keep_their_own_order() {
    const SUBMITTERS: usize = 4;
    const PER_SUBMITTER: usize = 500;
    const KEYS: usize = 3;

    let executor = SequentialExecutor::with_concurrency(4).unwrap();
    let log = Arc::new(Mutex::new(HashMap::<usize, Vec<(usize, usize)>>::new()));
    let running: Arc<Vec<AtomicBool>> = Arc::new((0..KEYS).map(|_| AtomicBool::new(false)).collect());

    thread::scope(|s| {
        for submitter in 0..SUBMITTERS {
            let executor = &executor;
            let log = Arc::clone(&log);
            let running = Arc::clone(&running);
            s.spawn(move || {
                let mut handles = Vec::new();
                for seq in 0..PER_SUBMITTER {
                    let key = seq % KEYS;
                    let log = Arc::clone(&log);
                    let running = Arc::clone(&running);
                    handles.push(
                        executor
                            .submit(key, move || {
                                assert!(!running[key].swap(true, Ordering::SeqCst));
                                log.lock().entry(key).or_default().push((submitter, seq));
                                running[key].store(false, Ordering::SeqCst);
                                Ok::<_, ()>(())
                            })
                            .unwrap(),
                    );
                }
                for handle in handles {
                    handle.wait().unwrap();
                }
            });
        }
    });

    let log = log.lock();
    let total: usize = log.values().map(Vec::len).sum();
    assert_eq!(total, SUBMITTERS * PER_SUBMITTER);
    for entries in log.values() {
        for submitter in 0..SUBMITTERS {
            let seqs: Vec<usize> = entries
                .iter()
                .filter(|(s, _)| *s == submitter)
                .map(|(_, seq)| *seq)
                .collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
    }
    assert!(wait_until(|| executor.active_keys() == 0));
}

#[test]
fn shutdown_refuses_new_work_but_drains_chains() {
    let executor = SequentialExecutor::with_concurrency(2).unwrap();
    let (body, started, open) = gated();
    let first = executor.submit("k", body).unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    let chained: Vec<_> = (0..10)
        .map(|i| executor.submit("k", move || Ok::<_, ()>(i)).unwrap())
        .collect();

    executor.shutdown();
    executor.shutdown();
    assert_eq!(executor.state(), LifecycleState::ShuttingDown);
    assert_eq!(
        executor.submit("k", || Ok::<_, ()>(99)).unwrap_err(),
        Error::Shutdown
    );
    assert_eq!(
        executor.submit("other", || Ok::<_, ()>(99)).unwrap_err(),
        Error::Shutdown
    );
    assert!(!executor.is_idle());

    open.send(()).unwrap();
    assert_eq!(first.wait(), Ok(()));
    for (i, handle) in chained.into_iter().enumerate() {
        assert_eq!(handle.wait(), Ok(i));
    }
    assert!(executor.await_termination(PATIENCE));
    assert_eq!(executor.state(), LifecycleState::Terminated);
}

#[test]
fn terminate_now_abandons_unstarted_work() {
    let executor = SequentialExecutor::with_concurrency(1).unwrap();
    let (body, started, open) = gated();
    let running = executor.submit("a", body).unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    // Queued in the pool behind the busy worker.
    let queued_b = executor.submit("b", || Ok::<_, ()>(())).unwrap();
    let queued_c = executor.submit("c", || Ok::<_, ()>(())).unwrap();
    // Parked behind the running task, never reached the pool.
    let parked = executor.submit("a", || Ok::<_, ()>(())).unwrap();

    let unstarted = executor.terminate_now();
    assert_eq!(unstarted.len(), 2);
    assert_eq!(executor.active_keys(), 0);
    assert_eq!(
        executor.submit("d", || Ok::<_, ()>(())).unwrap_err(),
        Error::Shutdown
    );

    drop(unstarted);
    assert_eq!(queued_b.wait(), Err(TaskError::Abandoned));
    assert_eq!(queued_c.wait(), Err(TaskError::Abandoned));

    open.send(()).unwrap();
    assert_eq!(running.wait(), Ok(()));
    assert_eq!(parked.wait(), Err(TaskError::Abandoned));
    assert!(executor.await_termination(PATIENCE));
}

#[test]
fn full_queue_rejects_without_touching_ledger() {
    let executor = SequentialExecutor::builder()
        .worker_concurrency(1)
        .queue_capacity(1)
        .build()
        .unwrap();
    let (body, started, open) = gated();
    let blocker = executor.submit("a", body).unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    let queued = executor.submit("b", || Ok::<_, ()>(1)).unwrap();
    let err = executor.submit("c", || Ok::<_, ()>(2)).unwrap_err();
    assert_eq!(
        err,
        Error::Rejected {
            reason: RejectReason::Saturated { capacity: 1 }
        }
    );
    assert!(!executor.is_active(&"c"));

    // Chaining behind a running task never touches the pool queue.
    let parked = executor.submit("a", || Ok::<_, ()>(3)).unwrap();

    open.send(()).unwrap();
    blocker.wait().unwrap();
    assert_eq!(queued.wait(), Ok(1));
    assert_eq!(parked.wait(), Ok(3));
}

#[test]
fn saturated_successor_runs_on_the_settling_worker() {
    let executor = SequentialExecutor::builder()
        .worker_concurrency(1)
        .queue_capacity(1)
        .thread_name("caller-runs")
        .build()
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (body, started, open) = gated();
    let blocker = executor
        .submit("a", move || {
            body()?;
            Ok::<_, ()>(thread::current().id())
        })
        .unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    // Takes the only queue slot while the worker is busy.
    let queued = {
        let log = Arc::clone(&log);
        executor
            .submit("b", move || {
                log.lock().push("b");
                Ok::<_, ()>(())
            })
            .unwrap()
    };
    let parked = {
        let log = Arc::clone(&log);
        executor
            .submit("a", move || {
                log.lock().push("a");
                Ok::<_, ()>(thread::current().id())
            })
            .unwrap()
    };

    // The queue is still full when the blocker settles, so its successor
    // runs right there on the worker before "b" is dequeued.
    open.send(()).unwrap();
    let worker = blocker.wait().unwrap();
    assert_eq!(parked.wait(), Ok(worker));
    assert_eq!(queued.wait(), Ok(()));
    assert_eq!(*log.lock(), ["a", "b"]);
}

#[test]
fn caller_timeout_does_not_disturb_the_chain() {
    let executor = SequentialExecutor::with_concurrency(2).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (body, started, open) = gated();
    let first = {
        let log = Arc::clone(&log);
        executor
            .submit("k", move || {
                body()?;
                log.lock().push("first");
                Ok::<_, ()>(1)
            })
            .unwrap()
    };
    let second = {
        let log = Arc::clone(&log);
        executor
            .submit("k", move || {
                log.lock().push("second");
                Ok::<_, ()>(2)
            })
            .unwrap()
    };
    started.recv_timeout(PATIENCE).unwrap();

    let first = first
        .wait_timeout(Duration::from_millis(20))
        .expect_err("first task is still gated");
    assert!(!second.is_done());

    open.send(()).unwrap();
    assert_eq!(second.wait_timeout(Duration::MAX).ok(), Some(Ok(2)));
    assert_eq!(first.wait(), Ok(1));
    assert_eq!(*log.lock(), ["first", "second"]);

    executor.shutdown();
    assert!(executor.await_termination(Duration::MAX));
}

#[test]
fn caller_supplied_pool_is_closed_on_termination() {
    let pool = Arc::new(FixedPool::new(NonZeroUsize::new(2).unwrap(), "external").unwrap());
    let executor =
        SequentialExecutor::with_pool(Arc::clone(&pool) as Arc<dyn WorkerPool>).unwrap();
    let name = executor
        .submit(0_u8, || {
            Ok::<_, ()>(thread::current().name().map(str::to_owned))
        })
        .unwrap()
        .wait()
        .unwrap();
    assert!(name.unwrap().starts_with("external-"));

    executor.close();
    assert!(pool.is_shutdown());
    assert!(wait_until(|| pool.is_terminated()));
}

#[test]
fn thread_per_task_workers_are_named() {
    let executor = SequentialExecutor::builder()
        .thread_name("orders")
        .build()
        .unwrap();
    let name = executor
        .submit(1_u64, || Ok::<_, ()>(thread::current().name().map(str::to_owned)))
        .unwrap()
        .wait()
        .unwrap();
    assert!(name.unwrap().starts_with("orders-worker-"));
}

#[test]
fn execute_runs_fire_and_forget_actions() {
    let executor = SequentialExecutor::with_pool(Arc::new(ThreadPerTaskPool::new("ff"))).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let hits = Arc::clone(&hits);
        let _ = executor.execute("k", move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    executor.close();
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
fn dropping_executor_lets_admitted_work_finish() {
    let executor = SequentialExecutor::with_concurrency(2).unwrap();
    let (body, started, open) = gated();
    let first = executor.submit("k", body).unwrap();
    let second = executor.submit("k", || Ok::<_, ()>(7)).unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    drop(executor);
    open.send(()).unwrap();
    assert_eq!(first.wait(), Ok(()));
    assert_eq!(second.wait(), Ok(7));
}

#[test]
fn fresh_executor_is_idle_and_terminates_promptly() {
    let executor = SequentialExecutor::<String>::new().unwrap();
    assert!(executor.is_idle());
    assert_eq!(executor.state(), LifecycleState::Running);
    executor.shutdown();
    assert!(executor.await_termination(PATIENCE));
    assert_eq!(executor.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn handles_can_be_awaited() {
    let executor = SequentialExecutor::with_concurrency(2).unwrap();
    let first = executor
        .submit("k", || {
            thread::sleep(Duration::from_millis(5));
            Ok::<_, ()>("first")
        })
        .unwrap();
    let second = executor.submit("k", || Ok::<_, ()>("second")).unwrap();
    assert_eq!(first.await, Ok("first"));
    assert_eq!(second.await, Ok("second"));
}

#[cfg(feature = "async-tokio")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runs_on_tokio_blocking_pool() {
    use crate::TokioPool;

    let executor =
        SequentialExecutor::with_pool(Arc::new(TokioPool::current().unwrap())).unwrap();
    let handles: Vec<_> = (0..20_u32)
        .map(|i| executor.submit(i % 3, move || Ok::<_, ()>(i)).unwrap())
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await, Ok(i as u32));
    }
}
