use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave::prelude::*;
use taskweave::{ErrorKind, MemorySink, KeyLookup, Reporter};

fn coordinator() -> Coordinator {
    Coordinator::new(
        Config::builder()
            .workers(2, 8)
            .io_threads(1, 4)
            .build()
            .unwrap(),
    )
    .unwrap()
}

#[test]
fn test_hundred_background_increments() {
    let coordinator = coordinator();
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let counter = counter.clone();
            coordinator
                .submit_background(WorkItem::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        })
        .collect();

    coordinator.wait(&handles, WaitMode::BlockingJoin).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_early_stop_scenario() {
    let coordinator = coordinator();
    let executed = Mutex::new(Vec::new());
    let failures = AtomicUsize::new(0);

    let outcome = coordinator
        .parallel_for_each(
            vec![1, 2, 3, 4, 5],
            |item: i32| {
                executed.lock().push(item);
                if item == 3 {
                    failures.fetch_add(1, Ordering::SeqCst);
                    return Err(format!("item {item} failed"));
                }
                Ok(())
            },
            &LoopOptions::new().observe_loop_state(true),
        )
        .unwrap();

    assert!(!outcome.is_completed());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].message(), "item 3 failed");
    assert_eq!(outcome.lowest_failed_iteration(), Some(2));
    assert!(executed.lock().contains(&3));
}

#[test]
fn test_parallel_for_visits_each_index_once() {
    let coordinator = coordinator();
    for n in [0i64, 1, 7, 1000] {
        let seen: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();
        let outcome = coordinator
            .parallel_for(
                0,
                n,
                |i| {
                    seen[i as usize].fetch_add(1, Ordering::SeqCst);
                },
                &LoopOptions::new(),
            )
            .unwrap();

        assert!(outcome.is_completed(), "n = {n}");
        assert!(seen.iter().all(|count| count.load(Ordering::SeqCst) == 1));
    }
}

#[test]
fn test_canceled_before_start_runs_nothing() {
    let coordinator = coordinator();
    let cancel = CancellationSignal::new();
    cancel.cancel();
    let calls = AtomicUsize::new(0);

    let outcome = coordinator
        .parallel_for_each(
            0..50,
            |_: i32| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            &LoopOptions::new().cancel(cancel),
        )
        .unwrap();

    assert!(!outcome.is_completed());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_exclusive_lock_never_overlaps() {
    let coordinator = coordinator();
    let inside = Arc::new(AtomicI64::new(0));
    let peak = Arc::new(AtomicI64::new(0));

    let (i, p) = (inside.clone(), peak.clone());
    let guarded = Arc::new(coordinator.wrap_with_mutex(
        move |_: ()| {
            let now = i.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_micros(200));
            i.fetch_sub(1, Ordering::SeqCst);
        },
        MutexStrategy::ExclusiveLock,
    ));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let guarded = guarded.clone();
            coordinator
                .run_immediate(WorkItem::new(move || guarded(())), CancellationSignal::new())
                .unwrap()
        })
        .collect();

    coordinator.wait(&handles, WaitMode::CooperativeAwait).unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reconfigure_properties() {
    let coordinator = coordinator();

    for (min, max) in [(0, 0), (0, 1), (1, 1), (2, 16)] {
        let limits = PoolLimits::new(min, max, min, max);
        coordinator.reconfigure_pool(limits).unwrap();
        let state = coordinator.report_pool_state();
        assert_eq!((state.workers.min, state.workers.max), (min, max));
        assert_eq!((state.io.min, state.io.max), (min, max));
    }

    let before = coordinator.pool_limits();
    for bad in [
        PoolLimits::new(3, 2, 0, 1),
        PoolLimits::new(0, 1, 5, 4),
    ] {
        let err = coordinator.reconfigure_pool(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(coordinator.pool_limits(), before);
    }
}

#[test]
fn test_zero_max_rejects_submissions_but_loops_run_inline() {
    let coordinator = coordinator();
    coordinator
        .reconfigure_pool(PoolLimits::new(0, 0, 0, 0))
        .unwrap();

    let result = coordinator.submit_background(WorkItem::new(|| ()));
    assert!(matches!(result, Err(Error::PoolUnavailable(_))));

    let outcome = coordinator
        .parallel_for(0, 10, |_| {}, &LoopOptions::new())
        .unwrap();
    assert!(outcome.is_completed());
}

#[test]
fn test_create_completed_variants() {
    let coordinator = coordinator();

    let ok = coordinator.create_completed(Completed::Succeeded("value"));
    assert!(ok.is_completed_successfully());
    assert_eq!(ok.result(), Some("value"));
    assert!(ok.failure().is_none());

    let failure = Failure::new("broken");
    let faulted: ExecutionHandle<()> =
        coordinator.create_completed(Completed::Faulted(failure.clone()));
    assert_eq!(faulted.status(), TaskStatus::Faulted);
    assert_eq!(faulted.failure(), Some(failure));

    let canceled: ExecutionHandle<()> = coordinator.create_completed(Completed::Canceled);
    assert!(canceled.is_canceled());
}

#[test]
fn test_continuation_chain() {
    let coordinator = coordinator();
    let first = coordinator
        .run_immediate(WorkItem::new(|| 2), CancellationSignal::new())
        .unwrap();

    let second = coordinator.continue_with(
        &first,
        |prev: &ExecutionHandle<i32>, factor: i32| prev.result().unwrap_or_default() * factor,
        10,
        CancellationSignal::new(),
        ContinuationOptions::new().run_on(RunOn::OnlyOnSuccess),
        SchedulerHint::Pool,
    );
    let third = coordinator.continue_with(
        &second,
        |prev: &ExecutionHandle<i32>, _: ()| prev.result().map(|v| v + 1),
        (),
        CancellationSignal::new(),
        ContinuationOptions::new(),
        SchedulerHint::Io,
    );

    assert_eq!(third.join().unwrap(), Some(21));
}

#[test]
fn test_wait_reports_faults_and_cancellation() {
    let coordinator = coordinator();
    let handles = vec![
        coordinator
            .run_immediate(WorkItem::new(|| ()), CancellationSignal::new())
            .unwrap(),
        coordinator
            .run_immediate(
                WorkItem::fallible(|| Err::<(), _>("disk full")),
                CancellationSignal::new(),
            )
            .unwrap(),
    ];

    match coordinator.wait(&handles, WaitMode::BlockingJoin) {
        Err(Error::Aggregate(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].message(), "disk full");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_stop_after_on_handle() {
    let coordinator = coordinator();
    let (tx, rx) = crossbeam_channel::bounded::<()>(0);
    let handle = coordinator
        .run_immediate(
            WorkItem::new(move || {
                let _ = rx.recv();
            }),
            CancellationSignal::new(),
        )
        .unwrap();

    assert!(!handle.stop_after(Duration::from_millis(20)));
    tx.send(()).unwrap();
    assert!(handle.stop_after(Duration::from_secs(5)));
}

#[test]
fn test_reporting_through_custom_sink() {
    let sink = Arc::new(MemorySink::new());
    let coordinator = Coordinator::with_reporter(
        Config::default(),
        Reporter::new(sink.clone(), Arc::new(KeyLookup)),
    )
    .unwrap();

    coordinator.print_pool_state();
    coordinator.describe_thread(&taskweave::current_thread_info());
    let lines = sink.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("pool.workers"));
    assert!(lines[1].starts_with("thread.name"));
}

#[test]
fn test_describe_current_task_inside_work() {
    let sink = Arc::new(MemorySink::new());
    let coordinator = Arc::new(
        Coordinator::with_reporter(
            Config::default(),
            Reporter::new(sink.clone(), Arc::new(KeyLookup)),
        )
        .unwrap(),
    );

    let inner = coordinator.clone();
    let handle = coordinator
        .run_immediate(
            WorkItem::new(move || inner.describe_current_task()),
            CancellationSignal::new(),
        )
        .unwrap();
    handle.wait();

    let lines = sink.lines();
    assert_eq!(lines, vec![format!("task.current: {}", handle.id())]);
}

#[test]
fn test_yield_point_inside_spawned_future() {
    let coordinator = coordinator();
    let handle = coordinator
        .spawn_future(async {
            let mut total = 0;
            for i in 0..10 {
                total += i;
                yield_point().await;
            }
            total
        })
        .unwrap();
    assert_eq!(block_on(handle.completion()).unwrap(), 45);
}
