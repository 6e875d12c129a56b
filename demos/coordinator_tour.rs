//! A walk through the coordinator: background work, loops, continuations,
//! timers and pool reporting.
//!
//! Run with `RUST_LOG=taskweave=debug cargo run --example coordinator_tour`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> taskweave::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let coordinator = Coordinator::new(
        Config::builder()
            .workers(2, 8)
            .io_threads(1, 4)
            .build()?,
    )?;

    println!("=== Background work ===\n");
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let counter = counter.clone();
            coordinator.submit_background(WorkItem::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }))
        })
        .collect::<taskweave::Result<_>>()?;
    coordinator.wait(&handles, WaitMode::BlockingJoin)?;
    println!("Increments: {}", counter.load(Ordering::Relaxed));

    println!("\n=== Parallel loops ===\n");
    let sum = AtomicUsize::new(0);
    coordinator.parallel_for(
        0,
        1000,
        |i| {
            sum.fetch_add(i as usize, Ordering::Relaxed);
        },
        &LoopOptions::new(),
    )?;
    println!("Sum of 0..1000: {}", sum.load(Ordering::Relaxed));

    let outcome = coordinator.parallel_for_each(
        vec![1, 2, 3, 4, 5],
        |item: i32| {
            if item == 3 {
                return Err(format!("item {item} rejected"));
            }
            Ok(())
        },
        &LoopOptions::new().observe_loop_state(true),
    )?;
    println!(
        "Early stop: completed={} lowest failed iteration={:?}",
        outcome.is_completed(),
        outcome.lowest_failed_iteration()
    );

    let squares = coordinator
        .parallel_query(0..20, CancellationSignal::new(), true)
        .filter(|x| x % 2 == 0)
        .map(|x| x * x)
        .collect()?;
    println!("Even squares: {:?}", squares);

    println!("\n=== Continuations ===\n");
    let first = coordinator.run_immediate(WorkItem::new(|| 2), CancellationSignal::new())?;
    let second = coordinator.continue_with(
        &first,
        |prev: &ExecutionHandle<i32>, factor: i32| prev.result().unwrap_or_default() * factor,
        21,
        CancellationSignal::new(),
        ContinuationOptions::new().run_on(RunOn::OnlyOnSuccess),
        SchedulerHint::Pool,
    );
    println!("2 * 21 = {}", second.join()?);

    println!("\n=== Mutual exclusion ===\n");
    let shared = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = shared.clone();
    let push = Arc::new(coordinator.wrap_with_mutex(
        move |n: usize| s.lock().push(n),
        MutexStrategy::CountingPermit,
    ));
    coordinator.parallel_for(0, 10, |i| push(i as usize), &LoopOptions::new())?;
    println!("Pushed {} values under a counting permit", shared.lock().len());

    println!("\n=== Timers ===\n");
    let ticks = Arc::new(AtomicUsize::new(0));
    let timer = coordinator.start_timer(
        Duration::from_millis(10),
        |ticks: &Arc<AtomicUsize>| ticks.load(Ordering::SeqCst) < 5,
        |ticks: &Arc<AtomicUsize>| {
            ticks.fetch_add(1, Ordering::SeqCst);
        },
        ticks.clone(),
        CancellationSignal::new(),
    )?;
    println!("Timer finished: {}", timer.wait());
    block_on(coordinator.delay(Duration::from_millis(5)));

    println!("\n=== Pool state ===\n");
    coordinator.print_pool_state();
    coordinator.describe_thread(&taskweave::current_thread_info());

    coordinator.shutdown();
    println!("\n=== Tour Complete ===");
    Ok(())
}
