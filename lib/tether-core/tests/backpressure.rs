use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    time::{Duration, Instant},
};

use tether_core::pool::{PoolError, WorkerPool, WorkerPoolOptions};
use tokio::{sync::Barrier, task::JoinSet};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_submissions_wait_for_capacity() {
    let pool = WorkerPool::new(2, WorkerPoolOptions::default().with_name("backpressure")).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    for _ in 0..5 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let completed = Arc::clone(&completed);
        pool.submit(async move {
            let now = active.fetch_add(1, SeqCst) + 1;
            peak.fetch_max(now, SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, SeqCst);
            completed.fetch_add(1, SeqCst);
        })
        .await
        .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while completed.load(SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    // Five 10ms units on two workers need three rounds, with both workers busy at once.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "finished too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(250), "finished too late: {:?}", elapsed);
    assert_eq!(peak.load(SeqCst), 2);
    assert!(pool.running() <= 2);

    pool.release_timeout(Duration::from_secs(2)).await.unwrap();
    assert!(matches!(pool.submit(async {}).await, Err(PoolError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nonblocking_pool_sheds_load() {
    let pool = WorkerPool::new(1, WorkerPoolOptions::default().with_nonblocking(true)).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let held = Arc::clone(&barrier);
    pool.submit(async move {
        held.wait().await;
    })
    .await
    .unwrap();

    assert!(matches!(pool.submit(async {}).await, Err(PoolError::Overload)));

    barrier.wait().await;
    pool.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_share_capacity() {
    let pool = WorkerPool::new(3, WorkerPoolOptions::default()).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut submitters = JoinSet::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let completed = Arc::clone(&completed);
        submitters.spawn(async move {
            for _ in 0..4 {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let completed = Arc::clone(&completed);
                pool.submit(async move {
                    let now = active.fetch_add(1, SeqCst) + 1;
                    peak.fetch_max(now, SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, SeqCst);
                    completed.fetch_add(1, SeqCst);
                })
                .await
                .unwrap();
            }
        });
    }
    while let Some(result) = submitters.join_next().await {
        result.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while completed.load(SeqCst) < 32 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert!(peak.load(SeqCst) <= 3);
    assert!(pool.running() <= 3);
    pool.release();
}
