use std::{
    panic::AssertUnwindSafe,
    sync::{atomic::Ordering::AcqRel, Weak},
    time::Instant,
};

use futures::FutureExt as _;
use tokio::sync::mpsc::{self, error::SendError};
use tracing::{debug, debug_span, Instrument as _};

use super::{queue::Recyclable, PoolInner, WorkUnit};

/// A handle to a live worker.
///
/// A `None` message tells the worker to exit.
#[derive(Clone)]
pub(crate) struct WorkerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Option<WorkUnit>>,
    recycled_at: Instant,
}

impl WorkerHandle {
    /// Hands a unit of work to the worker.
    ///
    /// If the worker is gone, the unit is returned so it can be given to another worker.
    pub fn assign(&self, unit: WorkUnit) -> Result<(), WorkUnit> {
        self.tx.send(Some(unit)).map_err(|SendError(unit)| match unit {
            Some(unit) => unit,
            None => unreachable!("assignment always sends a work unit"),
        })
    }

    /// Signals the worker to exit once it is idle.
    pub fn stop(&self) {
        let _ = self.tx.send(None);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Records when the worker rejoined the idle list.
    pub fn mark_recycled(&mut self, at: Instant) {
        self.recycled_at = at;
    }
}

impl Recyclable for WorkerHandle {
    fn recycled_at(&self) -> Instant {
        self.recycled_at
    }
}

/// Releases the worker's slot in the pool when the worker task ends, however it ends.
struct SlotGuard {
    pool: Weak<PoolInner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.running.fetch_sub(1, AcqRel);
            pool.metrics.running.decrement(1.0);
            pool.available.notify_one();
        }
    }
}

/// Spawns a new worker that immediately runs `unit`.
///
/// The caller must already have reserved a slot by incrementing the pool's running count.
pub(crate) fn spawn_worker(pool: Weak<PoolInner>, pool_name: &str, id: u64, unit: WorkUnit) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WorkerHandle {
        id,
        tx,
        recycled_at: Instant::now(),
    };

    let span = debug_span!("worker", pool_name, worker_id = id);
    tokio::spawn(run_worker(pool, handle, rx, unit).instrument(span));
}

async fn run_worker(
    pool: Weak<PoolInner>, handle: WorkerHandle, mut rx: mpsc::UnboundedReceiver<Option<WorkUnit>>,
    first: WorkUnit,
) {
    let _slot = SlotGuard { pool: pool.clone() };
    let mut unit = first;

    loop {
        if let Err(payload) = AssertUnwindSafe(unit).catch_unwind().await {
            if let Some(inner) = pool.upgrade() {
                inner.handle_panic(handle.id, payload);
            }
            break;
        }

        // Only hold a strong reference to the pool while putting ourselves back on the idle list.
        let reverted = match pool.upgrade() {
            Some(inner) => inner.revert_worker(handle.clone()),
            None => false,
        };
        if !reverted {
            break;
        }

        match rx.recv().await {
            Some(Some(next)) => unit = next,
            _ => break,
        }
    }

    debug!("Worker exiting.");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pool::{WorkerPool, WorkerPoolOptions};

    fn handle(id: u64, recycled_at: Instant) -> WorkerHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        WorkerHandle { id, tx, recycled_at }
    }

    #[tokio::test]
    async fn recycle_time_follows_idle_list_order() {
        let pool = WorkerPool::new(4, WorkerPoolOptions::default().with_disable_purge(true)).unwrap();
        let early = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let late = Instant::now();

        // Handles carry stale timestamps in the opposite order to how they rejoin the idle list.
        assert!(pool.inner.revert_worker(handle(1, late)));
        assert!(pool.inner.revert_worker(handle(2, early)));

        let idle = pool.inner.idle.lock().unwrap().reset();
        assert_eq!(idle.iter().map(WorkerHandle::id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(idle.iter().all(|worker| worker.recycled_at() >= late));
        assert!(idle[0].recycled_at() <= idle[1].recycled_at());
    }
}
