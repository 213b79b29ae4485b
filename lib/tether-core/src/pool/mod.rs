//! Bounded pool of reusable workers.
//!
//! A [`WorkerPool`] runs submitted futures on a capped number of long-lived Tokio tasks ("workers"). When a unit of work
//! is submitted, an idle worker is reused if one exists; otherwise a new worker is spawned as long as the pool is below
//! capacity. Once the pool is at capacity, callers either wait for a worker to free up or are rejected, depending on
//! configuration.
//!
//! Idle workers are kept in an idle list ordered by the time they were last recycled. A background scavenger runs at a
//! fixed interval and evicts workers that have been idle for longer than the configured expiry, so a pool that sees no
//! traffic eventually holds no workers at all.

use std::{
    any::Any,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{
            AtomicBool, AtomicIsize, AtomicU64, AtomicUsize,
            Ordering::{AcqRel, Acquire, Relaxed, Release},
        },
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use metrics::{counter, gauge, Counter, Gauge};
use snafu::Snafu;
use tether_error::panic_message;
use tokio::{
    select,
    sync::{futures::Notified, Notify},
    time::{interval_at, sleep, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, Instrument as _};

mod config;
pub use self::config::WorkerPoolConfiguration;

pub mod global;
pub use self::global::{default_pool, DEFAULT_WORKER_POOL_SIZE};

mod options;
pub use self::options::{PanicHandler, WorkerPoolOptions, DEFAULT_CLEAN_INTERVAL};

mod queue;
use self::queue::{LoopQueue, WorkerQueue, WorkerStack};

mod worker;
use self::worker::WorkerHandle;

/// A unit of work executed by a worker.
pub type WorkUnit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker pool errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PoolError {
    /// The pool has been released and accepts no new work.
    #[snafu(display("Worker pool has been closed."))]
    Closed,

    /// No worker was available, and the caller was not allowed to wait for one.
    #[snafu(display("Worker pool is overloaded."))]
    Overload,

    /// The configured idle expiry was negative.
    #[snafu(display("Invalid worker expiry of {}ms; expiry must not be negative.", expiry_ms))]
    InvalidExpiry {
        /// The rejected expiry, in milliseconds.
        expiry_ms: i64,
    },

    /// Preallocation was requested for an unbounded pool.
    #[snafu(display("Cannot preallocate the idle list of an unbounded worker pool."))]
    InvalidPreallocSize,

    /// Workers did not exit before the release deadline.
    #[snafu(display("Timed out waiting for worker pool to release all workers."))]
    Timeout,
}

struct PoolMetrics {
    spawned: Counter,
    evicted: Counter,
    rejected: Counter,
    panicked: Counter,
    running: Gauge,
}

impl PoolMetrics {
    fn new(pool_name: &str) -> Self {
        let pool_name = pool_name.to_string();
        Self {
            spawned: counter!("worker_pool_workers_spawned_total", "pool_name" => pool_name.clone()),
            evicted: counter!("worker_pool_workers_evicted_total", "pool_name" => pool_name.clone()),
            rejected: counter!("worker_pool_submissions_rejected_total", "pool_name" => pool_name.clone()),
            panicked: counter!("worker_pool_worker_panics_total", "pool_name" => pool_name.clone()),
            running: gauge!("worker_pool_running_workers", "pool_name" => pool_name),
        }
    }
}

struct ScavengerHandle {
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

/// Outcome of one attempt to acquire a worker.
enum Step<'a> {
    /// An idle worker was detached from the idle list.
    Idle(WorkerHandle),

    /// A slot was reserved for a new worker.
    Spawn,

    /// The caller must wait to be notified, then try again.
    Park(Pin<Box<Notified<'a>>>, WaitingGuard<'a>),
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AcqRel);
    }
}

pub(crate) struct PoolInner {
    capacity: AtomicIsize,
    running: AtomicUsize,
    waiting: AtomicUsize,
    closed: AtomicBool,
    next_worker_id: AtomicU64,
    idle: Mutex<Box<dyn WorkerQueue<WorkerHandle>>>,
    available: Notify,
    scavenger: Mutex<Option<ScavengerHandle>>,
    options: WorkerPoolOptions,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    fn running(&self) -> usize {
        self.running.load(Acquire)
    }

    fn cap(&self) -> isize {
        self.capacity.load(Acquire)
    }

    fn free(&self) -> isize {
        let capacity = self.cap();
        if capacity < 0 {
            -1
        } else {
            capacity - self.running() as isize
        }
    }

    fn try_acquire(&self) -> Result<Step<'_>, PoolError> {
        let mut idle = self.idle.lock().unwrap();
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        if let Some(worker) = idle.detach() {
            return Ok(Step::Idle(worker));
        }

        // Slots are only ever reserved while holding the idle lock, so `running` cannot overshoot the capacity.
        let capacity = self.cap();
        if capacity < 0 || (self.running() as isize) < capacity {
            self.running.fetch_add(1, AcqRel);
            self.metrics.running.increment(1.0);
            return Ok(Step::Spawn);
        }

        let max_blocking = self.options.max_blocking_tasks;
        if self.options.nonblocking || (max_blocking != 0 && self.waiting.load(Acquire) >= max_blocking) {
            self.metrics.rejected.increment(1);
            return Err(PoolError::Overload);
        }

        // Register for wakeups before the lock is released so that a worker returning in the meantime cannot be missed.
        let mut notified = Box::pin(self.available.notified());
        notified.as_mut().enable();
        self.waiting.fetch_add(1, AcqRel);

        Ok(Step::Park(notified, WaitingGuard(&self.waiting)))
    }

    fn spawn(self: &Arc<Self>, unit: WorkUnit) {
        let worker_id = self.next_worker_id.fetch_add(1, Relaxed);
        self.metrics.spawned.increment(1);
        worker::spawn_worker(Arc::downgrade(self), &self.options.name, worker_id, unit);
    }

    /// Puts a worker back on the idle list.
    ///
    /// Returns `false` if the worker should exit instead: the pool is closed, over capacity after a resize, or the idle
    /// list is full.
    fn revert_worker(&self, mut worker: WorkerHandle) -> bool {
        let capacity = self.cap();
        if (capacity > 0 && self.running() as isize > capacity) || self.is_closed() {
            self.available.notify_waiters();
            return false;
        }

        let mut idle = self.idle.lock().unwrap();
        if self.is_closed() {
            return false;
        }

        // Stamped under the idle lock so the list stays ordered by recycle time.
        worker.mark_recycled(Instant::now());
        if idle.insert(worker).is_err() {
            return false;
        }

        self.available.notify_one();
        true
    }

    fn handle_panic(&self, worker_id: u64, payload: Box<dyn Any + Send>) {
        self.metrics.panicked.increment(1);
        match &self.options.panic_handler {
            Some(handler) => handler(payload),
            None => error!(
                pool_name = %self.options.name,
                worker_id,
                "Worker panicked while running a unit of work: {}",
                panic_message(payload.as_ref())
            ),
        }
    }

    fn purge_expired(&self, expiry: Duration) {
        let (expired, remaining) = {
            let mut idle = self.idle.lock().unwrap();
            let expired = idle.retrieve_expired(expiry, Instant::now());
            (expired, idle.len())
        };

        // Stopping happens outside the lock.
        if !expired.is_empty() {
            debug!(evicted = expired.len(), remaining, "Evicting expired idle workers.");
            self.metrics.evicted.increment(expired.len() as u64);
            for worker in expired {
                debug!(worker_id = worker.id(), "Stopping idle worker.");
                worker.stop();
            }
        }

        // Callers can be left parked if every worker was evicted, or if slots opened up without a worker returning.
        if self.running() == 0 || (self.waiting.load(Acquire) > 0 && self.free() > 0) {
            self.available.notify_waiters();
        }
    }

    fn start_scavenger(self: &Arc<Self>) {
        if self.options.disable_purge {
            return;
        }

        let handle = ScavengerHandle {
            token: CancellationToken::new(),
            done: Arc::new(AtomicBool::new(false)),
        };
        let token = handle.token.clone();
        let done = Arc::clone(&handle.done);

        if let Some(previous) = self.scavenger.lock().unwrap().replace(handle) {
            previous.token.cancel();
        }

        let span = debug_span!("scavenger", pool_name = %self.options.name);
        tokio::spawn(run_scavenger(Arc::downgrade(self), token, done, self.options.expiry_duration).instrument(span));
    }

    fn take_scavenger(&self) -> Option<ScavengerHandle> {
        let scavenger = self.scavenger.lock().unwrap().take();
        if let Some(scavenger) = &scavenger {
            scavenger.token.cancel();
        }
        scavenger
    }

    fn close(&self) -> bool {
        if self.closed.compare_exchange(false, true, AcqRel, Acquire).is_err() {
            return false;
        }

        let idle = self.idle.lock().unwrap().reset();
        for worker in idle {
            worker.stop();
        }

        self.available.notify_waiters();
        true
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Ok(scavenger) = self.scavenger.get_mut() {
            if let Some(scavenger) = scavenger.take() {
                scavenger.token.cancel();
            }
        }

        // Idle workers hold their own sender, so they only exit when told to.
        if let Ok(idle) = self.idle.get_mut() {
            for worker in idle.reset() {
                worker.stop();
            }
        }
    }
}

async fn run_scavenger(pool: Weak<PoolInner>, token: CancellationToken, done: Arc<AtomicBool>, expiry: Duration) {
    let mut ticker = interval_at(tokio::time::Instant::now() + expiry, expiry);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };

        if pool.is_closed() {
            break;
        }

        pool.purge_expired(expiry);
    }

    debug!("Scavenger stopped.");
    done.store(true, Release);
}

/// A bounded pool of reusable workers.
///
/// `WorkerPool` is cheap to clone; all clones refer to the same pool. The pool shuts its workers down when the last
/// clone is dropped.
///
/// # Capacity
///
/// A capacity of zero or less creates an unbounded pool, reported as a capacity of `-1`. For bounded pools, the number
/// of running workers never exceeds the capacity.
///
/// # Runtime
///
/// Workers and the scavenger are spawned on the ambient Tokio runtime, so pools must be created, submitted to, and
/// rebooted from within a runtime context.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a new `WorkerPool` with the given capacity and options.
    ///
    /// # Errors
    ///
    /// If preallocation is requested for an unbounded pool, an error is returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime while purging is enabled.
    pub fn new(capacity: isize, options: WorkerPoolOptions) -> Result<Self, PoolError> {
        let capacity = if capacity <= 0 { -1 } else { capacity };
        if options.prealloc && capacity < 0 {
            return Err(PoolError::InvalidPreallocSize);
        }

        Ok(Self::from_validated(capacity, options))
    }

    fn from_validated(capacity: isize, options: WorkerPoolOptions) -> Self {
        let options = options.normalized();
        let idle: Box<dyn WorkerQueue<WorkerHandle>> = if options.prealloc {
            Box::new(LoopQueue::with_capacity(capacity.max(0) as usize))
        } else {
            Box::new(WorkerStack::new())
        };

        let inner = Arc::new(PoolInner {
            capacity: AtomicIsize::new(capacity),
            running: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_worker_id: AtomicU64::new(0),
            idle: Mutex::new(idle),
            available: Notify::new(),
            scavenger: Mutex::new(None),
            metrics: PoolMetrics::new(&options.name),
            options,
        });
        inner.start_scavenger();

        debug!(pool_name = %inner.options.name, capacity, "Worker pool created.");
        Self { inner }
    }

    /// Returns the name of the pool.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Submits a unit of work to the pool.
    ///
    /// If an idle worker exists it is reused, and otherwise a new worker is spawned if the pool is below capacity. When
    /// the pool is at capacity, the caller waits until a worker frees up, unless the pool is nonblocking or the number
    /// of waiting callers has reached the configured maximum.
    ///
    /// Returns once the unit has been handed to a worker, not when it completes.
    ///
    /// # Errors
    ///
    /// If the pool is closed, or is closed while waiting, [`PoolError::Closed`] is returned. If no worker is available
    /// and the caller may not wait, [`PoolError::Overload`] is returned.
    pub async fn submit<F>(&self, unit: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.is_closed() {
            return Err(PoolError::Closed);
        }

        let mut unit: WorkUnit = Box::pin(unit);
        loop {
            match self.inner.try_acquire()? {
                Step::Idle(worker) => match worker.assign(unit) {
                    Ok(()) => return Ok(()),
                    Err(returned) => {
                        // The worker's task is gone (for example, its runtime shut down), so try again.
                        debug!(worker_id = worker.id(), "Discarding dead idle worker.");
                        unit = returned;
                    }
                },
                Step::Spawn => {
                    self.inner.spawn(unit);
                    return Ok(());
                }
                Step::Park(notified, _waiting) => notified.await,
            }
        }
    }

    /// Returns the number of live workers, busy or idle.
    pub fn running(&self) -> usize {
        self.inner.running()
    }

    /// Returns the number of workers that could still be spawned, or `-1` if the pool is unbounded.
    pub fn free(&self) -> isize {
        self.inner.free()
    }

    /// Returns the capacity of the pool, or `-1` if the pool is unbounded.
    pub fn cap(&self) -> isize {
        self.inner.cap()
    }

    /// Returns the number of callers currently waiting in [`submit`][Self::submit].
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Acquire)
    }

    /// Returns `true` if the pool has been released.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Changes the capacity of the pool.
    ///
    /// Has no effect on unbounded or preallocated pools, or when `size` is zero, negative, or equal to the current
    /// capacity. Growing the pool wakes waiting callers: one when growing by a single slot, all of them otherwise.
    /// Shrinking takes effect as busy workers finish and find the pool over capacity.
    pub fn tune(&self, size: isize) {
        let capacity = self.cap();
        if capacity == -1 || size <= 0 || size == capacity || self.inner.options.prealloc {
            return;
        }

        self.inner.capacity.store(size, Release);
        debug!(pool_name = %self.name(), from = capacity, to = size, "Worker pool resized.");

        if size > capacity {
            // Parked callers check capacity under the idle lock, so taking it here orders the wakeup after their check.
            let _idle = self.inner.idle.lock().unwrap();
            if size - capacity == 1 {
                self.inner.available.notify_one();
            } else {
                self.inner.available.notify_waiters();
            }
        }
    }

    /// Closes the pool.
    ///
    /// Stops the scavenger, stops all idle workers, and wakes every waiting caller so that it fails with
    /// [`PoolError::Closed`]. Busy workers finish their current unit and then exit. Calling `release` on a closed pool
    /// does nothing.
    pub fn release(&self) {
        self.inner.take_scavenger();
        if self.inner.close() {
            debug!(pool_name = %self.name(), "Worker pool released.");
        }
    }

    /// Closes the pool and waits up to `timeout` for every worker and the scavenger to exit.
    ///
    /// # Errors
    ///
    /// If the pool was already closed, [`PoolError::Closed`] is returned. If workers are still running when the timeout
    /// elapses, [`PoolError::Timeout`] is returned.
    pub async fn release_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        let scavenger = self.inner.take_scavenger();
        if self.is_closed() || (!self.inner.options.disable_purge && scavenger.is_none()) {
            return Err(PoolError::Closed);
        }

        self.inner.close();
        debug!(pool_name = %self.name(), ?timeout, "Worker pool released. Waiting for workers to exit.");

        let scavenger_done = scavenger.map(|scavenger| scavenger.done);
        let deadline = Instant::now() + timeout;
        loop {
            let purged = scavenger_done.as_ref().map_or(true, |done| done.load(Acquire));
            if self.running() == 0 && purged {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(PoolError::Timeout);
            }

            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Reopens a released pool.
    ///
    /// Restarts the scavenger and allows new work to be submitted. Does nothing if the pool is not closed.
    pub fn reboot(&self) {
        if self
            .inner
            .closed
            .compare_exchange(true, false, AcqRel, Acquire)
            .is_ok()
        {
            self.inner.start_scavenger();
            debug!(pool_name = %self.name(), "Worker pool rebooted.");
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name())
            .field("cap", &self.cap())
            .field("running", &self.running())
            .field("waiting", &self.waiting())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::SeqCst;

    use tokio::{sync::oneshot, time::timeout};

    use super::*;

    fn pool(capacity: isize) -> WorkerPool {
        WorkerPool::new(capacity, WorkerPoolOptions::default().with_name("test")).unwrap()
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    // Submits a unit that holds its worker until the returned sender is used or dropped.
    async fn submit_blocker(pool: &WorkerPool) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
        tx
    }

    #[tokio::test]
    async fn non_positive_capacity_is_unbounded() {
        let pool = pool(0);
        assert_eq!(pool.cap(), -1);
        assert_eq!(pool.free(), -1);

        let pool = WorkerPool::new(-5, WorkerPoolOptions::default()).unwrap();
        assert_eq!(pool.cap(), -1);
    }

    #[tokio::test]
    async fn prealloc_requires_bounded_capacity() {
        let result = WorkerPool::new(0, WorkerPoolOptions::default().with_prealloc(true));
        assert!(matches!(result, Err(PoolError::InvalidPreallocSize)));

        let pool = WorkerPool::new(4, WorkerPoolOptions::default().with_prealloc(true)).unwrap();
        assert_eq!(pool.cap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn running_never_exceeds_capacity() {
        let pool = pool(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let completed = Arc::clone(&completed);
            pool.submit(async move {
                let now = active.fetch_add(1, SeqCst) + 1;
                peak.fetch_max(now, SeqCst);
                sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, SeqCst);
                completed.fetch_add(1, SeqCst);
            })
            .await
            .unwrap();

            assert!(pool.running() <= 3);
        }

        wait_until(|| completed.load(SeqCst) == 20).await;
        assert!(peak.load(SeqCst) <= 3);
        assert!(pool.running() <= 3);
    }

    #[tokio::test]
    async fn nonblocking_pool_rejects_when_full() {
        let pool = WorkerPool::new(1, WorkerPoolOptions::default().with_nonblocking(true)).unwrap();
        let _blocker = submit_blocker(&pool).await;

        let result = timeout(Duration::from_secs(1), pool.submit(async {})).await.unwrap();
        assert!(matches!(result, Err(PoolError::Overload)));
    }

    #[tokio::test]
    async fn waiter_quota_rejects_excess_callers() {
        let pool = WorkerPool::new(1, WorkerPoolOptions::default().with_max_blocking_tasks(1)).unwrap();
        let blocker = submit_blocker(&pool).await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        wait_until(|| pool.waiting() == 1).await;

        let result = pool.submit(async {}).await;
        assert!(matches!(result, Err(PoolError::Overload)));

        // Freeing the worker lets the parked caller through.
        drop(blocker);
        let waited = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(waited.is_ok());
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn release_closes_pool_and_is_idempotent() {
        let pool = pool(2);
        pool.submit(async {}).await.unwrap();

        pool.release();
        pool.release();
        assert!(pool.is_closed());

        let result = pool.submit(async {}).await;
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn release_wakes_parked_callers() {
        let pool = pool(1);
        let _blocker = submit_blocker(&pool).await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        wait_until(|| pool.waiting() == 1).await;

        pool.release();
        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn scavenger_evicts_idle_workers() {
        let pool = WorkerPool::new(
            4,
            WorkerPoolOptions::default().with_expiry_duration(Duration::from_millis(20)),
        )
        .unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let completed = Arc::clone(&completed);
            pool.submit(async move {
                completed.fetch_add(1, SeqCst);
            })
            .await
            .unwrap();
        }

        wait_until(|| completed.load(SeqCst) == 3).await;
        wait_until(|| pool.running() == 0).await;
        assert_eq!(pool.free(), 4);
    }

    #[tokio::test]
    async fn disabled_purge_keeps_idle_workers() {
        let pool = WorkerPool::new(
            4,
            WorkerPoolOptions::default()
                .with_expiry_duration(Duration::from_millis(10))
                .with_disable_purge(true),
        )
        .unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();
        rx.await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.running(), 1);
    }

    #[tokio::test]
    async fn panic_handler_receives_payload() {
        let panics = Arc::new(AtomicUsize::new(0));
        let pool = {
            let panics = Arc::clone(&panics);
            WorkerPool::new(
                1,
                WorkerPoolOptions::default().with_panic_handler(move |payload| {
                    assert_eq!(panic_message(payload.as_ref()), "unit failed");
                    panics.fetch_add(1, SeqCst);
                }),
            )
            .unwrap()
        };

        pool.submit(async { panic!("unit failed") }).await.unwrap();
        wait_until(|| panics.load(SeqCst) == 1).await;

        // The panicking worker gives its slot back.
        wait_until(|| pool.running() == 0).await;
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();
        timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tune_grows_capacity_and_wakes_waiters() {
        let pool = pool(1);
        let _blocker = submit_blocker(&pool).await;

        let (tx, rx) = oneshot::channel();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.submit(async move {
                    let _ = tx.send(());
                })
                .await
            })
        };
        wait_until(|| pool.waiting() == 1).await;

        pool.tune(2);
        assert_eq!(pool.cap(), 2);
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().is_ok());
        timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tune_ignored_for_unbounded_and_preallocated_pools() {
        let unbounded = pool(0);
        unbounded.tune(10);
        assert_eq!(unbounded.cap(), -1);

        let preallocated = WorkerPool::new(2, WorkerPoolOptions::default().with_prealloc(true)).unwrap();
        preallocated.tune(10);
        assert_eq!(preallocated.cap(), 2);

        let bounded = pool(2);
        bounded.tune(0);
        assert_eq!(bounded.cap(), 2);
        bounded.tune(1);
        assert_eq!(bounded.cap(), 1);
    }

    #[tokio::test]
    async fn release_timeout_waits_for_workers() {
        let pool = pool(2);
        pool.submit(sleep(Duration::from_millis(30))).await.unwrap();

        let result = pool.release_timeout(Duration::from_secs(2)).await;
        assert!(result.is_ok());
        assert_eq!(pool.running(), 0);

        let result = pool.release_timeout(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn release_timeout_expires_with_busy_workers() {
        let pool = pool(1);
        let _blocker = submit_blocker(&pool).await;

        let result = pool.release_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PoolError::Timeout)));
    }

    #[tokio::test]
    async fn reboot_reopens_released_pool() {
        let pool = pool(1);
        pool.release();
        assert!(pool.is_closed());

        pool.reboot();
        assert!(!pool.is_closed());

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();
        timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }
}
