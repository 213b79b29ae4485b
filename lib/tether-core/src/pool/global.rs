//! Process-wide default worker pool.
//!
//! Consumers that are not handed an explicit [`WorkerPool`] fall back to this pool. It is created lazily on first use,
//! from within whichever Tokio runtime touches it first.

use std::{future::Future, sync::OnceLock};

use super::{PoolError, WorkerPool, WorkerPoolOptions};

/// Capacity of the default worker pool.
pub const DEFAULT_WORKER_POOL_SIZE: isize = i16::MAX as isize;

static DEFAULT_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Returns the default worker pool, creating it if necessary.
///
/// # Panics
///
/// Panics if the pool has to be created outside of a Tokio runtime.
pub fn default_pool() -> &'static WorkerPool {
    DEFAULT_POOL.get_or_init(|| {
        WorkerPool::from_validated(DEFAULT_WORKER_POOL_SIZE, WorkerPoolOptions::default().with_name("default"))
    })
}

/// Submits a unit of work to the default pool.
///
/// # Errors
///
/// See [`WorkerPool::submit`].
pub async fn submit<F>(unit: F) -> Result<(), PoolError>
where
    F: Future<Output = ()> + Send + 'static,
{
    default_pool().submit(unit).await
}

/// Returns the number of live workers in the default pool.
pub fn running() -> usize {
    default_pool().running()
}

/// Returns the capacity of the default pool.
pub fn cap() -> isize {
    default_pool().cap()
}

/// Returns the number of workers the default pool could still spawn.
pub fn free() -> isize {
    default_pool().free()
}

/// Releases the default pool, if it was ever created.
pub fn release() {
    if let Some(pool) = DEFAULT_POOL.get() {
        pool.release();
    }
}

/// Reopens the default pool after a release.
pub fn reboot() {
    default_pool().reboot();
}
