use std::time::Duration;

use serde::Deserialize;

use super::{PoolError, WorkerPool, WorkerPoolOptions, DEFAULT_WORKER_POOL_SIZE};

const fn default_capacity() -> isize {
    DEFAULT_WORKER_POOL_SIZE
}

/// Worker pool configuration.
///
/// Deserializable counterpart of [`WorkerPoolOptions`] plus the pool capacity, for pools defined in configuration files
/// or environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerPoolConfiguration {
    /// Maximum number of workers. Zero or less means unbounded.
    ///
    /// Defaults to 32767.
    #[serde(default = "default_capacity")]
    pub capacity: isize,

    /// How long a worker may sit idle before being evicted, in milliseconds.
    ///
    /// Zero selects the default of one second. Negative values are rejected.
    #[serde(default)]
    pub expiry_ms: i64,

    /// Whether to preallocate the idle list.
    #[serde(default)]
    pub prealloc: bool,

    /// Maximum number of callers allowed to wait for a worker. Zero means no limit.
    #[serde(default)]
    pub max_blocking_tasks: usize,

    /// Whether submissions fail immediately instead of waiting when no worker is available.
    #[serde(default)]
    pub nonblocking: bool,

    /// Whether to disable eviction of idle workers.
    #[serde(default)]
    pub disable_purge: bool,
}

impl Default for WorkerPoolConfiguration {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            expiry_ms: 0,
            prealloc: false,
            max_blocking_tasks: 0,
            nonblocking: false,
            disable_purge: false,
        }
    }
}

impl WorkerPoolConfiguration {
    /// Converts this configuration into pool options with the given pool name.
    ///
    /// # Errors
    ///
    /// If the expiry is negative, an error is returned.
    pub fn to_options<S: Into<String>>(&self, name: S) -> Result<WorkerPoolOptions, PoolError> {
        if self.expiry_ms < 0 {
            return Err(PoolError::InvalidExpiry {
                expiry_ms: self.expiry_ms,
            });
        }

        Ok(WorkerPoolOptions::default()
            .with_name(name)
            .with_expiry_duration(Duration::from_millis(self.expiry_ms as u64))
            .with_prealloc(self.prealloc)
            .with_max_blocking_tasks(self.max_blocking_tasks)
            .with_nonblocking(self.nonblocking)
            .with_disable_purge(self.disable_purge))
    }

    /// Builds a worker pool from this configuration.
    ///
    /// # Errors
    ///
    /// If the expiry is negative, or preallocation is requested for an unbounded pool, an error is returned.
    pub fn build<S: Into<String>>(&self, name: S) -> Result<WorkerPool, PoolError> {
        WorkerPool::new(self.capacity, self.to_options(name)?)
    }
}
