use std::{any::Any, fmt, sync::Arc, time::Duration};

/// Default interval between scavenger runs, and the default idle expiry for workers.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(1);

/// A handler invoked with the payload of a panic raised by a submitted unit of work.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

/// Worker pool options.
#[derive(Clone)]
pub struct WorkerPoolOptions {
    pub(super) name: String,
    pub(super) expiry_duration: Duration,
    pub(super) prealloc: bool,
    pub(super) max_blocking_tasks: usize,
    pub(super) nonblocking: bool,
    pub(super) panic_handler: Option<PanicHandler>,
    pub(super) disable_purge: bool,
}

impl WorkerPoolOptions {
    /// Sets the name of the pool.
    ///
    /// The name is attached to the pool's log spans and metrics. Defaults to `worker_pool`.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how long a worker may sit idle before the scavenger evicts it.
    ///
    /// The scavenger also runs at this interval. A zero duration selects [`DEFAULT_CLEAN_INTERVAL`].
    pub fn with_expiry_duration(mut self, expiry: Duration) -> Self {
        self.expiry_duration = expiry;
        self
    }

    /// Preallocates the idle list as a fixed-size ring sized to the pool capacity.
    ///
    /// Preallocated pools cannot be unbounded, and cannot be resized with [`tune`][super::WorkerPool::tune].
    pub fn with_prealloc(mut self, prealloc: bool) -> Self {
        self.prealloc = prealloc;
        self
    }

    /// Sets the maximum number of callers that may be blocked in `submit` at once.
    ///
    /// Zero means no limit. Callers beyond the limit fail with [`PoolError::Overload`][super::PoolError::Overload].
    pub fn with_max_blocking_tasks(mut self, max: usize) -> Self {
        self.max_blocking_tasks = max;
        self
    }

    /// Makes `submit` fail immediately with [`PoolError::Overload`][super::PoolError::Overload] instead of waiting
    /// when no worker is available.
    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    /// Sets the handler for panics raised by submitted units of work.
    ///
    /// Without a handler, panics are logged. Either way the panicking worker exits and its slot is freed.
    pub fn with_panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    /// Disables the scavenger, so idle workers are never evicted.
    pub fn with_disable_purge(mut self, disable_purge: bool) -> Self {
        self.disable_purge = disable_purge;
        self
    }

    pub(super) fn normalized(mut self) -> Self {
        if self.expiry_duration.is_zero() {
            self.expiry_duration = DEFAULT_CLEAN_INTERVAL;
        }
        self
    }
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            name: "worker_pool".to_string(),
            expiry_duration: DEFAULT_CLEAN_INTERVAL,
            prealloc: false,
            max_blocking_tasks: 0,
            nonblocking: false,
            panic_handler: None,
            disable_purge: false,
        }
    }
}

impl fmt::Debug for WorkerPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolOptions")
            .field("name", &self.name)
            .field("expiry_duration", &self.expiry_duration)
            .field("prealloc", &self.prealloc)
            .field("max_blocking_tasks", &self.max_blocking_tasks)
            .field("nonblocking", &self.nonblocking)
            .field("panic_handler", &self.panic_handler.is_some())
            .field("disable_purge", &self.disable_purge)
            .finish()
    }
}
