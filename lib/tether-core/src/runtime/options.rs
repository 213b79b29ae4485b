use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use tether_error::GenericError;
use tracing::warn;

use crate::pool::WorkerPool;

/// Priority assigned to tasks registered without an explicit priority.
pub const DEFAULT_PRIORITY: u32 = 9999;

/// Polling period used when none is given.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1);

/// Callback invoked, on a worker pool, after a task fails and has been removed.
pub type ErrorCallback<T> = Arc<dyn Fn(Arc<T>, GenericError) + Send + Sync>;

/// Options for registering a task.
///
/// `T` is the trait object the task is registered as, which is also what the error callback receives.
pub struct RegisterOptions<T: ?Sized> {
    pub(crate) priorities: BTreeSet<u32>,
    pub(crate) alias: Option<String>,
    pub(crate) on_error: Option<ErrorCallback<T>>,
    pub(crate) period: Duration,
    pub(crate) worker_pool: Option<WorkerPool>,
}

impl<T: ?Sized> RegisterOptions<T> {
    /// Adds a startup priority.
    ///
    /// During bulk initialization, tasks are initialized in ascending priority order. A task may be given several
    /// priorities, in which case it is initialized at the lowest of them. Tasks without a priority are initialized after
    /// all prioritized tasks, in registration order.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priorities.insert(priority);
        self
    }

    /// Sets an alias under which the task can be looked up.
    ///
    /// Empty aliases are ignored.
    pub fn with_alias<S: Into<String>>(mut self, alias: S) -> Self {
        let alias = alias.into();
        if alias.is_empty() {
            warn!("Ignoring empty task alias.");
        } else {
            self.alias = Some(alias);
        }
        self
    }

    /// Sets the callback invoked when the task fails.
    ///
    /// The callback runs on a worker pool after the task has been removed and torn down. It receives the task and the
    /// error that `run_once` returned.
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Arc<T>, GenericError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Sets the polling period.
    ///
    /// A zero period selects [`DEFAULT_PERIOD`]. Defaults to [`DEFAULT_PERIOD`].
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = if period.is_zero() { DEFAULT_PERIOD } else { period };
        self
    }

    /// Sets the worker pool that runs this task's error callback.
    ///
    /// Overrides the supervisor's pool for this task only.
    pub fn with_worker_pool(mut self, pool: WorkerPool) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub(crate) fn sort_key(&self) -> u32 {
        self.priorities.first().copied().unwrap_or(DEFAULT_PRIORITY)
    }
}

impl<T: ?Sized> Default for RegisterOptions<T> {
    fn default() -> Self {
        Self {
            priorities: BTreeSet::new(),
            alias: None,
            on_error: None,
            period: DEFAULT_PERIOD,
            worker_pool: None,
        }
    }
}

impl<T: ?Sized> fmt::Debug for RegisterOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterOptions")
            .field("priorities", &self.priorities)
            .field("alias", &self.alias)
            .field("on_error", &self.on_error.is_some())
            .field("period", &self.period)
            .field("worker_pool", &self.worker_pool.as_ref().map(WorkerPool::name))
            .finish()
    }
}
