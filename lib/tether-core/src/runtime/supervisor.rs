use std::sync::Arc;

use snafu::{ResultExt as _, Snafu};
use tether_error::GenericError;
use tokio_util::sync::CancellationToken;

use super::{supervised::SupervisedSet, RegisterOptions, Task, TaskArgs, TaskId};
use crate::{
    extension::{ExtensionError, ExtensionLoader},
    pool::WorkerPool,
};

/// Supervisor errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SupervisorError {
    /// Supervisor or pipeline name is invalid.
    #[snafu(display("Invalid name '{}'. Names must not be empty.", name))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The task is already registered.
    #[snafu(display("Task '{}' is already registered.", task_name))]
    DuplicateRegistration {
        /// Name of the task.
        task_name: String,
    },

    /// Another stage already occupies the requested position.
    #[snafu(display("A stage is already registered at order {}.", order))]
    DuplicateOrder {
        /// The requested position.
        order: u32,
    },

    /// The task is not registered.
    #[snafu(display("Task '{}' is not registered.", task_name))]
    NotRegistered {
        /// Name of the task.
        task_name: String,
    },

    /// A task failed to initialize.
    #[snafu(display("Task '{}' failed to initialize: {}", task_name, source))]
    InitFailed {
        /// Name of the task.
        task_name: String,

        /// The error returned by the task.
        source: GenericError,
    },

    /// An earlier call to `init` failed, so the supervisor will not start.
    #[snafu(display("Initialization already failed. Supervisor will not start."))]
    InitAborted,

    /// The supervisor has been destroyed.
    #[snafu(display("Supervisor has been destroyed."))]
    Terminated,

    /// An extension could not be loaded.
    #[snafu(display("Failed to load extension: {}", source))]
    ExtensionLoad {
        /// The underlying extension error.
        source: ExtensionError,
    },
}

/// Supervises long-lived, periodically polled tasks.
///
/// Tasks are registered with optional startup priorities and aliases, initialized together by [`init`][Self::init], and
/// then polled on their own period until they are unregistered, fail, or the supervisor is destroyed. Every task that
/// leaves the supervisor, for whatever reason, is torn down exactly once.
///
/// Polling loops are cancelled hierarchically: each task has its own exit signal, derived from the supervisor's root
/// token, which is itself derived from the parent token if one was given.
///
/// `Supervisor` is a cheap handle and can be cloned. Dropping the last handle cancels all loops and tears down any
/// remaining tasks, but only [`destroy`][Self::destroy] waits for the loops to exit.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisedSet<dyn Task, ()>>,
}

impl Supervisor {
    /// Creates an empty `Supervisor` with the given name.
    ///
    /// # Errors
    ///
    /// If the name is empty, an error is returned.
    pub fn new<S: Into<String>>(name: S) -> Result<Self, SupervisorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SupervisorError::InvalidName { name });
        }

        Ok(Self {
            inner: Arc::new(SupervisedSet::new(name)),
        })
    }

    /// Sets the worker pool that runs task error callbacks.
    ///
    /// Defaults to the process-wide [default pool][crate::pool::default_pool].
    pub fn with_worker_pool(self, pool: WorkerPool) -> Self {
        self.inner.set_worker_pool(pool);
        self
    }

    /// Sets a parent cancellation token.
    ///
    /// Cancelling the parent stops every polling loop, as if the supervisor's own root token had been cancelled. Takes
    /// effect at the next call to [`init`][Self::init].
    pub fn with_parent_token(self, token: CancellationToken) -> Self {
        self.inner.set_parent_token(token);
        self
    }

    /// Returns the name of the supervisor.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Registers a task.
    ///
    /// Before [`init`][Self::init], the task is only recorded. Afterwards, it is initialized and its polling loop
    /// started before this returns.
    ///
    /// # Errors
    ///
    /// If the task is already registered, if the supervisor has been destroyed, or if the supervisor has started and the
    /// task fails to initialize, an error is returned and the task is not registered.
    pub async fn register(
        &self, task: Arc<dyn Task>, options: RegisterOptions<dyn Task>, args: TaskArgs,
    ) -> Result<(), SupervisorError> {
        self.inner.register(task, options, args, (), |_| Ok(())).await
    }

    /// Loads a task through an extension loader and registers it.
    ///
    /// # Errors
    ///
    /// If the extension cannot be loaded, or registration fails, an error is returned.
    pub async fn register_extension<L>(
        &self, loader: &L, name: &str, options: RegisterOptions<dyn Task>, args: TaskArgs,
    ) -> Result<(), SupervisorError>
    where
        L: ExtensionLoader + ?Sized,
    {
        let task = loader.load(name).context(ExtensionLoad)?;
        self.register(task, options, args).await
    }

    /// Unregisters a task.
    ///
    /// The task's polling loop is signalled to exit and the task is torn down before this returns. An in-flight
    /// `run_once` observes cancellation through its token.
    ///
    /// # Errors
    ///
    /// If the task is not registered, an error is returned.
    pub fn unregister<U: ?Sized + Task>(&self, task: &Arc<U>) -> Result<(), SupervisorError> {
        self.inner.unregister(TaskId::of(task), task.name())
    }

    /// Initializes all registered tasks and starts polling them.
    ///
    /// Tasks are initialized one at a time: first by ascending priority, then unprioritized tasks in registration order.
    /// Only the first call does anything; later calls return `Ok(())`, or an error if the first call failed.
    ///
    /// # Errors
    ///
    /// If any task fails to initialize, startup is aborted and an error is returned. No polling loops are started.
    /// If the supervisor is destroyed while tasks are initializing, [`SupervisorError::Terminated`] is returned.
    pub async fn init(&self) -> Result<(), SupervisorError> {
        self.inner.init().await
    }

    /// Stops and tears down every task, then waits for all polling loops to exit.
    ///
    /// Idempotent. After this, the supervisor is empty and rejects new registrations.
    pub async fn destroy(&self) {
        self.inner.destroy().await
    }

    /// Calls `f` for each registered task, in priority order, until it returns `false`.
    ///
    /// `f` runs on a snapshot, so it may freely register or unregister tasks.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&Arc<dyn Task>) -> bool,
    {
        self.inner.for_each(f)
    }

    /// Returns every task registered under `alias`.
    ///
    /// An empty alias matches nothing.
    pub fn tasks_by_alias(&self, alias: &str) -> Vec<Arc<dyn Task>> {
        self.inner.by_alias(alias)
    }

    /// Returns `true` if `task` is registered.
    pub fn contains<U: ?Sized>(&self, task: &Arc<U>) -> bool {
        self.inner.contains(TaskId::of(task))
    }

    /// Returns the number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.inner.len()
    }
}
