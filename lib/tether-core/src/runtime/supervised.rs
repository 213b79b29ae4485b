use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, RwLock},
};

use tether_error::{panic_message, GenericError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, debug_span, error, Instrument as _};

use super::{
    periodic::run_periodic,
    registry::{Registration, Registry, TaskState, Termination},
    supervisor::SupervisorError,
    RegisterOptions, Task, TaskArgs, TaskId,
};
use crate::pool::{default_pool, WorkerPool};

enum Lifecycle {
    Pending,
    Starting,
    Started(CancellationToken),
    Aborted,
    Terminated,
}

#[derive(Default)]
struct Settings {
    worker_pool: Option<WorkerPool>,
    parent_token: Option<CancellationToken>,
}

/// A named set of supervised tasks.
///
/// Shared by [`Supervisor`][super::Supervisor] and the pipelines. `T` is the trait object tasks are stored as, and `X`
/// is extra per-registration data owned by the caller.
pub(crate) struct SupervisedSet<T: ?Sized + Task, X> {
    name: String,
    registry: RwLock<Registry<T, X>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    startup: tokio::sync::Mutex<()>,
    settings: Mutex<Settings>,
    loops: TaskTracker,
}

impl<T, X> SupervisedSet<T, X>
where
    T: ?Sized + Task,
    X: Send + Sync + 'static,
{
    pub fn new(name: String) -> Self {
        Self {
            name,
            registry: RwLock::new(Registry::new()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Pending),
            startup: tokio::sync::Mutex::new(()),
            settings: Mutex::new(Settings::default()),
            loops: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_worker_pool(&self, pool: WorkerPool) {
        self.settings.lock().unwrap().worker_pool = Some(pool);
    }

    pub fn set_parent_token(&self, token: CancellationToken) {
        self.settings.lock().unwrap().parent_token = Some(token);
    }

    /// Registers a task.
    ///
    /// `admit` sees the registry before insertion and may veto the registration. If the set is starting or has started,
    /// the task is initialized before this returns, and its polling loop is started once the set has started.
    ///
    /// The lifecycle lock is not held while a late registration runs `init`, so `init` may itself register tasks with
    /// the same set. Admission is checked again once `init` returns, and a task that lost a race is torn down.
    pub async fn register<F>(
        self: &Arc<Self>, task: Arc<T>, options: RegisterOptions<T>, args: TaskArgs, extra: X, admit: F,
    ) -> Result<(), SupervisorError>
    where
        F: Fn(&Registry<T, X>) -> Result<(), SupervisorError>,
    {
        let id = TaskId::of(&task);
        let mut lifecycle = self.lifecycle.lock().await;
        self.check_admission(&lifecycle, id, &task, &admit)?;

        let mut registration = Registration::new(Arc::clone(&task), options, args, extra);
        if matches!(*lifecycle, Lifecycle::Starting | Lifecycle::Started(_)) {
            drop(lifecycle);

            task.init(&registration.args)
                .await
                .map_err(|source| SupervisorError::InitFailed {
                    task_name: task.name().to_string(),
                    source,
                })?;
            registration.state = TaskState::Initialized;

            lifecycle = self.lifecycle.lock().await;
            if let Err(e) = self.check_admission(&lifecycle, id, &task, &admit) {
                teardown(&self.name, &registration, Termination::Stopped);
                return Err(e);
            }
        }

        self.registry.write().unwrap().insert(id, registration);
        debug!(set = %self.name, task = task.name(), "Registered task.");

        if let Lifecycle::Started(root) = &*lifecycle {
            self.start_loop(id, root);
        }

        Ok(())
    }

    fn check_admission<F>(
        &self, lifecycle: &Lifecycle, id: TaskId, task: &Arc<T>, admit: &F,
    ) -> Result<(), SupervisorError>
    where
        F: Fn(&Registry<T, X>) -> Result<(), SupervisorError>,
    {
        if matches!(lifecycle, Lifecycle::Terminated) {
            return Err(SupervisorError::Terminated);
        }

        let registry = self.registry.read().unwrap();
        if registry.contains(&id) {
            return Err(SupervisorError::DuplicateRegistration {
                task_name: task.name().to_string(),
            });
        }
        admit(&registry)
    }

    /// Removes a task, stops its polling loop, and tears it down.
    pub fn unregister(&self, id: TaskId, task_name: &str) -> Result<(), SupervisorError> {
        let removed = self.registry.write().unwrap().remove(&id);
        match removed {
            Some(registration) => {
                if let Some(exit) = &registration.exit {
                    exit.cancel();
                }
                teardown(&self.name, &registration, Termination::Stopped);
                Ok(())
            }
            None => Err(SupervisorError::NotRegistered {
                task_name: task_name.to_string(),
            }),
        }
    }

    /// Initializes every registered task, then starts their polling loops.
    ///
    /// Runs at most once. Tasks are initialized by ascending priority, then unprioritized tasks in registration order.
    /// The first failure aborts startup: no loops are started and later calls return
    /// [`InitAborted`][SupervisorError::InitAborted].
    ///
    /// The lifecycle lock is released while tasks initialize, so their `init` may register further tasks. Those are
    /// initialized by their own registration and polled along with the rest once startup completes.
    pub async fn init(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _startup = self.startup.lock().await;

        let snapshot = {
            let mut lifecycle = self.lifecycle.lock().await;
            match *lifecycle {
                Lifecycle::Pending => {}
                Lifecycle::Starting | Lifecycle::Started(_) => return Ok(()),
                Lifecycle::Aborted => return Err(SupervisorError::InitAborted),
                Lifecycle::Terminated => return Err(SupervisorError::Terminated),
            }
            *lifecycle = Lifecycle::Starting;

            self.registry
                .read()
                .unwrap()
                .iter()
                .map(|(id, registration)| {
                    (
                        *id,
                        Arc::clone(&registration.task),
                        registration.args.clone(),
                        registration.priorities.clone(),
                    )
                })
                .collect::<Vec<_>>()
        };

        let mut buckets = BTreeMap::<u32, Vec<usize>>::new();
        for (index, (_, _, _, priorities)) in snapshot.iter().enumerate() {
            for priority in priorities {
                buckets.entry(*priority).or_default().push(index);
            }
        }
        let schedule = buckets.into_values().flatten().chain(0..snapshot.len());

        let mut initialized = vec![false; snapshot.len()];
        for index in schedule {
            if initialized[index] {
                continue;
            }
            initialized[index] = true;

            if matches!(*self.lifecycle.lock().await, Lifecycle::Terminated) {
                return Err(SupervisorError::Terminated);
            }

            let (id, task, args, _) = &snapshot[index];
            if let Err(source) = task.init(args).await {
                error!(
                    set = %self.name,
                    task = task.name(),
                    error = %source,
                    "Task failed to initialize. Aborting startup."
                );
                let mut lifecycle = self.lifecycle.lock().await;
                if !matches!(*lifecycle, Lifecycle::Terminated) {
                    *lifecycle = Lifecycle::Aborted;
                }
                return Err(SupervisorError::InitFailed {
                    task_name: task.name().to_string(),
                    source,
                });
            }

            if let Some(registration) = self.registry.write().unwrap().get_mut(id) {
                registration.state = TaskState::Initialized;
            }
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Terminated) {
            return Err(SupervisorError::Terminated);
        }

        let parent_token = self.settings.lock().unwrap().parent_token.clone();
        let root = parent_token
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        let ids = self.registry.read().unwrap().ids();
        for id in &ids {
            self.start_loop(*id, &root);
        }

        debug!(set = %self.name, tasks = ids.len(), "Started supervised tasks.");
        *lifecycle = Lifecycle::Started(root);
        Ok(())
    }

    /// Cancels every task, tears them all down, and waits for their polling loops to exit.
    ///
    /// Idempotent. Once destroyed, the set rejects new registrations.
    pub async fn destroy(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Started(root) = &*lifecycle {
            root.cancel();
        }
        *lifecycle = Lifecycle::Terminated;

        let drained = self.registry.write().unwrap().drain();
        if !drained.is_empty() {
            debug!(set = %self.name, tasks = drained.len(), "Destroying supervised tasks.");
        }
        for registration in drained {
            if let Some(exit) = &registration.exit {
                exit.cancel();
            }
            teardown(&self.name, &registration, Termination::Destroyed);
        }

        self.loops.close();
        self.loops.wait().await;
    }

    /// Removes a task whose `run_once` failed, tears it down, and hands the error to its callback.
    pub(crate) async fn fail(&self, id: TaskId, task: Arc<T>, error: GenericError) {
        let removed = self.registry.write().unwrap().remove(&id);
        let Some(registration) = removed else {
            debug!(set = %self.name, task = task.name(), error = %error, "Task failed after being removed.");
            return;
        };

        teardown(&self.name, &registration, Termination::Failed);

        let Some(callback) = registration.on_error.clone() else {
            return;
        };
        let pool = registration
            .worker_pool
            .clone()
            .or_else(|| self.settings.lock().unwrap().worker_pool.clone())
            .unwrap_or_else(|| default_pool().clone());

        if let Err(e) = pool.submit(async move { callback(task, error) }).await {
            error!(set = %self.name, pool = pool.name(), error = %e, "Failed to submit task error callback.");
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&Registry<T, X>) -> R) -> R {
        f(&self.registry.read().unwrap())
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<T>) -> bool,
    {
        let tasks = self.read(|registry| {
            registry
                .values()
                .map(|registration| Arc::clone(&registration.task))
                .collect::<Vec<_>>()
        });
        for task in &tasks {
            if !f(task) {
                break;
            }
        }
    }

    pub fn by_alias(&self, alias: &str) -> Vec<Arc<T>> {
        if alias.is_empty() {
            return Vec::new();
        }

        self.read(|registry| {
            registry
                .values()
                .filter(|registration| registration.alias.as_deref() == Some(alias))
                .map(|registration| Arc::clone(&registration.task))
                .collect()
        })
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.read(|registry| registry.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.read(|registry| registry.len())
    }

    fn start_loop(self: &Arc<Self>, id: TaskId, root: &CancellationToken) {
        let (task, period, exit) = {
            let mut registry = self.registry.write().unwrap();
            let Some(registration) = registry.get_mut(&id) else {
                return;
            };
            let exit = root.child_token();
            registration.exit = Some(exit.clone());
            registration.state = TaskState::Running;
            (Arc::clone(&registration.task), registration.period, exit)
        };

        let span = debug_span!("task", set = %self.name, task = task.name());
        self.loops.spawn(
            run_periodic(Arc::downgrade(self), id, task, period, exit, root.clone()).instrument(span),
        );
    }
}

impl<T: ?Sized + Task, X> Drop for SupervisedSet<T, X> {
    fn drop(&mut self) {
        if let Lifecycle::Started(root) = self.lifecycle.get_mut() {
            root.cancel();
        }

        let drained = match self.registry.get_mut() {
            Ok(registry) => registry.drain(),
            Err(poisoned) => poisoned.into_inner().drain(),
        };
        for registration in drained {
            teardown(&self.name, &registration, Termination::Destroyed);
        }
    }
}

/// Calls `destroy` on a task that has left its set, logging instead of propagating any panic.
fn teardown<T: ?Sized + Task, X>(set_name: &str, registration: &Registration<T, X>, reason: Termination) {
    let task = &registration.task;
    match catch_unwind(AssertUnwindSafe(|| task.destroy())) {
        Ok(()) => debug!(set = set_name, task = task.name(), state = ?registration.state, %reason, "Task torn down."),
        Err(payload) => error!(
            set = set_name,
            task = task.name(),
            state = ?registration.state,
            %reason,
            "Task panicked during teardown: {}",
            panic_message(payload.as_ref()),
        ),
    }
}
