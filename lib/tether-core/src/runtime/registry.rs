use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use super::{options::ErrorCallback, RegisterOptions, TaskArgs, TaskId};
use crate::{collections::FastIndexMap, pool::WorkerPool};

/// Lifecycle state of a registered task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TaskState {
    Registered,
    Initialized,
    Running,
}

/// Why a task left its supervisor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Termination {
    Stopped,
    Failed,
    Destroyed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Failed => f.write_str("failed"),
            Self::Destroyed => f.write_str("destroyed"),
        }
    }
}

pub(crate) struct Registration<T: ?Sized, X> {
    pub task: Arc<T>,
    pub args: TaskArgs,
    pub alias: Option<String>,
    pub priorities: BTreeSet<u32>,
    pub period: Duration,
    pub on_error: Option<ErrorCallback<T>>,
    pub worker_pool: Option<WorkerPool>,
    pub exit: Option<CancellationToken>,
    pub state: TaskState,
    pub sort_key: u32,
    pub extra: X,
}

impl<T: ?Sized, X> Registration<T, X> {
    pub fn new(task: Arc<T>, options: RegisterOptions<T>, args: TaskArgs, extra: X) -> Self {
        let sort_key = options.sort_key();
        Self {
            task,
            args,
            alias: options.alias,
            priorities: options.priorities,
            period: options.period,
            on_error: options.on_error,
            worker_pool: options.worker_pool,
            exit: None,
            state: TaskState::Registered,
            sort_key,
            extra,
        }
    }
}

/// Registered tasks, kept sorted by ascending sort key.
///
/// Tasks with equal keys stay in registration order.
pub(crate) struct Registry<T: ?Sized, X> {
    entries: FastIndexMap<TaskId, Registration<T, X>>,
}

impl<T: ?Sized, X> Registry<T, X> {
    pub fn new() -> Self {
        Self {
            entries: FastIndexMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Registration<T, X>> {
        self.entries.get_mut(id)
    }

    pub fn insert(&mut self, id: TaskId, registration: Registration<T, X>) {
        let key = registration.sort_key;
        let index = self
            .entries
            .values()
            .position(|existing| existing.sort_key > key)
            .unwrap_or(self.entries.len());
        self.entries.shift_insert(index, id, registration);
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Registration<T, X>> {
        self.entries.shift_remove(id)
    }

    pub fn drain(&mut self) -> Vec<Registration<T, X>> {
        self.entries.drain(..).map(|(_, registration)| registration).collect()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &Registration<T, X>)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Registration<T, X>> {
        self.entries.values()
    }
}
