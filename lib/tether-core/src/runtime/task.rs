use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use tether_error::GenericError;
use tokio_util::sync::CancellationToken;

/// A long-lived component driven by a supervisor.
///
/// Once registered and initialized, a task is polled by calling [`run_once`][Task::run_once] at a fixed period until it
/// is unregistered, its supervisor is destroyed, or `run_once` fails. A failing task is removed from its supervisor and
/// torn down; it is never retried.
///
/// Tasks are identified by the allocation behind their `Arc`, so the same task value can be registered with a given
/// supervisor at most once.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Returns the name of the task, used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Initializes the task.
    ///
    /// Called exactly once, before the first call to `run_once`. `args` are the arguments given at registration.
    ///
    /// # Errors
    ///
    /// If the task cannot be initialized, an error is returned. During bulk startup this aborts startup entirely.
    async fn init(&self, _args: &TaskArgs) -> Result<(), GenericError> {
        Ok(())
    }

    /// Performs one iteration of work.
    ///
    /// `token` is cancelled when the task is unregistered or its supervisor is destroyed; long-running iterations should
    /// watch it and return promptly once it fires.
    ///
    /// # Errors
    ///
    /// Returning an error removes the task from its supervisor and tears it down.
    async fn run_once(&self, token: &CancellationToken) -> Result<(), GenericError>;

    /// Releases the task's resources.
    ///
    /// Called exactly once, when the task leaves its supervisor for any reason. Panics are caught and logged.
    fn destroy(&self) {}

    /// Returns user data attached to the task, if any.
    fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Arguments handed to [`Task::init`].
///
/// An ordered list of type-erased values. Values are looked up by position and type.
#[derive(Clone, Default)]
pub struct TaskArgs {
    values: Vec<Arc<dyn Any + Send + Sync>>,
}

impl TaskArgs {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value to the argument list.
    pub fn with<V: Any + Send + Sync>(mut self, value: V) -> Self {
        self.values.push(Arc::new(value));
        self
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a reference to the argument at `index` if it exists and is of type `V`.
    pub fn get<V: Any>(&self, index: usize) -> Option<&V> {
        self.values.get(index).and_then(|value| value.downcast_ref::<V>())
    }

    /// Returns a shared handle to the argument at `index` if it exists and is of type `V`.
    pub fn get_shared<V: Any + Send + Sync>(&self, index: usize) -> Option<Arc<V>> {
        self.values
            .get(index)
            .and_then(|value| Arc::clone(value).downcast::<V>().ok())
    }
}

impl fmt::Debug for TaskArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskArgs").field("len", &self.values.len()).finish()
    }
}

/// Identity of a registered task.
///
/// Derived from the address of the task's shared allocation, so every `Arc` pointing at the same task (including
/// clones coerced to a trait object) has the same identity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TaskId(usize);

impl TaskId {
    /// Returns the identity of the task behind `task`.
    pub fn of<U: ?Sized>(task: &Arc<U>) -> Self {
        Self(Arc::as_ptr(task) as *const () as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Task for Noop {
        async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
            Ok(())
        }
    }

    #[test]
    fn task_id_survives_coercion() {
        let concrete = Arc::new(Noop);
        let erased: Arc<dyn Task> = concrete.clone();
        assert_eq!(TaskId::of(&concrete), TaskId::of(&erased));

        let other = Arc::new(Noop);
        assert_ne!(TaskId::of(&concrete), TaskId::of(&other));
    }

    #[test]
    fn default_name_is_type_name() {
        let task: Arc<dyn Task> = Arc::new(Noop);
        assert!(task.name().ends_with("Noop"));
    }

    #[test]
    fn args_are_typed_by_position() {
        let args = TaskArgs::new().with(42_u32).with("label".to_string());
        assert_eq!(args.len(), 2);
        assert_eq!(args.get::<u32>(0), Some(&42));
        assert_eq!(args.get::<String>(1).map(String::as_str), Some("label"));
        assert_eq!(args.get::<u32>(1), None);
        assert_eq!(args.get::<u32>(2), None);
        assert_eq!(args.get_shared::<String>(1).as_deref().map(String::as_str), Some("label"));
    }
}
