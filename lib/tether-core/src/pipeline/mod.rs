//! Message-processing pipelines.
//!
//! A pipeline is a set of [`DataProcessor`] stages that are also supervised tasks: they are initialized, polled, and
//! torn down exactly like tasks registered with a [`Supervisor`][crate::runtime::Supervisor]. On top of that, a
//! pipeline can push a message through its stages.
//!
//! - [`Sequence`] chains its stages, in ascending order, feeding each stage's output to the next.
//! - [`Parallel`] hands the same message to every stage and collects their outputs.
//!
//! When a stage rejects or fails to process a message, the stage's recovery function, if any, decides the result.
//! Otherwise the error is returned.

use std::{fmt, sync::Arc, time::Duration};

use tether_error::GenericError;
use tracing::debug;

use crate::{
    pool::WorkerPool,
    runtime::{supervised::SupervisedSet, RegisterOptions, SupervisorError, Task, TaskArgs, TaskId},
};

mod parallel;
pub use self::parallel::Parallel;

mod sequence;
pub use self::sequence::Sequence;

/// A task that transforms messages.
pub trait DataProcessor<M>: Task {
    /// Checks whether `msg` is acceptable to this processor.
    ///
    /// Called immediately before [`process`][Self::process]. Defaults to accepting everything.
    ///
    /// # Errors
    ///
    /// If the message is rejected, an error is returned and `process` is not called.
    fn msg_check(&self, _msg: &M) -> Result<(), GenericError> {
        Ok(())
    }

    /// Processes `msg`, producing a new message.
    ///
    /// # Errors
    ///
    /// If the message cannot be processed, an error is returned.
    fn process(&self, msg: &M) -> Result<M, GenericError>;
}

/// Recovery function for a failed stage.
///
/// Receives the message the stage was given and the stage's error. Whatever it returns becomes the result of the whole
/// pipeline run.
pub type Recovery<M, O> = Arc<dyn Fn(M, GenericError) -> Result<O, GenericError> + Send + Sync>;

/// Options for registering a pipeline stage.
///
/// `O` is the pipeline's output type: `M` for [`Sequence`], `Vec<M>` for [`Parallel`].
pub struct StageOptions<M: 'static, O: 'static = M> {
    register: RegisterOptions<dyn DataProcessor<M>>,
    recovery: Option<Recovery<M, O>>,
}

impl<M: 'static, O: 'static> StageOptions<M, O> {
    /// Sets the callback invoked when the stage's `run_once` fails.
    ///
    /// See [`RegisterOptions::with_error_callback`].
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Arc<dyn DataProcessor<M>>, GenericError) + Send + Sync + 'static,
    {
        self.register = self.register.with_error_callback(callback);
        self
    }

    /// Sets the stage's polling period.
    ///
    /// See [`RegisterOptions::with_period`].
    pub fn with_period(mut self, period: Duration) -> Self {
        self.register = self.register.with_period(period);
        self
    }

    /// Sets the worker pool that runs the stage's error callback.
    pub fn with_worker_pool(mut self, pool: WorkerPool) -> Self {
        self.register = self.register.with_worker_pool(pool);
        self
    }

    /// Sets the recovery function used when this stage rejects or fails to process a message.
    pub fn with_recovery<F>(mut self, recovery: F) -> Self
    where
        F: Fn(M, GenericError) -> Result<O, GenericError> + Send + Sync + 'static,
    {
        self.recovery = Some(Arc::new(recovery));
        self
    }
}

impl<M: 'static, O: 'static> Default for StageOptions<M, O> {
    fn default() -> Self {
        Self {
            register: RegisterOptions::default(),
            recovery: None,
        }
    }
}

impl<M: 'static, O: 'static> fmt::Debug for StageOptions<M, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOptions")
            .field("register", &self.register)
            .field("recovery", &self.recovery.is_some())
            .finish()
    }
}

struct StageEntry<M, O> {
    order: Option<u32>,
    recovery: Option<Recovery<M, O>>,
}

/// A stage failure, captured while the stage set is locked and handled after it is released.
struct StageFailure<M, O> {
    stage: String,
    recovery: Option<Recovery<M, O>>,
    error: GenericError,
}

impl<M, O> StageFailure<M, O> {
    fn resolve(self, pipeline: &str, input: M) -> Result<O, GenericError> {
        debug!(pipeline, stage = %self.stage, error = %self.error, "Pipeline stage failed.");
        match self.recovery {
            Some(recover) => recover(input, self.error),
            None => Err(self.error),
        }
    }
}

/// Supervised stage set shared by both pipeline shapes.
struct Stages<M: 'static, O: 'static> {
    set: Arc<SupervisedSet<dyn DataProcessor<M>, StageEntry<M, O>>>,
}

impl<M: 'static, O: 'static> Stages<M, O> {
    fn new(name: String) -> Result<Self, SupervisorError> {
        if name.is_empty() {
            return Err(SupervisorError::InvalidName { name });
        }

        Ok(Self {
            set: Arc::new(SupervisedSet::new(name)),
        })
    }

    async fn register(
        &self, processor: Arc<dyn DataProcessor<M>>, options: StageOptions<M, O>, args: TaskArgs, order: Option<u32>,
    ) -> Result<(), SupervisorError> {
        let register = match order {
            Some(order) => options.register.with_priority(order),
            None => options.register,
        };
        let entry = StageEntry {
            order,
            recovery: options.recovery,
        };

        self.set
            .register(processor, register, args, entry, |registry| {
                match order {
                    Some(order) if registry.values().any(|existing| existing.extra.order == Some(order)) => {
                        Err(SupervisorError::DuplicateOrder { order })
                    }
                    _ => Ok(()),
                }
            })
            .await
    }

    fn unregister<U: ?Sized + Task>(&self, processor: &Arc<U>) -> Result<(), SupervisorError> {
        self.set.unregister(TaskId::of(processor), processor.name())
    }

    fn run<F>(&self, mut f: F) -> Option<StageFailure<M, O>>
    where
        F: FnMut(&dyn DataProcessor<M>) -> Result<(), GenericError>,
    {
        self.set.read(|registry| {
            for registration in registry.values() {
                let stage = registration.task.as_ref();
                if let Err(error) = f(stage) {
                    return Some(StageFailure {
                        stage: stage.name().to_string(),
                        recovery: registration.extra.recovery.clone(),
                        error,
                    });
                }
            }
            None
        })
    }

    fn find_by_order(&self, order: u32) -> Option<Arc<dyn DataProcessor<M>>> {
        self.set.read(|registry| {
            registry
                .values()
                .find(|registration| registration.extra.order == Some(order))
                .map(|registration| Arc::clone(&registration.task))
        })
    }
}

/// Lifecycle and query methods common to both pipeline shapes.
macro_rules! stage_set_methods {
    () => {
        /// Returns the name of the pipeline.
        pub fn name(&self) -> &str {
            self.stages.set.name()
        }

        /// Sets the worker pool that runs stage error callbacks.
        pub fn with_worker_pool(self, pool: $crate::pool::WorkerPool) -> Self {
            self.stages.set.set_worker_pool(pool);
            self
        }

        /// Sets a parent cancellation token for the stages' polling loops.
        pub fn with_parent_token(self, token: tokio_util::sync::CancellationToken) -> Self {
            self.stages.set.set_parent_token(token);
            self
        }

        /// Unregisters a stage, stopping its polling loop and tearing it down.
        ///
        /// # Errors
        ///
        /// If the stage is not registered, an error is returned.
        pub fn unregister<U: ?Sized + $crate::runtime::Task>(
            &self, processor: &std::sync::Arc<U>,
        ) -> Result<(), $crate::runtime::SupervisorError> {
            self.stages.unregister(processor)
        }

        /// Initializes every stage, in pipeline order, and starts polling them.
        ///
        /// Only the first call does anything.
        ///
        /// # Errors
        ///
        /// If any stage fails to initialize, startup is aborted and an error is returned.
        pub async fn init(&self) -> Result<(), $crate::runtime::SupervisorError> {
            self.stages.set.init().await
        }

        /// Stops and tears down every stage, then waits for their polling loops to exit.
        pub async fn destroy(&self) {
            self.stages.set.destroy().await
        }

        /// Calls `f` for each stage, in pipeline order, until it returns `false`.
        pub fn for_each<F>(&self, f: F)
        where
            F: FnMut(&std::sync::Arc<dyn $crate::pipeline::DataProcessor<M>>) -> bool,
        {
            self.stages.set.for_each(f)
        }

        /// Returns `true` if `processor` is one of this pipeline's stages.
        pub fn contains<U: ?Sized>(&self, processor: &std::sync::Arc<U>) -> bool {
            self.stages.set.contains($crate::runtime::TaskId::of(processor))
        }

        /// Returns the number of stages.
        pub fn stage_count(&self) -> usize {
            self.stages.set.len()
        }
    };
}
use stage_set_methods;

impl<M: 'static, O: 'static> fmt::Debug for Stages<M, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stages")
            .field("name", &self.set.name())
            .field("len", &self.set.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use async_trait::async_trait;
    use tether_error::generic_error;
    use tokio_util::sync::CancellationToken;

    use super::*;

    /// Appends a suffix to string messages.
    #[derive(Default)]
    pub struct Append {
        pub suffix: &'static str,
        pub reject_containing: Option<&'static str>,
        pub fail_on: Option<&'static str>,
        pub destroys: AtomicUsize,
        pub processed: AtomicUsize,
    }

    impl Append {
        pub fn new(suffix: &'static str) -> Self {
            Self {
                suffix,
                ..Default::default()
            }
        }

        pub fn destroys(&self) -> usize {
            self.destroys.load(SeqCst)
        }

        pub fn processed(&self) -> usize {
            self.processed.load(SeqCst)
        }
    }

    #[async_trait]
    impl Task for Append {
        fn name(&self) -> &str {
            self.suffix
        }

        async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, SeqCst);
        }
    }

    impl DataProcessor<String> for Append {
        fn msg_check(&self, msg: &String) -> Result<(), GenericError> {
            match self.reject_containing {
                Some(marker) if msg.contains(marker) => Err(generic_error!("'{}' rejected by {}", msg, self.suffix)),
                _ => Ok(()),
            }
        }

        fn process(&self, msg: &String) -> Result<String, GenericError> {
            self.processed.fetch_add(1, SeqCst);
            match self.fail_on {
                Some(marker) if msg.contains(marker) => Err(generic_error!("{} choked on '{}'", self.suffix, msg)),
                _ => Ok(format!("{}{}", msg, self.suffix)),
            }
        }
    }

    /// Adds a signed offset to integer messages.
    pub struct Shift(pub i64);

    #[async_trait]
    impl Task for Shift {
        fn name(&self) -> &str {
            if self.0 < 0 {
                "decrement"
            } else {
                "increment"
            }
        }

        async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
            Ok(())
        }
    }

    impl DataProcessor<i64> for Shift {
        fn process(&self, msg: &i64) -> Result<i64, GenericError> {
            Ok(msg + self.0)
        }
    }
}
