use std::{fmt, sync::Arc};

use tether_error::GenericError;

use super::{stage_set_methods, DataProcessor, StageOptions, Stages};
use crate::runtime::{SupervisorError, TaskArgs};

/// A pipeline that chains its stages.
///
/// Stages are ordered by an explicit, unique position. A message is checked and processed by each stage in ascending
/// order, with each stage receiving the previous stage's output. An empty sequence returns its input unchanged.
pub struct Sequence<M: 'static> {
    stages: Stages<M, M>,
}

impl<M: 'static> Sequence<M> {
    /// Creates an empty `Sequence` with the given name.
    ///
    /// # Errors
    ///
    /// If the name is empty, an error is returned.
    pub fn new<S: Into<String>>(name: S) -> Result<Self, SupervisorError> {
        Ok(Self {
            stages: Stages::new(name.into())?,
        })
    }

    stage_set_methods!();

    /// Registers a stage at position `order`.
    ///
    /// If the sequence has already started, the stage is initialized and its polling loop started before this returns.
    ///
    /// # Errors
    ///
    /// If another stage already holds `order`, if the processor is already registered, or if it fails to initialize
    /// after the sequence has started, an error is returned.
    pub async fn register(
        &self, order: u32, processor: Arc<dyn DataProcessor<M>>, options: StageOptions<M, M>, args: TaskArgs,
    ) -> Result<(), SupervisorError> {
        self.stages.register(processor, options, args, Some(order)).await
    }

    /// Returns the stage registered at position `order`, if any.
    pub fn stage_by_order(&self, order: u32) -> Option<Arc<dyn DataProcessor<M>>> {
        self.stages.find_by_order(order)
    }

    /// Runs `msg` through every stage, in order.
    ///
    /// # Errors
    ///
    /// If a stage rejects or fails to process the message it was given, that stage's recovery function decides the
    /// result. Without one, the stage's error is returned.
    pub fn process(&self, msg: M) -> Result<M, GenericError> {
        let mut current = msg;
        let failure = self.stages.run(|stage| {
            stage.msg_check(&current)?;
            current = stage.process(&current)?;
            Ok(())
        });

        match failure {
            None => Ok(current),
            Some(failure) => failure.resolve(self.name(), current),
        }
    }
}

impl<M: 'static> fmt::Debug for Sequence<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence").field("stages", &self.stages).finish()
    }
}
