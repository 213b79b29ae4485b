use std::{fmt, sync::Arc};

use tether_error::GenericError;

use super::{stage_set_methods, DataProcessor, StageOptions, Stages};
use crate::runtime::{SupervisorError, TaskArgs};

/// A pipeline that fans a message out to all of its stages.
///
/// Every stage checks and processes the same input, in registration order, and the outputs are collected in that
/// order. An empty `Parallel` produces no outputs.
pub struct Parallel<M: 'static> {
    stages: Stages<M, Vec<M>>,
}

impl<M: 'static> Parallel<M> {
    /// Creates an empty `Parallel` with the given name.
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

    /// Registers a stage.
    ///
    /// If the pipeline has already started, the stage is initialized and its polling loop started before this returns.
    ///
    /// # Errors
    ///
    /// If the processor is already registered, or if it fails to initialize after the pipeline has started, an error is
    /// returned.
    pub async fn register(
        &self, processor: Arc<dyn DataProcessor<M>>, options: StageOptions<M, Vec<M>>, args: TaskArgs,
    ) -> Result<(), SupervisorError> {
        self.stages.register(processor, options, args, None).await
    }

    /// Hands `msg` to every stage and collects their outputs.
    ///
    /// # Errors
    ///
    /// If a stage rejects or fails to process the message, that stage's recovery function produces the whole result
    /// from the original message. Without one, the stage's error is returned.
    pub fn process(&self, msg: M) -> Result<Vec<M>, GenericError> {
        let mut outputs = Vec::new();
        let failure = self.stages.run(|stage| {
            stage.msg_check(&msg)?;
            outputs.push(stage.process(&msg)?);
            Ok(())
        });

        match failure {
            None => Ok(outputs),
            Some(failure) => failure.resolve(self.name(), msg),
        }
    }
}

impl<M: 'static> fmt::Debug for Parallel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parallel").field("stages", &self.stages).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc, time::timeout};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        pipeline::test_support::{Append, Shift},
        runtime::{Task, TaskArgs},
    };

    fn options() -> StageOptions<String, Vec<String>> {
        StageOptions::default().with_period(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn fans_out_in_registration_order() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        for suffix in ["-x", "-y", "-z"] {
            parallel
                .register(Arc::new(Append::new(suffix)), options(), TaskArgs::new())
                .await
                .unwrap();
        }
        parallel.init().await.unwrap();

        assert_eq!(parallel.process("m".to_string()).unwrap(), vec!["m-x", "m-y", "m-z"]);
        assert_eq!(parallel.stage_count(), 3);

        parallel.destroy().await;
    }

    #[tokio::test]
    async fn empty_parallel_produces_nothing() {
        let parallel = Parallel::<String>::new("empty").unwrap();
        assert!(parallel.process("m".to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_processor_rejected() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        let stage = Arc::new(Append::new("-x"));
        parallel.register(stage.clone(), options(), TaskArgs::new()).await.unwrap();
        let result = parallel.register(stage, options(), TaskArgs::new()).await;
        assert!(matches!(result, Err(SupervisorError::DuplicateRegistration { .. })));
    }

    #[tokio::test]
    async fn recovery_replaces_whole_result() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        let failing = Append {
            suffix: "-y",
            fail_on: Some("m"),
            ..Default::default()
        };
        let recover = options().with_recovery(|msg: String, _error| Ok(vec![format!("{}-fallback", msg)]));
        parallel.register(Arc::new(Append::new("-x")), options(), TaskArgs::new()).await.unwrap();
        parallel.register(Arc::new(failing), recover, TaskArgs::new()).await.unwrap();
        parallel.register(Arc::new(Append::new("-z")), options(), TaskArgs::new()).await.unwrap();

        assert_eq!(parallel.process("m".to_string()).unwrap(), vec!["m-fallback"]);
    }

    #[tokio::test]
    async fn failure_skips_remaining_stages() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        let failing = Append {
            suffix: "-x",
            fail_on: Some("m"),
            ..Default::default()
        };
        let rest = Arc::new(Append::new("-y"));
        parallel.register(Arc::new(failing), options(), TaskArgs::new()).await.unwrap();
        parallel.register(rest.clone(), options(), TaskArgs::new()).await.unwrap();

        let error = parallel.process("m".to_string()).unwrap_err();
        assert!(error.to_string().contains("-x choked on 'm'"));
        assert_eq!(rest.processed(), 0);
    }

    #[tokio::test]
    async fn every_stage_sees_original_input() {
        let parallel = Parallel::<i64>::new("arithmetic").unwrap();
        for delta in [1, -1] {
            parallel
                .register(Arc::new(Shift(delta)), StageOptions::default(), TaskArgs::new())
                .await
                .unwrap();
        }

        assert_eq!(parallel.process(10).unwrap(), vec![11, 9]);
    }

    #[tokio::test]
    async fn rejection_without_recovery_returns_error() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        let picky = Append {
            suffix: "-x",
            reject_containing: Some("spam"),
            ..Default::default()
        };
        parallel.register(Arc::new(picky), options(), TaskArgs::new()).await.unwrap();

        assert_eq!(parallel.process("ham".to_string()).unwrap(), vec!["ham-x"]);
        let error = parallel.process("spam".to_string()).unwrap_err();
        assert!(error.to_string().contains("rejected by -x"));
    }

    struct Expiring;

    #[async_trait::async_trait]
    impl Task for Expiring {
        async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
            Err(tether_error::generic_error!("lease expired"))
        }
    }

    impl DataProcessor<String> for Expiring {
        fn process(&self, msg: &String) -> Result<String, GenericError> {
            Ok(msg.clone())
        }
    }

    #[tokio::test]
    async fn failing_stage_reported_through_callback() {
        let parallel = Parallel::<String>::new("fan-out").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = options().with_error_callback(move |stage, error| {
            let _ = tx.send((stage.name().to_string(), error.to_string()));
        });
        let stage = Arc::new(Expiring);
        parallel.register(stage.clone(), options, TaskArgs::new()).await.unwrap();
        parallel.init().await.unwrap();

        let (name, error) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(name.ends_with("Expiring"));
        assert_eq!(error, "lease expired");
        assert!(!parallel.contains(&stage));
        assert!(parallel.process("m".to_string()).unwrap().is_empty());

        parallel.destroy().await;
    }
}
