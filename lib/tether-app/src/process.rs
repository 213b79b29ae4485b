//! Process boundary.
//!
//! Hosts a root task for the lifetime of the process: the root is supervised until the process receives a termination
//! signal (SIGINT or SIGTERM by default, Ctrl-C on non-Unix platforms), or until an external shutdown token is
//! cancelled, and then everything is torn down in order.

use std::sync::Arc;

use tether_core::{
    pool::{global, WorkerPool},
    runtime::{RegisterOptions, Supervisor, Task, TaskArgs},
};
use tether_error::{ErrorContext as _, GenericError};
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs a root task until shutdown.
pub struct ProcessBoundary {
    name: String,
    worker_pool: Option<WorkerPool>,
    shutdown: Option<CancellationToken>,
    handle_signals: bool,
    #[cfg(unix)]
    signals: Vec<SignalKind>,
}

impl ProcessBoundary {
    /// Creates a new `ProcessBoundary` with the given name.
    ///
    /// The name is used for the root supervisor.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            worker_pool: None,
            shutdown: None,
            handle_signals: true,
            #[cfg(unix)]
            signals: vec![SignalKind::interrupt(), SignalKind::terminate()],
        }
    }

    /// Sets the worker pool used for error callbacks.
    ///
    /// The pool is released on shutdown. Without one, the process-wide default pool is used, and released instead.
    pub fn with_worker_pool(mut self, pool: WorkerPool) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    /// Sets an external shutdown token.
    ///
    /// Cancelling the token shuts the process boundary down, exactly like receiving a termination signal. The root
    /// task's polling loop is also cancelled through it.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Sets whether termination signals trigger shutdown.
    ///
    /// Defaults to `true`.
    pub fn with_signal_handling(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    /// Sets the signals that trigger shutdown, replacing the default of SIGINT and SIGTERM.
    ///
    /// An empty set disables signal handling.
    #[cfg(unix)]
    pub fn with_signals<I>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = SignalKind>,
    {
        self.signals = signals.into_iter().collect();
        self
    }

    /// Supervises `root` until shutdown.
    ///
    /// Registers and initializes the root task, waits for a termination signal or for the shutdown token to be
    /// cancelled, then destroys the root supervisor and releases the worker pool.
    ///
    /// # Errors
    ///
    /// If signal handlers cannot be installed, or if the root task cannot be registered or initialized, an error is
    /// returned. Everything set up so far is torn down first.
    pub async fn run(
        self, root: Arc<dyn Task>, options: RegisterOptions<dyn Task>, args: TaskArgs,
    ) -> Result<(), GenericError> {
        let shutdown = self.shutdown.clone().unwrap_or_default();
        let mut supervisor = Supervisor::new(self.name.as_str())?.with_parent_token(shutdown.clone());
        if let Some(pool) = &self.worker_pool {
            supervisor = supervisor.with_worker_pool(pool.clone());
        }

        let signal_handlers = if self.handle_signals {
            Some(self.spawn_signal_handlers(&shutdown).error_context("Failed to configure signal handlers.")?)
        } else {
            None
        };

        let root_name = root.name().to_string();
        let started = async {
            supervisor.register(root, options, args).await?;
            supervisor.init().await
        }
        .await;

        match &started {
            Ok(()) => {
                info!(process = %self.name, root = %root_name, "Process started.");
                shutdown.cancelled().await;
                info!(process = %self.name, "Shutting down...");
            }
            Err(e) => error!(process = %self.name, root = %root_name, error = %e, "Process failed to start."),
        }

        drop(signal_handlers);
        supervisor.destroy().await;
        self.release_pool();

        started?;
        info!(process = %self.name, "Process stopped.");
        Ok(())
    }

    #[cfg(unix)]
    fn spawn_signal_handlers(&self, shutdown: &CancellationToken) -> Result<JoinSet<()>, GenericError> {
        use tokio::signal::unix::signal;

        let mut handlers = JoinSet::new();
        for &kind in &self.signals {
            let mut stream = signal(kind)
                .with_error_context(|| format!("Failed to set up handler for signal {}.", kind.as_raw_value()))?;
            let shutdown = shutdown.clone();
            handlers.spawn(async move {
                tokio::select! {
                    _ = stream.recv() => info!(signal = kind.as_raw_value(), "Received signal, shutting down..."),
                    _ = shutdown.cancelled() => return,
                }
                shutdown.cancel();
            });
        }
        Ok(handlers)
    }

    #[cfg(not(unix))]
    fn spawn_signal_handlers(&self, shutdown: &CancellationToken) -> Result<JoinSet<()>, GenericError> {
        let shutdown = shutdown.clone();
        let mut handlers = JoinSet::new();
        handlers.spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Received Ctrl-C, shutting down..."),
                    Err(e) => {
                        error!(error = %e, "Failed to listen for Ctrl-C. Signal handling disabled.");
                        return;
                    }
                },
                _ = shutdown.cancelled() => return,
            }
            shutdown.cancel();
        });
        Ok(handlers)
    }

    fn release_pool(&self) {
        match &self.worker_pool {
            Some(pool) => pool.release(),
            None => global::release(),
        }
    }
}
