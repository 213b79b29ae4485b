//! Supervises a few periodic tasks, one of which eventually fails and is reported through its error callback.
//!
//! Run with `RUST_LOG=debug` to see the supervisor's lifecycle logging.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tether_core::{
    pool::{WorkerPool, WorkerPoolOptions},
    runtime::{RegisterOptions, Supervisor, Task, TaskArgs},
};
use tether_error::{generic_error, GenericError};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Counts ticks and reports every tenth one.
struct Ticker {
    label: &'static str,
    ticks: AtomicU64,
}

#[async_trait]
impl Task for Ticker {
    fn name(&self) -> &str {
        self.label
    }

    async fn init(&self, args: &TaskArgs) -> Result<(), GenericError> {
        let start = args.get::<u64>(0).copied().unwrap_or_default();
        self.ticks.store(start, Relaxed);
        info!(task = self.label, start, "Ticker initialized.");
        Ok(())
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        let ticks = self.ticks.fetch_add(1, Relaxed) + 1;
        if ticks % 10 == 0 {
            info!(task = self.label, ticks, "Tick.");
        }
        Ok(())
    }

    fn destroy(&self) {
        info!(task = self.label, ticks = self.ticks.load(Relaxed), "Ticker destroyed.");
    }
}

/// Fails after a fixed number of polls.
struct Lease {
    remaining: AtomicU64,
}

#[async_trait]
impl Task for Lease {
    fn name(&self) -> &str {
        "lease"
    }

    async fn run_once(&self, _token: &CancellationToken) -> Result<(), GenericError> {
        match self.remaining.fetch_sub(1, Relaxed) {
            0 => Err(generic_error!("lease expired")),
            _ => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), GenericError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let callbacks = WorkerPool::new(4, WorkerPoolOptions::default().with_name("callbacks"))?;
    let supervisor = Supervisor::new("example")?.with_worker_pool(callbacks.clone());

    for (label, priority, period_ms) in [("fast", 1, 20), ("slow", 2, 100)] {
        let ticker = Ticker {
            label,
            ticks: AtomicU64::new(0),
        };
        let options = RegisterOptions::default()
            .with_priority(priority)
            .with_alias("ticker")
            .with_period(Duration::from_millis(period_ms));
        supervisor
            .register(Arc::new(ticker), options, TaskArgs::new().with(100_u64))
            .await?;
    }

    let lease = Lease {
        remaining: AtomicU64::new(25),
    };
    let options = RegisterOptions::default()
        .with_period(Duration::from_millis(20))
        .with_error_callback(|task: Arc<dyn Task>, error| info!(task = task.name(), %error, "Task failed and was removed."));
    supervisor.register(Arc::new(lease), options, TaskArgs::new()).await?;

    supervisor.init().await?;
    info!(
        tasks = supervisor.task_count(),
        tickers = supervisor.tasks_by_alias("ticker").len(),
        "Supervisor started."
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!(tasks = supervisor.task_count(), "Shutting down.");

    supervisor.destroy().await;
    callbacks.release_timeout(Duration::from_secs(1)).await?;
    Ok(())
}
