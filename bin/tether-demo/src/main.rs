//! A small service that supervises a heartbeat task until it receives SIGINT or SIGTERM.
//!
//! The heartbeat pushes a counter through a sequence of arithmetic stages on every tick. An optional path to a YAML
//! configuration file may be given as the first argument; `TETHER_`-prefixed environment variables override it.

#![deny(warnings)]
#![deny(missing_docs)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use tether_app::{config::RuntimeConfiguration, logging::initialize_logging, process::ProcessBoundary};
use tether_core::runtime::{RegisterOptions, Task, TaskArgs};
use tether_error::{ErrorContext as _, GenericError};
use tracing::{error, info, warn};

mod heartbeat;
use self::heartbeat::Heartbeat;

const STAGE_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    if let Err(e) = initialize_logging(None) {
        eprintln!("FATAL: failed to initialize logging: {:?}", e);
        std::process::exit(1);
    }

    match run().await {
        Ok(()) => info!("tether-demo stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), GenericError> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = RuntimeConfiguration::load(config_path.as_deref()).error_context("Failed to load configuration.")?;

    let pool = config
        .worker_pool
        .build("tether-demo")
        .error_context("Failed to create worker pool.")?;

    info!(
        pool_capacity = pool.cap(),
        period_ms = config.default_task_period().as_millis() as u64,
        "tether-demo starting..."
    );

    let options = RegisterOptions::default()
        .with_alias("heartbeat")
        .with_period(config.default_task_period())
        .with_error_callback(|task: Arc<dyn Task>, error| warn!(task = task.name(), %error, "Heartbeat failed and was removed."));
    let args = TaskArgs::new().with(STAGE_PERIOD);

    ProcessBoundary::new("tether-demo")
        .with_worker_pool(pool)
        .run(Arc::new(Heartbeat::new()?), options, args)
        .await
}
