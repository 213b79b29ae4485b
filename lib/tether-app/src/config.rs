//! Runtime configuration.

use std::{path::Path, time::Duration};

use serde::Deserialize;
use tether_config::{ConfigurationError, ConfigurationLoader};
use tether_core::{pool::WorkerPoolConfiguration, runtime::DEFAULT_PERIOD};

/// Prefix of environment variables read into [`RuntimeConfiguration`].
///
/// Nested keys are separated by a double underscore, so `TETHER_WORKER_POOL__CAPACITY` sets `worker_pool.capacity`.
pub const ENV_PREFIX: &str = "TETHER";

const fn default_task_period_ms() -> u64 {
    DEFAULT_PERIOD.as_millis() as u64
}

/// Process-level runtime configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfiguration {
    /// Configuration of the worker pool that runs error callbacks.
    #[serde(default)]
    pub worker_pool: WorkerPoolConfiguration,

    /// Default polling period for supervised tasks, in milliseconds.
    ///
    /// Defaults to 1. Zero also selects the default.
    #[serde(default = "default_task_period_ms")]
    pub default_task_period_ms: u64,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            worker_pool: WorkerPoolConfiguration::default(),
            default_task_period_ms: default_task_period_ms(),
        }
    }
}

impl RuntimeConfiguration {
    /// Loads the runtime configuration.
    ///
    /// Values are layered, with later sources overriding earlier ones: built-in defaults, then the file at `path` if
    /// one is given, then `TETHER_`-prefixed environment variables. Files ending in `.json` are read as JSON and
    /// everything else as YAML.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, or if the merged configuration is invalid, an error is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let loader = ConfigurationLoader::default();
        let loader = match path {
            Some(path) if is_json(path) => loader.from_json(path)?,
            Some(path) => loader.from_yaml(path)?,
            None => loader,
        };

        loader.from_environment(ENV_PREFIX)?.into_typed()
    }

    /// Returns the default polling period for supervised tasks.
    pub fn default_task_period(&self) -> Duration {
        match self.default_task_period_ms {
            0 => DEFAULT_PERIOD,
            ms => Duration::from_millis(ms),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
