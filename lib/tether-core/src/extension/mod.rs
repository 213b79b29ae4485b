//! Extension loading.
//!
//! An extension is a task obtained by name at runtime rather than constructed by the caller. Loaders implement
//! [`ExtensionLoader`]; [`StaticExtensionRegistry`] is the in-process implementation, resolving names to task factories
//! or to a set of exported task functions.

use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use snafu::{ResultExt as _, Snafu};
use tether_error::GenericError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    collections::FastIndexMap,
    runtime::{Task, TaskArgs},
};

/// Extension errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ExtensionError {
    /// No extension is known by the given name.
    #[snafu(display("Extension '{}' not found.", name))]
    NotFound {
        /// Name of the extension.
        name: String,
    },

    /// The extension does not export every required function.
    #[snafu(display("Extension '{}' is missing required export '{}'.", name, export))]
    MissingExport {
        /// Name of the extension.
        name: String,

        /// Name of the missing export.
        export: &'static str,
    },

    /// The extension failed to produce a task.
    #[snafu(display("Extension '{}' failed to load: {}", name, source))]
    Load {
        /// Name of the extension.
        name: String,

        /// The error returned by the extension.
        source: GenericError,
    },
}

/// Loads tasks by name.
pub trait ExtensionLoader: Send + Sync {
    /// Loads the extension called `name`.
    ///
    /// # Errors
    ///
    /// If the extension is unknown, incomplete, or fails to load, an error is returned.
    fn load(&self, name: &str) -> Result<Arc<dyn Task>, ExtensionError>;
}

type InitFn = Arc<dyn Fn(&TaskArgs) -> Result<(), GenericError> + Send + Sync>;
type RunOnceFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), GenericError>> + Send + Sync>;
type DestroyFn = Arc<dyn Fn() + Send + Sync>;
type UserDataFn = Arc<dyn Fn() -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync>;
type Factory = Arc<dyn Fn() -> Result<Arc<dyn Task>, GenericError> + Send + Sync>;

/// The functions an extension exports in place of a [`Task`] implementation.
///
/// All four functions are required. An extension missing any of them fails to load.
#[derive(Clone, Default)]
pub struct ExtensionExports {
    init: Option<InitFn>,
    run_once: Option<RunOnceFn>,
    destroy: Option<DestroyFn>,
    user_data: Option<UserDataFn>,
}

impl ExtensionExports {
    /// Sets the `init` export.
    pub fn with_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskArgs) -> Result<(), GenericError> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    /// Sets the `run_once` export.
    pub fn with_run_once<F>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, Result<(), GenericError>> + Send + Sync + 'static,
    {
        self.run_once = Some(Arc::new(f));
        self
    }

    /// Sets the `destroy` export.
    pub fn with_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(f));
        self
    }

    /// Sets the `user_data` export.
    pub fn with_user_data<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync + 'static,
    {
        self.user_data = Some(Arc::new(f));
        self
    }

    fn resolve(&self, name: &str) -> Result<ExportedTask, ExtensionError> {
        fn require<T: Clone>(export: &Option<T>, name: &str, export_name: &'static str) -> Result<T, ExtensionError> {
            export.clone().ok_or_else(|| ExtensionError::MissingExport {
                name: name.to_string(),
                export: export_name,
            })
        }

        Ok(ExportedTask {
            name: name.to_string(),
            init: require(&self.init, name, "init")?,
            run_once: require(&self.run_once, name, "run_once")?,
            destroy: require(&self.destroy, name, "destroy")?,
            user_data: require(&self.user_data, name, "user_data")?,
        })
    }
}

impl fmt::Debug for ExtensionExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionExports")
            .field("init", &self.init.is_some())
            .field("run_once", &self.run_once.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// A task assembled from an extension's exports.
struct ExportedTask {
    name: String,
    init: InitFn,
    run_once: RunOnceFn,
    destroy: DestroyFn,
    user_data: UserDataFn,
}

#[async_trait]
impl Task for ExportedTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, args: &TaskArgs) -> Result<(), GenericError> {
        (self.init)(args)
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), GenericError> {
        (self.run_once)(token.clone()).await
    }

    fn destroy(&self) {
        (self.destroy)()
    }

    fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        (self.user_data)()
    }
}

#[derive(Clone)]
enum Entry {
    Factory(Factory),
    Exports(ExtensionExports),
}

/// An in-process extension registry.
///
/// Extensions are registered up front, either as a factory producing a [`Task`] or as a set of
/// [`ExtensionExports`]. Each call to [`load`][ExtensionLoader::load] produces a fresh task.
#[derive(Clone, Default)]
pub struct StaticExtensionRegistry {
    entries: FastIndexMap<String, Entry>,
}

impl StaticExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension backed by a task factory.
    ///
    /// Replaces any extension previously registered under `name`.
    pub fn with_factory<S, F>(mut self, name: S, factory: F) -> Self
    where
        S: Into<String>,
        F: Fn() -> Result<Arc<dyn Task>, GenericError> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Entry::Factory(Arc::new(factory)));
        self
    }

    /// Registers an extension backed by exported functions.
    ///
    /// Replaces any extension previously registered under `name`. Missing exports are only reported at load time.
    pub fn with_exports<S: Into<String>>(mut self, name: S, exports: ExtensionExports) -> Self {
        self.entries.insert(name.into(), Entry::Exports(exports));
        self
    }

    /// Returns the names of all registered extensions, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl ExtensionLoader for StaticExtensionRegistry {
    fn load(&self, name: &str) -> Result<Arc<dyn Task>, ExtensionError> {
        let entry = self.entries.get(name).ok_or_else(|| ExtensionError::NotFound {
            name: name.to_string(),
        })?;

        let task = match entry {
            Entry::Factory(factory) => factory().context(Load { name })?,
            Entry::Exports(exports) => Arc::new(exports.resolve(name)?) as Arc<dyn Task>,
        };

        debug!(extension = name, task = task.name(), "Loaded extension.");
        Ok(task)
    }
}

impl fmt::Debug for StaticExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
