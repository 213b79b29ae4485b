//! Task supervision.
//!
//! A [`Supervisor`] owns a set of [`Task`]s. Each task is initialized once and then polled periodically, on its own
//! loop, until it is unregistered, fails, or the supervisor is destroyed.

mod options;
pub use self::options::{ErrorCallback, RegisterOptions, DEFAULT_PERIOD, DEFAULT_PRIORITY};

mod periodic;

pub(crate) mod registry;

pub(crate) mod supervised;

mod supervisor;
pub use self::supervisor::{Supervisor, SupervisorError};

mod task;
pub use self::task::{Task, TaskArgs, TaskId};
