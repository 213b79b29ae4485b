use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::FutureExt as _;
use tether_error::panic_to_error;
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{supervised::SupervisedSet, Task, TaskId};

/// Polls a task until it is stopped or fails.
///
/// Each iteration waits for whichever comes first: the task's exit signal, cancellation of the whole set, or the
/// period elapsing. A failing `run_once` (including a panic) removes the task from its set.
pub(crate) async fn run_periodic<T, X>(
    set: Weak<SupervisedSet<T, X>>, id: TaskId, task: Arc<T>, period: Duration, exit: CancellationToken,
    root: CancellationToken,
) where
    T: ?Sized + Task,
    X: Send + Sync + 'static,
{
    debug!(period_ms = period.as_millis() as u64, "Task loop started.");

    loop {
        select! {
            _ = exit.cancelled() => {
                debug!("Task stopped.");
                break;
            }
            _ = root.cancelled() => {
                debug!("Supervisor cancelled. Task loop exiting.");
                break;
            }
            _ = sleep(period) => {}
        }

        let result = match AssertUnwindSafe(task.run_once(&exit)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(panic_to_error(payload)),
        };

        if let Err(e) = result {
            warn!(error = %e, "Task failed. Removing it from its supervisor.");
            if let Some(set) = set.upgrade() {
                set.fail(id, task, e).await;
            }
            break;
        }
    }
}
