//! Periodic task runner
//!
//! Each task gets its own loop. The first run happens one interval after
//! start. A run that overruns pushes the next one back instead of queueing
//! catch-up runs. Shutdown is observed between runs; a run in progress is
//! allowed to finish and `drain` bounds how long shutdown waits for that.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::MAX_PERIOD_SECS;

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One run. Errors are logged inside; nothing propagates to the loop.
    async fn tick(&self);
}

pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    every: Duration,
    ctx: CancellationToken,
) -> JoinHandle<()> {
    // interval_at panics on a zero period or a deadline past Instant's range
    let every = every.clamp(Duration::from_millis(1), Duration::from_secs(MAX_PERIOD_SECS));

    tokio::spawn(async move {
        let name = task.name();
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(task = name, interval_secs = every.as_secs_f64(), "Periodic task started");

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tracing::info!(task = name, "Received shutdown signal, stopping periodic task");
                    break;
                }
                _ = ticker.tick() => {
                    if AssertUnwindSafe(task.tick()).catch_unwind().await.is_err() {
                        tracing::error!(task = name, "Periodic run panicked");
                    }
                }
            }
        }
    })
}

/// Wait up to `grace` for the workers and tracked connections to finish,
/// then abort the workers still running. Returns whether everything
/// finished in time.
pub async fn drain(workers: Vec<JoinHandle<()>>, connections: &TaskTracker, grace: Duration) -> bool {
    let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
    connections.close();

    let everything = async {
        futures_util::future::join_all(workers).await;
        connections.wait().await;
    };

    if tokio::time::timeout(grace, everything).await.is_ok() {
        return true;
    }

    tracing::warn!(
        grace_secs = grace.as_secs(),
        connections = connections.len(),
        "Shutdown grace period elapsed, aborting remaining tasks"
    );
    for abort in aborts {
        abort.abort();
    }
    false
}
