use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::monitor::Monitor;
use crate::scheduler::Scheduler;

/// Build the task body shared by the startup and recurring poll jobs
fn poll_task(
    monitor: Arc<Monitor>,
    cancel: CancellationToken,
) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
    move || {
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            if cancel.is_cancelled() {
                info!("Shutdown in progress, not starting poll cycle");
                return;
            }
            // Overlapping runs are skipped inside run_cycle
            let _ = monitor.run_cycle(&cancel).await;
        })
    }
}

/// Register the poll cycle: once shortly after startup, then on a fixed interval
pub async fn register_poll_tasks(
    scheduler: &Scheduler,
    monitor: Arc<Monitor>,
    cancel: CancellationToken,
    startup_delay: Duration,
    interval: Duration,
) -> anyhow::Result<()> {
    scheduler
        .add_one_shot_job(
            startup_delay,
            "initial-poll",
            poll_task(monitor.clone(), cancel.clone()),
        )
        .await?;

    scheduler
        .add_repeated_job(interval, "poll", poll_task(monitor, cancel))
        .await?;

    Ok(())
}
