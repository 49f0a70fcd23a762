//! Background scheduler: runs a batch at startup and then on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::pipeline::orchestrator::PipelineOrchestrator;

/// Spawn the batch loop.
///
/// The first tick fires immediately. A tick that lands while a manual or
/// webhook run is active is skipped. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_scheduler(
    orchestrator: Arc<PipelineOrchestrator>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Scheduler started, running every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Scheduler shutting down");
                return;
            }

            run_scheduled(&orchestrator).await;
        }
    });

    (handle, shutdown_flag)
}

async fn run_scheduled(orchestrator: &PipelineOrchestrator) {
    match orchestrator.run_batch().await {
        Ok(summary) => debug!(
            run_id = %summary.run_id,
            total = summary.total(),
            "Scheduled run finished"
        ),
        Err(PipelineError::RunInProgress) => debug!("Run already in progress, skipping tick"),
        Err(e) => error!(error = %e, "Scheduled run failed"),
    }
}
