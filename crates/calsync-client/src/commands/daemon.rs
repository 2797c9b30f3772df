//! `calsync daemon`: periodic sync in the foreground.

use std::sync::Arc;
use std::time::Duration;

use calsync_engine::{Scheduler, SchedulerConfig, SyncService, sync_round};
use tracing::{info, warn};

use crate::error::ClientResult;

/// Runs sync rounds until Ctrl-C.
pub async fn run(service: SyncService, config: SchedulerConfig) -> ClientResult<()> {
    let service = Arc::new(service);
    let scheduler = Scheduler::new(config);
    let handle = scheduler.handle();

    info!(user = service.user_id(), "daemon starting");

    let round_service = service.clone();
    let mut task = tokio::spawn(async move {
        scheduler
            .run(move |deadline| {
                let service = round_service.clone();
                async move { sync_round(&service, deadline).await }
            })
            .await;
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutting down");
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "failed to stop the scheduler");
            }
            if tokio::time::timeout(Duration::from_secs(10), &mut task).await.is_err() {
                warn!("sync round still running, aborting it");
                task.abort();
            }
        }
        _ = &mut task => {}
    }

    let state = handle.snapshot().await;
    info!(
        rounds = state.rounds,
        failures = state.consecutive_failures,
        "daemon stopped"
    );
    Ok(())
}
