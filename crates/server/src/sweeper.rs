use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use quoteflow_core::{ApprovalEngine, ApprovalStore, WorkflowCatalog};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Calls the engine's timeout tick every `period` until `shutdown` resolves.
/// The first tick fires immediately. Returns the number of completed ticks.
pub async fn run<S, C, F>(engine: Arc<ApprovalEngine<S, C>>, period: Duration, shutdown: F) -> u64
where
    S: ApprovalStore,
    C: WorkflowCatalog,
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        event_name = "system.sweeper.start",
        correlation_id = "sweeper",
        period_secs = period.as_secs_f64(),
        "approval timeout sweeper started"
    );

    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                match engine.on_timeout_tick().await {
                    Ok(report) if !report.resolved_step_ids.is_empty()
                        || !report.failed_approval_ids.is_empty() =>
                    {
                        info!(
                            event_name = "system.sweeper.tick",
                            correlation_id = "sweeper",
                            resolved = report.resolved_step_ids.len(),
                            conflicted = report.conflicted_approval_ids.len(),
                            failed = report.failed_approval_ids.len(),
                            "sweep tick resolved overdue steps"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(
                            event_name = "system.sweeper.error",
                            correlation_id = "sweeper",
                            error_class = error.error_class(),
                            error = %error,
                            "sweep tick failed; retrying next period"
                        );
                    }
                }
                ticks += 1;
            }
        }
    }

    info!(
        event_name = "system.sweeper.stopped",
        correlation_id = "sweeper",
        ticks,
        "approval timeout sweeper stopped"
    );
    ticks
}
