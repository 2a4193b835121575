use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScheduleConfig;
use crate::services::Services;

/// Cron jobs for the reply pass and the bounce scan, or `None` when the
/// schedule is switched off. Each run gets a child of `cancel`.
pub async fn build_scheduler(
    services: Arc<Services>,
    schedule: &ScheduleConfig,
    cancel: CancellationToken,
) -> Result<Option<JobScheduler>> {
    if !schedule.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let reconcile_services = services.clone();
    let reconcile_cancel = cancel.clone();
    let reconcile = Job::new_async(schedule.reconcile_cron.as_str(), move |_uuid, _l| {
        let services = reconcile_services.clone();
        let cancel = reconcile_cancel.child_token();
        Box::pin(async move {
            let report = services.reconciler.run(&cancel).await;
            info!(
                run_id = %report.run_id,
                checked = report.checked(),
                replies_logged = report.replies_logged(),
                "scheduled reply pass"
            );
        })
    })
    .with_context(|| format!("creating reply job for cron {}", schedule.reconcile_cron))?;
    sched.add(reconcile).await.context("adding reply job")?;

    let bounce = Job::new_async(schedule.bounce_cron.as_str(), move |_uuid, _l| {
        let services = services.clone();
        let cancel = cancel.child_token();
        Box::pin(async move {
            if cancel.is_cancelled() {
                return;
            }
            match services.bounces.run(&cancel).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    bounces = report.bounces.len(),
                    marked = report.marked.len(),
                    "scheduled bounce scan"
                ),
                Err(err) => warn!(error = %services.redact(&err.to_string()), "scheduled bounce scan failed"),
            }
        })
    })
    .with_context(|| format!("creating bounce job for cron {}", schedule.bounce_cron))?;
    sched.add(bounce).await.context("adding bounce job")?;

    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use reachout_storage::MemorySheets;

    fn schedule(enabled: bool, reconcile_cron: &str) -> ScheduleConfig {
        ScheduleConfig {
            enabled,
            reconcile_cron: reconcile_cron.into(),
            bounce_cron: "0 30 9 * * *".into(),
        }
    }

    #[tokio::test]
    async fn disabled_schedule_builds_nothing() {
        let services = Arc::new(testing::services(Arc::new(MemorySheets::new())).await);
        let sched = build_scheduler(services, &schedule(false, "garbage"), CancellationToken::new())
            .await
            .unwrap();
        assert!(sched.is_none());
    }

    #[tokio::test]
    async fn enabled_schedule_registers_both_jobs() {
        let services = Arc::new(testing::services(Arc::new(MemorySheets::new())).await);
        let sched = build_scheduler(
            services,
            &schedule(true, "0 0 */2 * * *"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(sched.is_some());
    }

    #[tokio::test]
    async fn invalid_cron_is_reported() {
        let services = Arc::new(testing::services(Arc::new(MemorySheets::new())).await);
        let err = build_scheduler(services, &schedule(true, "every tuesday"), CancellationToken::new())
            .await
            .err()
            .expect("invalid cron expression should be rejected");
        assert!(format!("{err:#}").contains("every tuesday"));
    }
}
