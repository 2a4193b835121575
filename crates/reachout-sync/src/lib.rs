//! Outreach orchestration: dispatch, reply reconciliation, bounce scanning,
//! job search and the cron schedule that drives them.

use std::future::Future;
use std::time::Duration;

use reachout_core::OutreachError;
use tokio_util::sync::CancellationToken;

pub mod bounce;
pub mod config;
pub mod dispatch;
pub mod jobs;
pub mod reconcile;
pub mod scheduler;
pub mod services;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

pub use bounce::{BounceReport, BounceScanner};
pub use config::{AppConfig, SenderProfile};
pub use dispatch::{
    AttachmentSet, DispatchReport, DispatchSettings, DispatchStage, Dispatcher, RecordOutcome,
    RecordResult,
};
pub use jobs::{JobSearch, SearchRequest, SearchResult};
pub use reconcile::{CategoryReport, ReconcileFailure, ReconcileReport, Reconciler};
pub use scheduler::build_scheduler;
pub use services::Services;

pub const CRATE_NAME: &str = "reachout-sync";

/// Runs `fut` with a deadline and folds both failure kinds into the taxonomy.
pub(crate) async fn with_timeout<T, E, F>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T, OutreachError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<OutreachError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(OutreachError::timeout(operation, limit)),
    }
}

/// Sleeps for `period` unless the token fires first.
pub(crate) async fn cancellable_sleep(
    cancel: &CancellationToken,
    period: Duration,
) -> Result<(), OutreachError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(OutreachError::Cancelled),
        _ = tokio::time::sleep(period) => Ok(()),
    }
}
