//! Bounce scan: finds delivery failures in the inbox and marks the leads.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use reachout_core::{new_run_id, BounceNotice, LeadStatus, OutreachError};
use reachout_mail::{parse_bounce, Mailbox};
use reachout_storage::StatusLog;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::with_timeout;

#[derive(Debug, Clone, Serialize)]
pub struct BounceFailure {
    pub address: String,
    pub error: OutreachError,
}

#[derive(Debug, Clone, Serialize)]
pub struct BounceReport {
    pub run_id: Uuid,
    pub scanned: usize,
    pub unparsable: usize,
    pub bounces: Vec<BounceNotice>,
    pub marked: Vec<String>,
    /// Bounced addresses with no row in the lead sheet.
    pub unmatched: Vec<String>,
    pub failures: Vec<BounceFailure>,
    /// Bounces left unmarked because the scan was cancelled.
    pub skipped: Vec<String>,
    pub cancelled: bool,
    pub success: bool,
}

impl BounceReport {
    pub fn message(&self) -> String {
        format!(
            "Scanned {} message(s), found {} bounce(s), marked {} lead(s)",
            self.scanned,
            self.bounces.len(),
            self.marked.len()
        )
    }
}

pub struct BounceScanner {
    mailbox: Arc<dyn Mailbox>,
    log: Arc<StatusLog>,
    call_timeout: Duration,
}

impl BounceScanner {
    pub fn new(mailbox: Arc<dyn Mailbox>, log: Arc<StatusLog>, call_timeout: Duration) -> Self {
        Self {
            mailbox,
            log,
            call_timeout,
        }
    }

    /// Fetches the inbox, collects each distinct bounced address once and
    /// marks it through the status log. Failing to reach the mailbox fails
    /// the scan; a lead that cannot be marked is reported and skipped.
    ///
    /// Cancelling before the inbox arrives fails the scan with
    /// [`OutreachError::Cancelled`]; cancelling while marking leaves the
    /// remaining bounces in `skipped`.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BounceReport, OutreachError> {
        let run_id = new_run_id();
        async move {
            if cancel.is_cancelled() {
                return Err(OutreachError::Cancelled);
            }
            let fetch = with_timeout("fetching inbox", self.call_timeout, self.mailbox.fetch_all());
            let raws = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OutreachError::Cancelled),
                raws = fetch => raws?,
            };

            let mut unparsable = 0;
            let mut seen = BTreeSet::new();
            let mut bounces = Vec::new();
            for raw in &raws {
                match parse_bounce(raw) {
                    Ok(Some(notice)) => {
                        if seen.insert(notice.bounced_address.to_ascii_lowercase()) {
                            bounces.push(notice);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        unparsable += 1;
                        debug!(%err, "skipping unparsable message");
                    }
                }
            }

            let mut marked = Vec::new();
            let mut unmatched = Vec::new();
            let mut failures = Vec::new();
            let mut skipped = Vec::new();
            for notice in &bounces {
                let address = notice.bounced_address.clone();
                if cancel.is_cancelled() {
                    skipped.push(address);
                    continue;
                }
                let result = with_timeout(
                    "marking bounced lead",
                    self.call_timeout,
                    self.log.mark_lead(&address, LeadStatus::Bounced),
                )
                .await;
                match result {
                    Ok(update) => {
                        info!(%address, cell = %update.cell, "marked bounce");
                        marked.push(address);
                    }
                    Err(OutreachError::Lookup(_)) => {
                        debug!(%address, "bounced address is not a lead");
                        unmatched.push(address);
                    }
                    Err(error) => {
                        warn!(%address, %error, "could not mark bounce");
                        failures.push(BounceFailure { address, error });
                    }
                }
            }

            let cancelled = !skipped.is_empty();
            let report = BounceReport {
                run_id,
                scanned: raws.len(),
                unparsable,
                success: failures.is_empty() && !cancelled,
                bounces,
                marked,
                unmatched,
                failures,
                skipped,
                cancelled,
            };
            info!(
                scanned = report.scanned,
                bounces = report.bounces.len(),
                marked = report.marked.len(),
                unmatched = report.unmatched.len(),
                skipped = report.skipped.len(),
                "bounce scan finished"
            );
            Ok::<_, OutreachError>(report)
        }
        .instrument(info_span!("bounce_scan", %run_id))
        .await
    }
}
