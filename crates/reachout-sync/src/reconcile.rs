//! Reply pass: walks the sent log and records threads someone answered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reachout_core::{
    is_resolved_id, new_run_id, OutreachError, RecordCategory, ReplyLogEntry, RowRejection,
    SentLogEntry,
};
use reachout_mail::{has_foreign_reply, MailProvider};
use reachout_storage::StatusLog;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::with_timeout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub category: RecordCategory,
    pub conversation_id: String,
    pub error: OutreachError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: RecordCategory,
    pub checked: usize,
    pub replies_logged: usize,
    /// Replies found that the reply log already held.
    pub duplicates_skipped: usize,
    /// Entries with a placeholder id, or an id seen earlier in the pass.
    pub skipped: usize,
    pub rejected_rows: Vec<RowRejection>,
    /// Set when the sent log itself could not be read.
    pub error: Option<OutreachError>,
}

impl CategoryReport {
    fn empty(category: RecordCategory) -> Self {
        Self {
            category,
            checked: 0,
            replies_logged: 0,
            duplicates_skipped: 0,
            skipped: 0,
            rejected_rows: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub categories: Vec<CategoryReport>,
    pub failures: Vec<ReconcileFailure>,
    pub cancelled: bool,
    pub success: bool,
}

impl ReconcileReport {
    pub fn checked(&self) -> usize {
        self.categories.iter().map(|c| c.checked).sum()
    }

    pub fn replies_logged(&self) -> usize {
        self.categories.iter().map(|c| c.replies_logged).sum()
    }

    pub fn message(&self) -> String {
        format!(
            "Checked {} conversation(s), logged {} new repl{}",
            self.checked(),
            self.replies_logged(),
            if self.replies_logged() == 1 { "y" } else { "ies" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    NoReply,
    Logged,
    AlreadyLogged,
}

pub struct Reconciler {
    provider: Arc<dyn MailProvider>,
    log: Arc<StatusLog>,
    concurrency: usize,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        log: Arc<StatusLog>,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            log,
            concurrency: concurrency.max(1),
            call_timeout,
        }
    }

    /// One pass over applications then referrals. A category whose sent log
    /// cannot be read is reported and the pass moves on.
    pub async fn run(&self, cancel: &CancellationToken) -> ReconcileReport {
        let run_id = new_run_id();
        async move {
            let mut categories = Vec::new();
            let mut failures = Vec::new();
            for category in RecordCategory::ALL {
                if cancel.is_cancelled() {
                    break;
                }
                let report = self.run_category(category, cancel, &mut failures).await;
                categories.push(report);
            }
            let cancelled = cancel.is_cancelled();
            let success =
                !cancelled && failures.is_empty() && categories.iter().all(|c| c.error.is_none());
            let report = ReconcileReport {
                run_id,
                categories,
                failures,
                cancelled,
                success,
            };
            info!(
                checked = report.checked(),
                replies_logged = report.replies_logged(),
                failures = report.failures.len(),
                cancelled,
                "reply pass finished"
            );
            report
        }
        .instrument(info_span!("reconcile", %run_id))
        .await
    }

    async fn run_category(
        &self,
        category: RecordCategory,
        cancel: &CancellationToken,
        failures: &mut Vec<ReconcileFailure>,
    ) -> CategoryReport {
        let mut report = CategoryReport::empty(category);
        let sent = match with_timeout(
            "reading sent log",
            self.call_timeout,
            self.log.read_sent(category),
        )
        .await
        {
            Ok(sent) => sent,
            Err(err) => {
                warn!(category = category.label(), %err, "skipping category");
                report.error = Some(err);
                return report;
            }
        };
        report.rejected_rows = sent.rejected;

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for entry in sent.entries {
            let id = entry.conversation_id.trim().to_string();
            if !is_resolved_id(&id) || !seen.insert(id) {
                report.skipped += 1;
                continue;
            }
            pending.push(entry);
        }

        let outcomes: Vec<(String, Result<CheckOutcome, OutreachError>)> = stream::iter(pending)
            .map(|entry| async move {
                let id = entry.conversation_id.clone();
                (id, self.check(category, entry).await)
            })
            .buffer_unordered(self.concurrency)
            .take_until(cancel.cancelled())
            .collect()
            .await;

        for (conversation_id, outcome) in outcomes {
            report.checked += 1;
            match outcome {
                Ok(CheckOutcome::Logged) => report.replies_logged += 1,
                Ok(CheckOutcome::AlreadyLogged) => report.duplicates_skipped += 1,
                Ok(CheckOutcome::NoReply) => {}
                Err(error) => {
                    warn!(%conversation_id, %error, "reply check failed");
                    failures.push(ReconcileFailure {
                        category,
                        conversation_id,
                        error,
                    });
                }
            }
        }
        report
    }

    async fn check(
        &self,
        category: RecordCategory,
        entry: SentLogEntry,
    ) -> Result<CheckOutcome, OutreachError> {
        let thread = with_timeout(
            "fetching thread",
            self.call_timeout,
            self.provider.fetch_thread(&entry.conversation_id),
        )
        .await?;
        if !has_foreign_reply(&thread) {
            debug!(conversation_id = %entry.conversation_id, messages = thread.len(), "no reply");
            return Ok(CheckOutcome::NoReply);
        }

        let reply = ReplyLogEntry::detected(Utc::now(), entry);
        let inserted = with_timeout(
            "logging reply",
            self.call_timeout,
            self.log.insert_reply_if_absent(category, &reply),
        )
        .await?;
        Ok(if inserted {
            CheckOutcome::Logged
        } else {
            CheckOutcome::AlreadyLogged
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{status_log, FakeProvider};
    use reachout_core::UNRESOLVED;
    use reachout_storage::MemorySheets;

    const ME: &str = "Jo <jo@example.com>";
    const THEM: &str = "Sam <sam@acme.com>";

    fn sent_row(address: &str, id: &str) -> Vec<String> {
        vec![
            "18/10/2026 - 5:04 PM".into(),
            address.into(),
            "Backend Developer".into(),
            "Acme".into(),
            format!("https://mail.google.com/mail/u/0/#inbox/{id}"),
            id.into(),
        ]
    }

    fn reconciler(provider: FakeProvider, sheets: Arc<MemorySheets>) -> Reconciler {
        Reconciler::new(
            Arc::new(provider),
            status_log(sheets),
            4,
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn only_threads_answered_by_someone_else_are_logged() {
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows(
                    "Applications_Sent",
                    vec![
                        vec!["Date".into()],
                        sent_row("a@x.com", "t-reply"),
                        sent_row("b@x.com", "t-self"),
                        sent_row("c@x.com", "t-single"),
                        sent_row("d@x.com", UNRESOLVED),
                    ],
                )
                .with_rows("Referrals_Sent", vec![sent_row("e@x.com", "t-ref")]),
        );
        let provider = FakeProvider::default()
            .with_thread("t-reply", &[ME, THEM])
            .with_thread("t-self", &[ME, ME])
            .with_thread("t-single", &[ME])
            .with_thread("t-ref", &[ME, ME, THEM]);
        let report = reconciler(provider, sheets.clone())
            .run(&CancellationToken::new())
            .await;

        assert!(report.success);
        assert_eq!(report.checked(), 4);
        assert_eq!(report.categories[0].skipped, 1);
        assert_eq!(report.replies_logged(), 2);

        let replies = sheets.rows("Replies_Recieved");
        assert_eq!(replies.len(), 1);
        let logged = ReplyLogEntry::from_row(1, &replies[0]).unwrap();
        assert_eq!(logged.conversation_id(), "t-reply");
        assert_eq!(logged.sent.recipient_address, "a@x.com");
        assert_eq!(sheets.rows("Referrals_Recieved").len(), 1);
    }

    #[tokio::test]
    async fn already_logged_reply_is_not_written_again() {
        let mut existing = vec!["17/10/2026 - 9:00 AM".to_string()];
        existing.extend(sent_row("a@x.com", "t-1"));
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows("Applications_Sent", vec![sent_row("a@x.com", "t-1")])
                .with_rows("Replies_Recieved", vec![existing])
                .with_rows("Referrals_Sent", vec![sent_row("r@x.com", "t-2")]),
        );
        let provider = FakeProvider::default().with_thread("t-1", &[ME, THEM]);
        let report = reconciler(provider, sheets.clone())
            .run(&CancellationToken::new())
            .await;

        assert_eq!(report.categories[0].duplicates_skipped, 1);
        assert_eq!(report.replies_logged(), 0);
        assert_eq!(sheets.rows("Replies_Recieved").len(), 1);
    }

    #[tokio::test]
    async fn repeated_ids_in_one_pass_are_checked_once() {
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows(
                    "Applications_Sent",
                    vec![sent_row("a@x.com", "t-1"), sent_row("a@x.com", "t-1")],
                )
                .with_rows("Referrals_Sent", vec![sent_row("r@x.com", "t-2")]),
        );
        let provider = Arc::new(FakeProvider::default().with_thread("t-1", &[ME, THEM]));
        let reconciler = Reconciler::new(
            provider.clone(),
            status_log(sheets.clone()),
            4,
            Duration::from_secs(20),
        );
        let report = reconciler.run(&CancellationToken::new()).await;

        assert_eq!(report.categories[0].checked, 1);
        assert_eq!(report.categories[0].skipped, 1);
        assert_eq!(provider.thread_fetches(), 2);
        assert_eq!(sheets.rows("Replies_Recieved").len(), 1);
    }

    #[tokio::test]
    async fn overlapping_passes_write_one_reply_row() {
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows("Applications_Sent", vec![sent_row("a@x.com", "t-1")])
                .with_rows("Referrals_Sent", vec![sent_row("r@x.com", "t-2")]),
        );
        let provider = FakeProvider::default().with_thread("t-1", &[ME, THEM]);
        let reconciler = reconciler(provider, sheets.clone());
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(reconciler.run(&cancel), reconciler.run(&cancel));

        assert_eq!(first.replies_logged() + second.replies_logged(), 1);
        assert_eq!(
            first.categories[0].duplicates_skipped + second.categories[0].duplicates_skipped,
            1
        );
        assert_eq!(sheets.rows("Replies_Recieved").len(), 1);
    }

    #[tokio::test]
    async fn unreadable_category_is_reported_and_the_pass_continues() {
        let sheets = Arc::new(
            MemorySheets::new().with_rows("Referrals_Sent", vec![sent_row("r@x.com", "t-2")]),
        );
        let provider = FakeProvider::default().with_thread("t-2", &[ME, THEM]);
        let report = reconciler(provider, sheets.clone())
            .run(&CancellationToken::new())
            .await;

        assert!(!report.success);
        assert!(matches!(
            report.categories[0].error,
            Some(OutreachError::DataSource(_))
        ));
        assert_eq!(report.categories[1].replies_logged, 1);
    }

    #[tokio::test]
    async fn thread_errors_are_collected_per_conversation() {
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows(
                    "Applications_Sent",
                    vec![sent_row("a@x.com", "t-gone"), sent_row("b@x.com", "t-ok")],
                )
                .with_rows("Referrals_Sent", vec![sent_row("r@x.com", "t-2")]),
        );
        let provider = FakeProvider::default()
            .failing_thread("t-gone")
            .with_thread("t-ok", &[ME, THEM]);
        let report = reconciler(provider, sheets.clone())
            .run(&CancellationToken::new())
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].conversation_id, "t-gone");
        assert!(matches!(report.failures[0].error, OutreachError::Transport(_)));
        assert_eq!(report.categories[0].replies_logged, 1);
    }

    #[tokio::test]
    async fn cancelled_pass_checks_nothing() {
        let sheets = Arc::new(
            MemorySheets::new().with_rows("Applications_Sent", vec![sent_row("a@x.com", "t-1")]),
        );
        let provider = Arc::new(FakeProvider::default().with_thread("t-1", &[ME, THEM]));
        let reconciler = Reconciler::new(
            provider.clone(),
            status_log(sheets.clone()),
            4,
            Duration::from_secs(20),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reconciler.run(&cancel).await;

        assert!(report.cancelled);
        assert!(!report.success);
        assert_eq!(provider.thread_fetches(), 0);
        assert!(sheets.rows("Replies_Recieved").is_empty());
    }
}
