//! Sequential mail merge: render, send, resolve the thread, log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reachout_adapters::read_leads;
use reachout_core::{
    new_run_id, ConversationRef, FirstContactStyle, LeadStatus, OutreachError, OutreachRecord,
    RecordCategory, RowRejection, SentLogEntry, TemplateChoice,
};
use reachout_mail::{Attachment, MailProvider, MailTransport, OutgoingMail};
use reachout_storage::StatusLog;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AppConfig, AttachmentPaths, SenderProfile};
use crate::templates::{self, RenderedMessage};
use crate::{cancellable_sleep, with_timeout};

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub call_timeout: Duration,
    /// Pause after each send so the provider can index the message.
    pub post_send_delay: Duration,
    pub lookup_attempts: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            post_send_delay: config.post_send_delay,
            lookup_attempts: config.lookup_attempts,
        }
    }
}

/// Files attached to outgoing mail, read once per batch.
#[derive(Debug, Clone)]
pub struct AttachmentSet {
    pub resume: PathBuf,
    pub cover_letter: PathBuf,
}

impl AttachmentSet {
    pub fn from_paths(paths: &AttachmentPaths) -> Self {
        Self {
            resume: paths.resume.clone(),
            cover_letter: paths.cover_letter.clone(),
        }
    }

    /// Resume and cover letter for applications, resume only for referrals.
    pub async fn load_for(&self, category: RecordCategory) -> Result<Vec<Attachment>, OutreachError> {
        let mut files = vec![Attachment::load(&self.resume).await?];
        if category == RecordCategory::Application {
            files.push(Attachment::load(&self.cover_letter).await?);
        }
        Ok(files)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Validate,
    Render,
    Send,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Sent {
        message_id: String,
        conversation: ConversationRef,
    },
    Failed {
        stage: DispatchStage,
        error: OutreachError,
    },
    /// Not attempted because the batch was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordResult {
    pub recipient_address: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub category: RecordCategory,
    pub records: Vec<RecordResult>,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub lookup_misses: usize,
    pub rejected_rows: Vec<RowRejection>,
    pub success: bool,
}

impl DispatchReport {
    fn new(run_id: Uuid, category: RecordCategory, records: Vec<RecordResult>) -> Self {
        let mut report = Self {
            run_id,
            category,
            sent: 0,
            failed: 0,
            skipped: 0,
            lookup_misses: 0,
            rejected_rows: Vec::new(),
            success: true,
            records: Vec::new(),
        };
        for result in &records {
            match &result.outcome {
                RecordOutcome::Sent { conversation, .. } => {
                    report.sent += 1;
                    if !conversation.is_resolved() {
                        report.lookup_misses += 1;
                    }
                }
                RecordOutcome::Failed { .. } => report.failed += 1,
                RecordOutcome::Skipped => report.skipped += 1,
            }
        }
        report.success = report.failed == 0;
        report.records = records;
        report
    }

    pub fn message(&self) -> String {
        if self.success && self.skipped == 0 {
            format!("Sent {} email(s) successfully", self.sent)
        } else {
            format!(
                "Sent {} email(s); {} failed, {} skipped",
                self.sent, self.failed, self.skipped
            )
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    provider: Arc<dyn MailProvider>,
    log: Arc<StatusLog>,
    sender: SenderProfile,
    attachments: AttachmentSet,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        provider: Arc<dyn MailProvider>,
        log: Arc<StatusLog>,
        sender: SenderProfile,
        attachments: AttachmentSet,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            transport,
            provider,
            log,
            sender,
            attachments,
            settings,
        }
    }

    /// Sends one message per record, strictly in order. A failing record is
    /// reported and the batch moves on; once `cancel` fires, the remaining
    /// records are reported as skipped.
    pub async fn dispatch(
        &self,
        records: Vec<OutreachRecord>,
        choice: TemplateChoice,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, OutreachError> {
        if records.is_empty() {
            return Err(OutreachError::Validation("Invalid email configurations".into()));
        }
        let run_id = new_run_id();
        let category = choice.category();
        let span = info_span!("dispatch", %run_id, category = category.label());
        async move {
            let attachments = self.attachments.load_for(category).await?;
            let mut results = Vec::with_capacity(records.len());
            for record in records {
                let outcome = if cancel.is_cancelled() {
                    RecordOutcome::Skipped
                } else {
                    self.dispatch_one(&record, choice, &attachments, cancel).await
                };
                if let RecordOutcome::Failed { stage, error } = &outcome {
                    warn!(to = %record.recipient_address, ?stage, %error, "record failed");
                }
                results.push(RecordResult {
                    recipient_address: record.recipient_address,
                    outcome,
                });
            }
            let report = DispatchReport::new(run_id, category, results);
            info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                lookup_misses = report.lookup_misses,
                "dispatch finished"
            );
            Ok::<_, OutreachError>(report)
        }
        .instrument(span)
        .await
    }

    /// Reads the lead sheet and sends the chosen first-contact message to
    /// every valid lead, then marks the ones that went out as contacted.
    pub async fn dispatch_leads(
        &self,
        style: FirstContactStyle,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, OutreachError> {
        let range = self.log.layout().leads.clone();
        let leads = with_timeout(
            "reading leads",
            self.settings.call_timeout,
            read_leads(self.log.sheets().as_ref(), &range),
        )
        .await?;
        if leads.entries.is_empty() {
            return Err(OutreachError::DataSource(format!("no valid leads in {range}")));
        }

        let mut report = self
            .dispatch(leads.entries, TemplateChoice::FirstContact(style), cancel)
            .await?;
        report.rejected_rows = leads.rejected;

        for result in &report.records {
            if !matches!(result.outcome, RecordOutcome::Sent { .. }) {
                continue;
            }
            let marked = with_timeout(
                "marking lead",
                self.settings.call_timeout,
                self.log.mark_lead(&result.recipient_address, LeadStatus::Contacted),
            )
            .await;
            if let Err(err) = marked {
                warn!(to = %result.recipient_address, %err, "could not mark lead as contacted");
            }
        }
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        record: &OutreachRecord,
        choice: TemplateChoice,
        attachments: &[Attachment],
        cancel: &CancellationToken,
    ) -> RecordOutcome {
        let failed = |stage, error| RecordOutcome::Failed { stage, error };

        if let Err(err) = record.validate() {
            return failed(DispatchStage::Validate, err);
        }
        let RenderedMessage { subject, body } =
            match templates::render(choice, record, &self.sender) {
                Ok(message) => message,
                Err(err) => return failed(DispatchStage::Render, err),
            };

        let mail = OutgoingMail {
            from: self.sender.from_address.clone(),
            to: record.recipient_address.clone(),
            subject,
            body,
            attachments: attachments.to_vec(),
        };
        let message_id = match with_timeout(
            "smtp send",
            self.settings.call_timeout,
            self.transport.send(&mail),
        )
        .await
        {
            Ok(id) => id,
            Err(err) => return failed(DispatchStage::Send, err),
        };
        info!(to = %mail.to, %message_id, "sent");

        let conversation = self.resolve_conversation(&mail, cancel).await;
        let entry = SentLogEntry::new(Utc::now(), record, choice.category(), &conversation);
        if let Err(err) = with_timeout(
            "logging sent message",
            self.settings.call_timeout,
            self.log.append_sent(choice.category(), &entry),
        )
        .await
        {
            return failed(DispatchStage::Log, err);
        }

        RecordOutcome::Sent {
            message_id,
            conversation,
        }
    }

    /// Looks the sent message up by recipient and subject. Misses, provider
    /// errors and cancellation all yield the unresolved placeholder so the
    /// send is still logged.
    async fn resolve_conversation(
        &self,
        mail: &OutgoingMail,
        cancel: &CancellationToken,
    ) -> ConversationRef {
        let attempts = self.settings.lookup_attempts.max(1);
        for attempt in 1..=attempts {
            if cancellable_sleep(cancel, self.settings.post_send_delay)
                .await
                .is_err()
            {
                warn!(to = %mail.to, "cancelled before the conversation was resolved");
                break;
            }
            let found = with_timeout(
                "conversation lookup",
                self.settings.call_timeout,
                self.provider.find_conversation(&mail.to, &mail.subject),
            )
            .await;
            match found {
                Ok(Some(conversation)) => return conversation,
                Ok(None) => {
                    info!(to = %mail.to, attempt, "sent message not indexed yet");
                }
                Err(err) => {
                    warn!(to = %mail.to, attempt, %err, "conversation lookup failed");
                }
            }
        }
        let miss = OutreachError::Lookup(format!("no conversation found for {}", mail.to));
        warn!(%miss, "logging placeholder conversation");
        ConversationRef::unresolved()
    }
}
