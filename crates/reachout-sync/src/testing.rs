//! In-process fakes for the mail collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reachout_core::{ConversationRef, OutreachRecord};
use reachout_mail::{MailError, MailProvider, MailTransport, Mailbox, OutgoingMail, ThreadMessage};
use reachout_storage::{MemorySheets, SheetLayout, StatusLog};
use tokio_util::sync::CancellationToken;

use crate::config::SenderProfile;

pub fn sender() -> SenderProfile {
    SenderProfile {
        name: "Jo Applicant".into(),
        headline: "Software Developer".into(),
        from_address: "jo@example.com".into(),
        years_of_experience: "2".into(),
        phone: Some("+1 555 0100".into()),
        linkedin_url: "https://www.linkedin.com/in/jo".into(),
        linktree_url: Some("https://linktr.ee/jo".into()),
        highlights: vec!["Shipped a payments API".into(), "Led CI migration".into()],
    }
}

pub fn record(address: &str, title: &str) -> OutreachRecord {
    OutreachRecord {
        recipient_address: address.into(),
        job_title: title.into(),
        recipient_name: "Sam".into(),
        company_name: "Acme".into(),
        referral_target_url: None,
    }
}

pub fn status_log(sheets: Arc<MemorySheets>) -> Arc<StatusLog> {
    Arc::new(StatusLog::new(sheets, SheetLayout::default()))
}

#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub reject: HashSet<String>,
}

impl FakeTransport {
    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            reject: addresses.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        if self.reject.contains(&mail.to) {
            return Err(MailError::Worker(format!("550 mailbox {} unavailable", mail.to)));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(mail.clone());
        Ok(format!("<msg-{}@example.com>", sent.len()))
    }
}

/// Resolves conversations by recipient and serves canned threads.
#[derive(Default)]
pub struct FakeProvider {
    pub conversations: HashMap<String, String>,
    pub threads: HashMap<String, Vec<ThreadMessage>>,
    pub failing_threads: HashSet<String>,
    pub lookups: AtomicUsize,
    pub thread_fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn with_conversation(mut self, to: &str, thread_id: &str) -> Self {
        self.conversations.insert(to.into(), thread_id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: &str, senders: &[&str]) -> Self {
        let messages = senders
            .iter()
            .enumerate()
            .map(|(i, from)| ThreadMessage {
                id: format!("{thread_id}-{i}"),
                from: Some(from.to_string()),
            })
            .collect();
        self.threads.insert(thread_id.into(), messages);
        self
    }

    pub fn failing_thread(mut self, thread_id: &str) -> Self {
        self.failing_threads.insert(thread_id.into());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn thread_fetches(&self) -> usize {
        self.thread_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn find_conversation(
        &self,
        to: &str,
        _subject: &str,
    ) -> Result<Option<ConversationRef>, MailError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.conversations.get(to).map(ConversationRef::gmail))
    }

    async fn fetch_thread(&self, conversation_id: &str) -> Result<Vec<ThreadMessage>, MailError> {
        self.thread_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_threads.contains(conversation_id) {
            return Err(MailError::Api {
                status: 404,
                body: "Requested entity was not found.".into(),
            });
        }
        Ok(self.threads.get(conversation_id).cloned().unwrap_or_default())
    }
}

pub struct FakeMailbox {
    messages: Vec<Vec<u8>>,
    cancel_on_fetch: Option<CancellationToken>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        Self {
            messages,
            cancel_on_fetch: None,
        }
    }

    /// Fires `cancel` as the inbox is handed back.
    pub fn cancelling(mut self, cancel: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(cancel);
        self
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_all(&self) -> Result<Vec<Vec<u8>>, MailError> {
        if let Some(cancel) = &self.cancel_on_fetch {
            cancel.cancel();
        }
        Ok(self.messages.clone())
    }
}

pub fn bounce_message(address: &str) -> Vec<u8> {
    format!(
        "From: Mail Delivery Subsystem <mailer-daemon@googlemail.com>\r\n\
         To: jo@example.com\r\n\
         Subject: Delivery Status Notification (Failure)\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Address not found\r\n\
         Your message wasn't delivered to {address} because the address couldn't be found.\r\n"
    )
    .into_bytes()
}

pub fn plain_message(from: &str, body: &str) -> Vec<u8> {
    format!("From: {from}\r\nSubject: hello\r\nContent-Type: text/plain\r\n\r\n{body}\r\n")
        .into_bytes()
}

/// A full bundle over fakes and an in-memory sheet.
pub async fn services(sheets: Arc<MemorySheets>) -> crate::Services {
    use crate::dispatch::{AttachmentSet, DispatchSettings, Dispatcher};
    use reachout_adapters::SourceRegistry;
    use reachout_storage::{HttpClientConfig, HttpFetcher};
    use std::time::Duration;

    let log = status_log(sheets);
    let provider = Arc::new(FakeProvider::default());
    let timeout = Duration::from_secs(20);
    let dispatcher = Dispatcher::new(
        Arc::new(FakeTransport::default()),
        provider.clone(),
        log.clone(),
        sender(),
        AttachmentSet {
            resume: "missing/resume.pdf".into(),
            cover_letter: "missing/cover_letter.pdf".into(),
        },
        DispatchSettings {
            call_timeout: timeout,
            post_send_delay: Duration::from_millis(10),
            lookup_attempts: 1,
        },
    );
    let reconciler = crate::Reconciler::new(provider, log.clone(), 2, timeout);
    let bounces = crate::BounceScanner::new(
        Arc::new(FakeMailbox::new(Vec::new())),
        log.clone(),
        timeout,
    );
    let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
    let registry = SourceRegistry::parse("sources: []\n").unwrap();
    let jobs = crate::JobSearch::new(http, registry, log, timeout).await;
    crate::Services::new(dispatcher, reconciler, bounces, jobs)
        .with_secrets(vec!["hunter2-app-password".into()])
}
