//! Mail collaborators: SMTP submission, Gmail thread lookup and IMAP inbox scans.

use std::path::Path;

use async_trait::async_trait;
use reachout_core::{ConversationRef, OutreachError};
use reachout_storage::AuthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bounce;
pub mod gmail;
pub mod mailbox;
pub mod smtp;

pub use bounce::{extract_bounced_address, parse_bounce, BOUNCE_SENDER};
pub use gmail::GmailClient;
pub use mailbox::{ImapConfig, ImapMailbox};
pub use smtp::{SmtpConfig, SmtpMailer};

pub const CRATE_NAME: &str = "reachout-mail";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("imap: {0}")]
    Imap(#[from] imap::Error),
    #[error("tls: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("gmail request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gmail api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("parsing message: {0}")]
    Parse(#[from] mailparse::MailParseError),
    #[error("reading attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("mailbox worker stopped: {0}")]
    Worker(String),
}

impl From<MailError> for OutreachError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Address(_) => OutreachError::Validation(err.to_string()),
            MailError::Parse(_) => OutreachError::DataSource(err.to_string()),
            other => OutreachError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| MailError::Attachment {
                path: path.display().to_string(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self {
            content_type: content_type_for(&filename).to_string(),
            filename,
            content,
        })
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submits the message and returns its Message-ID.
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError>;
}

/// One message of a provider thread, reduced to what reply detection needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub from: Option<String>,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Most recent sent message matching `to` and `subject`, as a thread handle.
    async fn find_conversation(
        &self,
        to: &str,
        subject: &str,
    ) -> Result<Option<ConversationRef>, MailError>;

    /// Messages of a thread in provider order.
    async fn fetch_thread(&self, conversation_id: &str) -> Result<Vec<ThreadMessage>, MailError>;
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Every raw RFC 822 message in the inbox.
    async fn fetch_all(&self) -> Result<Vec<Vec<u8>>, MailError>;
}

/// True when someone other than the original sender wrote into the thread.
pub fn has_foreign_reply(messages: &[ThreadMessage]) -> bool {
    let Some((first, rest)) = messages.split_first() else {
        return false;
    };
    let Some(original) = first.from.as_deref().map(str::trim) else {
        return false;
    };
    rest.iter()
        .filter_map(|m| m.from.as_deref().map(str::trim))
        .any(|sender| sender != original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn msg(from: Option<&str>) -> ThreadMessage {
        ThreadMessage {
            id: "m".into(),
            from: from.map(str::to_string),
        }
    }

    #[test]
    fn single_message_thread_is_not_a_reply() {
        assert!(!has_foreign_reply(&[]));
        assert!(!has_foreign_reply(&[msg(Some("me@x.com"))]));
    }

    #[test]
    fn follow_up_from_same_sender_is_not_a_reply() {
        let thread = [msg(Some("Me <me@x.com>")), msg(Some("Me <me@x.com>"))];
        assert!(!has_foreign_reply(&thread));
    }

    #[test]
    fn message_from_another_sender_is_a_reply() {
        let thread = [
            msg(Some("Me <me@x.com>")),
            msg(None),
            msg(Some("Dana <dana@acme.com>")),
        ];
        assert!(has_foreign_reply(&thread));
    }

    #[test]
    fn missing_original_sender_yields_no_reply() {
        let thread = [msg(None), msg(Some("dana@acme.com"))];
        assert!(!has_foreign_reply(&thread));
    }

    #[tokio::test]
    async fn attachments_load_with_content_type_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Resume.PDF");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"%PDF-1.4")
            .unwrap();

        let att = Attachment::load(&path).await.unwrap();
        assert_eq!(att.filename, "Resume.PDF");
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.content, b"%PDF-1.4");

        let missing = Attachment::load(dir.path().join("cover.pdf")).await;
        assert!(matches!(missing, Err(MailError::Attachment { .. })));
    }

    #[test]
    fn mail_errors_map_into_outreach_taxonomy() {
        let err: OutreachError = MailError::Worker("gone".into()).into();
        assert!(matches!(err, OutreachError::Transport(_)));
    }
}
