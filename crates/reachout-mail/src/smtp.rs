//! SMTP delivery through lettre, with file attachments.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox as Address, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{MailError, MailTransport, OutgoingMail};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// STARTTLS submission through lettre's pooled async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        let (message_id, message) = build_message(mail)?;
        let response = self.transport.send(message).await?;
        info!(to = %mail.to, %message_id, code = %response.code(), "smtp accepted message");
        Ok(message_id)
    }
}

/// Builds the MIME message and the Message-ID it carries.
pub fn build_message(mail: &OutgoingMail) -> Result<(String, Message), MailError> {
    let from: Address = mail.from.parse()?;
    let to: Address = mail.to.parse()?;
    let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));
    for attachment in &mail.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .unwrap_or_else(|_| ContentType::parse("application/octet-stream").expect("valid mime"));
        parts = parts.singlepart(
            MimeAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }
    debug!(attachments = mail.attachments.len(), "built outgoing message");

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.clone())
        .message_id(Some(message_id.clone()))
        .multipart(parts)?;
    Ok((message_id, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Attachment;

    fn mail(attachments: Vec<Attachment>) -> OutgoingMail {
        OutgoingMail {
            from: "Jo Applicant <jo@example.com>".into(),
            to: "dana@acme.com".into(),
            subject: "Application for Backend Developer Position in Acme".into(),
            body: "Hi Dana,".into(),
            attachments,
        }
    }

    #[test]
    fn message_carries_generated_id_and_attachments() {
        let resume = Attachment {
            filename: "resume.pdf".into(),
            content_type: "application/pdf".into(),
            content: b"%PDF".to_vec(),
        };
        let (id, message) = build_message(&mail(vec![resume])).unwrap();
        assert!(id.starts_with('<') && id.ends_with("@example.com>"));

        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        assert!(raw.contains(&format!("Message-ID: {id}")));
        assert!(raw.contains("Subject: Application for Backend Developer Position in Acme"));
        assert!(raw.contains("filename=\"resume.pdf\""));
    }

    #[test]
    fn bad_recipient_is_an_address_error() {
        let mut bad = mail(Vec::new());
        bad.to = "not an address".into();
        assert!(matches!(build_message(&bad), Err(MailError::Address(_))));
    }
}
