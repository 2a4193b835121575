//! Delivery-failure notices: who sent them and which address bounced.

use std::sync::OnceLock;

use mailparse::{MailHeaderMap, ParsedMail};
use reachout_core::BounceNotice;
use regex::Regex;

use crate::MailError;

pub const BOUNCE_SENDER: &str = "Mail Delivery Subsystem";
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

fn delivery_failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Your message wasn['’]t delivered to ([\w.-]+@[\w.-]+)")
            .expect("delivery failure pattern compiles")
    })
}

/// Address named in a "Your message wasn't delivered to ..." body.
pub fn extract_bounced_address(body: &str) -> Option<String> {
    let caps = delivery_failure_pattern().captures(body)?;
    let address = caps.get(1)?.as_str().trim_end_matches('.');
    if address.contains('@') && !address.ends_with('@') {
        Some(address.to_string())
    } else {
        None
    }
}

/// Parses a raw message and returns a notice when it is a bounce with a
/// recognisable address. Non-bounce messages yield `Ok(None)`.
pub fn parse_bounce(raw: &[u8]) -> Result<Option<BounceNotice>, MailError> {
    let parsed = mailparse::parse_mail(raw)?;
    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    if !from.contains(BOUNCE_SENDER) {
        return Ok(None);
    }
    let text = plain_text(&parsed)?;
    Ok(extract_bounced_address(&text).map(|bounced_address| BounceNotice {
        bounce_type: ADDRESS_NOT_FOUND.to_string(),
        bounced_address,
    }))
}

fn plain_text(mail: &ParsedMail<'_>) -> Result<String, MailError> {
    if mail.subparts.is_empty() {
        return Ok(mail.get_body()?);
    }
    let mut out = String::new();
    for part in &mail.subparts {
        let mime = part.ctype.mimetype.to_ascii_lowercase();
        if mime.starts_with("multipart/") || mime == "text/plain" {
            out.push_str(&plain_text(part)?);
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_exact_address() {
        assert_eq!(
            extract_bounced_address("Your message wasn't delivered to x@y.com because"),
            Some("x@y.com".to_string())
        );
        assert_eq!(
            extract_bounced_address("Your message wasn’t delivered to dana.k@acme-corp.io."),
            Some("dana.k@acme-corp.io".to_string())
        );
    }

    #[test]
    fn body_without_phrase_yields_nothing() {
        assert_eq!(extract_bounced_address("Delivery delayed for x@y.com"), None);
        assert_eq!(extract_bounced_address(""), None);
    }

    #[test]
    fn multipart_bounce_is_parsed() {
        let raw = concat!(
            "From: Mail Delivery Subsystem <mailer-daemon@googlemail.com>\r\n",
            "To: me@x.com\r\n",
            "Subject: Delivery Status Notification (Failure)\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=\"UTF-8\"\r\n",
            "\r\n",
            "Address not found\r\n",
            "Your message wasn't delivered to gone@acme.com because the address couldn't be found.\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=\"UTF-8\"\r\n",
            "\r\n",
            "<p>ignored</p>\r\n",
            "--b1--\r\n",
        );
        let notice = parse_bounce(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(notice.bounced_address, "gone@acme.com");
        assert_eq!(notice.bounce_type, ADDRESS_NOT_FOUND);
    }

    #[test]
    fn ordinary_mail_is_not_a_bounce() {
        let raw = concat!(
            "From: Dana <dana@acme.com>\r\n",
            "Subject: Re: Application\r\n",
            "\r\n",
            "Your message wasn't delivered to x@y.com (quoting a forward)\r\n",
        );
        assert_eq!(parse_bounce(raw.as_bytes()).unwrap(), None);
    }
}
