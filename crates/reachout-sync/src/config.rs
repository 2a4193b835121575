//! Process configuration read from the environment and `.env` files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reachout_mail::{ImapConfig, SmtpConfig};
use reachout_storage::sheets::column_index;
use reachout_storage::SheetLayout;
use serde::Serialize;

/// Fixed sender details interpolated into every message.
#[derive(Debug, Clone, Serialize)]
pub struct SenderProfile {
    pub name: String,
    pub headline: String,
    pub from_address: String,
    pub years_of_experience: String,
    pub phone: Option<String>,
    pub linkedin_url: String,
    pub linktree_url: Option<String>,
    /// Bullet points of the referral request.
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub spreadsheet_id: String,
    pub service_account_key: PathBuf,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct AttachmentPaths {
    pub resume: PathBuf,
    pub cover_letter: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub reconcile_cron: String,
    pub bounce_cron: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sender: SenderProfile,
    pub smtp: SmtpConfig,
    pub imap: ImapConfig,
    pub google: GoogleSettings,
    pub attachments: AttachmentPaths,
    pub layout: SheetLayout,
    pub call_timeout: Duration,
    pub post_send_delay: Duration,
    pub lookup_attempts: u32,
    pub reconcile_concurrency: usize,
    pub schedule: ScheduleConfig,
    pub user_agent: String,
    pub sources_path: PathBuf,
    pub port: u16,
}

impl AppConfig {
    /// Loads `.env.local`, then `.env`, then reads the process environment.
    /// Variables already set in the environment win over both files.
    pub fn from_env() -> Result<Self> {
        dotenvy::from_filename(".env.local").ok();
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| require_env(&get, key);
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let smtp_user = require("SMTP_USER")?;
        let smtp_password = require("SMTP_GMAIL_PASS")?;
        let call_timeout = Duration::from_secs(parse_or(&get, "CALL_TIMEOUT_SECS", 20)?);

        let sender = SenderProfile {
            name: require("SENDER_NAME")?,
            headline: or("SENDER_HEADLINE", "Software Developer"),
            from_address: get("FROM_EMAIL").unwrap_or_else(|| smtp_user.clone()),
            years_of_experience: or("YOE", "1"),
            phone: get("SENDER_PHONE"),
            linkedin_url: require("SENDER_LINKEDIN")?,
            linktree_url: get("SENDER_LINKTREE"),
            highlights: get("SENDER_HIGHLIGHTS")
                .map(|v| {
                    v.split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut layout = SheetLayout::default();
        if let Some(col) = get("LEAD_STATUS_COLUMN") {
            layout.lead_status_column = column_index(col.trim())
                .with_context(|| format!("LEAD_STATUS_COLUMN `{col}` is not a column letter"))?;
        }
        if let Some(range) = get("LEAD_RANGE") {
            layout.leads = range;
        }
        layout.highlight_bounces = parse_flag(get("HIGHLIGHT_BOUNCES").as_deref(), true);

        Ok(Self {
            smtp: SmtpConfig {
                host: require("SMTP_HOST")?,
                port: parse_or(&get, "SMTP_PORT", 587)?,
                username: smtp_user.clone(),
                password: smtp_password.clone(),
                timeout: call_timeout,
            },
            imap: ImapConfig {
                host: or("IMAP_HOST", "imap.gmail.com"),
                port: parse_or(&get, "IMAP_PORT", 993)?,
                username: smtp_user,
                password: smtp_password,
                folder: or("IMAP_FOLDER", "INBOX"),
            },
            google: GoogleSettings {
                spreadsheet_id: require("GOOGLE_SHEET_ID")?,
                service_account_key: PathBuf::from(or(
                    "GOOGLE_SERVICE_ACCOUNT_KEY",
                    "emailsender-gsheets.json",
                )),
                client_id: require("GOOGLE_CLIENT_ID")?,
                client_secret: require("GOOGLE_CLIENT_SECRET")?,
                refresh_token: require("GOOGLE_REFRESH_TOKEN")?,
            },
            attachments: AttachmentPaths {
                resume: PathBuf::from(require("RESUME_PATH")?),
                cover_letter: PathBuf::from(require("COVER_LETTER_PATH")?),
            },
            sender,
            layout,
            call_timeout,
            post_send_delay: Duration::from_millis(parse_or(&get, "POST_SEND_DELAY_MS", 2000)?),
            lookup_attempts: parse_or::<u32>(&get, "LOOKUP_ATTEMPTS", 3)?.max(1),
            reconcile_concurrency: parse_or::<usize>(&get, "RECONCILE_CONCURRENCY", 4)?.max(1),
            schedule: ScheduleConfig {
                enabled: parse_flag(get("REACHOUT_SCHEDULER_ENABLED").as_deref(), false),
                reconcile_cron: or("RECONCILE_CRON", "0 0 */2 * * *"),
                bounce_cron: or("BOUNCE_CRON", "0 30 9 * * *"),
            },
            user_agent: or("REACHOUT_USER_AGENT", "reachout-bot/0.1"),
            sources_path: PathBuf::from(or("SOURCES_PATH", "sources.yaml")),
            port: parse_or(&get, "PORT", 3000)?,
        })
    }

    /// Values that must never be echoed back to a caller.
    pub fn secrets(&self) -> Vec<String> {
        vec![
            self.smtp.password.clone(),
            self.google.client_secret.clone(),
            self.google.refresh_token.clone(),
        ]
    }
}

fn require_env(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got `{raw}`")),
        None => Ok(default),
    }
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    value
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(default)
}
