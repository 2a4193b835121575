//! Core domain model for outreach dispatch, reply reconciliation and job leads.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "reachout-core";

/// Placeholder written to the sent log when the provider lookup misses.
pub const UNRESOLVED: &str = "N/A";

/// Status written to a freshly scraped job row.
pub const INITIAL_JOB_STATUS: &str = "Not Applied";

/// Log timestamps are rendered at UTC+05:30.
pub const LOG_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub const INDUSTRIES: [&str; 2] = ["Software Development & Engineering", "DevOps"];

pub const SKILLS: [&str; 4] = [
    "MERN & MEAN stack, including AWS & Firebase",
    "React.js & Next.js, using multiple UI kits and also with Tailwind CSS & pure CSS",
    "Node.js and Express.js, creating APIs, also implementation of GoLang to create robust Backend, including cloud services like AWS & Firebase",
    "Docker & Kubernetes, also using GitHub Fastlane to implement CI/CD",
];

const GENERALIST_TITLES: &[&str] = &[
    "Software Engineer",
    "Software Engineer Intern",
    "Senior Software Engineer",
    "Senior Software Engineer Intern",
    "Software Developer",
    "Software Developer Intern",
    "Senior Software Developer",
    "Senior Software Developer Intern",
    "Full Stack Developer",
    "Full Stack Developer Intern",
    "Senior Full Stack Developer",
    "Senior Full Stack Developer Intern",
    "Software Development Engineer",
];

const FRONTEND_TITLES: &[&str] = &[
    "Frontend Developer",
    "Frontend Developer Intern",
    "Senior Frontend Developer Intern",
    "Senior Frontend Developer",
    "React Developer",
    "React Developer Intern",
    "Senior React Developer Intern",
    "Senior React Developer",
    "React.js Developer",
    "React.js Developer Intern",
    "Senior React.js Developer Intern",
    "Senior React.js Developer",
    "React js Developer",
    "React js Developer Intern",
    "Senior React js Developer Intern",
    "Senior React js Developer",
    "Next.js Developer",
    "Next.js Developer Intern",
    "Senior Next.js Developer Intern",
    "Senior Next.js Developer",
    "Frontend Engineer",
    "Frontend Engineer Intern",
    "Senior Frontend Engineer",
    "Senior Frontend Engineer Intern",
];

const BACKEND_TITLES: &[&str] = &[
    "Backend Engineer",
    "Backend Engineer Intern",
    "Senior Backend Engineer",
    "Senior Backend Engineer Intern",
    "Backend Developer",
    "Backend Developer Intern",
    "Senior Backend Developer Intern",
    "Senior Backend Developer",
];

const DEVOPS_TITLES: &[&str] = &[
    "DevOps Engineer",
    "Senior DevOps Engineer",
    "DevOps Engineer Intern",
    "Senior DevOps Engineer Intern",
];

/// Industry/skill pair interpolated into first-contact templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkillProfile {
    pub industry: &'static str,
    pub skills: &'static str,
}

impl Default for SkillProfile {
    fn default() -> Self {
        Self {
            industry: INDUSTRIES[0],
            skills: SKILLS[0],
        }
    }
}

/// Exact-match lookup of a job title against the fixed profile table.
///
/// Titles outside the table get the default profile; the result never depends
/// on any previously processed record.
pub fn profile_for_title(job_title: &str) -> SkillProfile {
    let (industry, skills) = if GENERALIST_TITLES.contains(&job_title) {
        (0, 0)
    } else if FRONTEND_TITLES.contains(&job_title) {
        (0, 1)
    } else if BACKEND_TITLES.contains(&job_title) {
        (0, 2)
    } else if DEVOPS_TITLES.contains(&job_title) {
        (1, 3)
    } else {
        return SkillProfile::default();
    };
    SkillProfile {
        industry: INDUSTRIES[industry],
        skills: SKILLS[skills],
    }
}

/// Every title the lookup table recognises.
pub fn known_titles() -> impl Iterator<Item = &'static str> {
    GENERALIST_TITLES
        .iter()
        .chain(FRONTEND_TITLES)
        .chain(BACKEND_TITLES)
        .chain(DEVOPS_TITLES)
        .copied()
}

/// One recipient of an outreach message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachRecord {
    #[serde(rename = "hiringManagerEmail")]
    pub recipient_address: String,
    #[serde(rename = "jobTitle", default)]
    pub job_title: String,
    #[serde(rename = "hiringManager")]
    pub recipient_name: String,
    #[serde(rename = "companyName")]
    pub company_name: String,
    #[serde(rename = "seniorURL", default, skip_serializing_if = "Option::is_none")]
    pub referral_target_url: Option<String>,
}

impl OutreachRecord {
    pub fn validate(&self) -> Result<(), OutreachError> {
        if !looks_like_address(&self.recipient_address) {
            return Err(OutreachError::Validation(format!(
                "`{}` is not an email address",
                self.recipient_address
            )));
        }
        if self.company_name.trim().is_empty() {
            return Err(OutreachError::Validation(format!(
                "company name missing for {}",
                self.recipient_address
            )));
        }
        Ok(())
    }
}

pub fn looks_like_address(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Application,
    Referral,
}

impl RecordCategory {
    pub const ALL: [RecordCategory; 2] = [RecordCategory::Application, RecordCategory::Referral];

    pub fn label(self) -> &'static str {
        match self {
            RecordCategory::Application => "application",
            RecordCategory::Referral => "referral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstContactStyle {
    Eager,
    Formal,
}

/// Which message body a batch renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateChoice {
    FirstContact(FirstContactStyle),
    ReferralRequest,
}

impl TemplateChoice {
    /// Maps the form's `(index, isReferral)` pair onto a template.
    pub fn from_request(index: usize, is_referral: bool) -> Result<Self, OutreachError> {
        if is_referral {
            return Ok(TemplateChoice::ReferralRequest);
        }
        match index {
            0 => Ok(TemplateChoice::FirstContact(FirstContactStyle::Eager)),
            1 => Ok(TemplateChoice::FirstContact(FirstContactStyle::Formal)),
            other => Err(OutreachError::Validation(format!(
                "template index {other} is out of range (expected 0 or 1)"
            ))),
        }
    }

    pub fn category(self) -> RecordCategory {
        match self {
            TemplateChoice::FirstContact(_) => RecordCategory::Application,
            TemplateChoice::ReferralRequest => RecordCategory::Referral,
        }
    }
}

/// Provider thread handle resolved after a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: String,
    pub link: String,
}

impl ConversationRef {
    pub fn gmail(thread_id: impl Into<String>) -> Self {
        let id = thread_id.into();
        let link = format!("https://mail.google.com/mail/u/0/#inbox/{id}");
        Self { id, link }
    }

    pub fn unresolved() -> Self {
        Self {
            id: UNRESOLVED.to_string(),
            link: UNRESOLVED.to_string(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        is_resolved_id(&self.id)
    }
}

pub fn is_resolved_id(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty() && id != UNRESOLVED
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("row {row}: expected {expected} columns, found {found}")]
    TooShort {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}: column `{column}` is empty")]
    MissingField { row: usize, column: &'static str },
    #[error("row {row}: `{value}` is not an email address")]
    InvalidAddress { row: usize, value: String },
}

/// A sheet row that failed schema validation and was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    pub row: usize,
    pub reason: String,
}

/// Rows mapped through a schema, with the ones that did not fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRows<T> {
    pub entries: Vec<T>,
    pub rejected: Vec<RowRejection>,
}

/// Maps raw rows (1-based row numbers) and skips a leading header row.
pub fn parse_rows<T>(
    rows: &[Vec<String>],
    parse: impl Fn(usize, &[String]) -> Result<T, RowError>,
) -> ParsedRows<T> {
    parse_rows_at(rows, 1, parse)
}

/// Like [`parse_rows`] for rows read from a range whose first row sits at
/// sheet row `first_row`.
pub fn parse_rows_at<T>(
    rows: &[Vec<String>],
    first_row: usize,
    parse: impl Fn(usize, &[String]) -> Result<T, RowError>,
) -> ParsedRows<T> {
    let first_row = first_row.max(1);
    let mut entries = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for (idx, cells) in rows.iter().enumerate() {
        if idx == 0 && is_header_row(cells) {
            continue;
        }
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let row = first_row + idx;
        match parse(row, cells) {
            Ok(entry) => entries.push(entry),
            Err(err) => rejected.push(RowRejection {
                row,
                reason: err.to_string(),
            }),
        }
    }
    ParsedRows { entries, rejected }
}

fn is_header_row(cells: &[String]) -> bool {
    cells.first().is_some_and(|first| {
        matches!(
            first.trim().to_ascii_lowercase().as_str(),
            "date" | "timestamp" | "email" | "source" | "date checked" | "date sent"
        )
    })
}

fn cell(cells: &[String], idx: usize) -> &str {
    cells.get(idx).map(|s| s.trim()).unwrap_or_default()
}

fn required<'a>(
    cells: &'a [String],
    idx: usize,
    row: usize,
    column: &'static str,
) -> Result<&'a str, RowError> {
    let value = cell(cells, idx);
    if value.is_empty() {
        Err(RowError::MissingField { row, column })
    } else {
        Ok(value)
    }
}

/// One row of the sent-applications / sent-referrals log (columns A..F).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentLogEntry {
    pub timestamp: String,
    pub recipient_address: String,
    pub job_title_or_name: String,
    pub company_name: String,
    pub conversation_link: String,
    pub conversation_id: String,
}

impl SentLogEntry {
    pub const COLUMNS: usize = 6;

    pub fn new(
        sent_at: DateTime<Utc>,
        record: &OutreachRecord,
        category: RecordCategory,
        conversation: &ConversationRef,
    ) -> Self {
        let job_title_or_name = match category {
            RecordCategory::Application => record.job_title.clone(),
            RecordCategory::Referral => record.recipient_name.clone(),
        };
        Self {
            timestamp: log_timestamp(sent_at),
            recipient_address: record.recipient_address.clone(),
            job_title_or_name,
            company_name: record.company_name.clone(),
            conversation_link: conversation.link.clone(),
            conversation_id: conversation.id.clone(),
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.recipient_address.clone(),
            self.job_title_or_name.clone(),
            self.company_name.clone(),
            self.conversation_link.clone(),
            self.conversation_id.clone(),
        ]
    }

    pub fn from_row(row: usize, cells: &[String]) -> Result<Self, RowError> {
        if cells.len() < Self::COLUMNS {
            return Err(RowError::TooShort {
                row,
                expected: Self::COLUMNS,
                found: cells.len(),
            });
        }
        let recipient_address = required(cells, 1, row, "recipient_address")?;
        if !looks_like_address(recipient_address) {
            return Err(RowError::InvalidAddress {
                row,
                value: recipient_address.to_string(),
            });
        }
        Ok(Self {
            timestamp: cell(cells, 0).to_string(),
            recipient_address: recipient_address.to_string(),
            job_title_or_name: cell(cells, 2).to_string(),
            company_name: cell(cells, 3).to_string(),
            conversation_link: cell(cells, 4).to_string(),
            conversation_id: required(cells, 5, row, "conversation_id")?.to_string(),
        })
    }
}

/// One row of the replies-received / referrals-received log (columns A..G).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyLogEntry {
    pub checked_at: String,
    pub sent: SentLogEntry,
}

impl ReplyLogEntry {
    pub const COLUMNS: usize = 7;

    pub fn detected(checked_at: DateTime<Utc>, sent: SentLogEntry) -> Self {
        Self {
            checked_at: log_timestamp(checked_at),
            sent,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.sent.conversation_id
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(Self::COLUMNS);
        row.push(self.checked_at.clone());
        row.extend(self.sent.to_row());
        row
    }

    pub fn from_row(row: usize, cells: &[String]) -> Result<Self, RowError> {
        if cells.len() < Self::COLUMNS {
            return Err(RowError::TooShort {
                row,
                expected: Self::COLUMNS,
                found: cells.len(),
            });
        }
        Ok(Self {
            checked_at: cell(cells, 0).to_string(),
            sent: SentLogEntry::from_row(row, &cells[1..])?,
        })
    }
}

/// A posting scraped from a job board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub source: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: Option<String>,
    pub skills: Vec<String>,
}

impl JobPosting {
    pub const URL_COLUMN: usize = 4;
    pub const STATUS_COLUMN: usize = 6;

    pub fn to_row(&self, status: &str) -> Vec<String> {
        vec![
            self.source.clone(),
            self.title.clone(),
            self.company.clone(),
            self.location.clone(),
            self.url.clone().unwrap_or_default(),
            self.skills.join(", "),
            status.to_string(),
        ]
    }
}

/// Lead-sheet status written through the status log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Contacted,
    Bounced,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Bounced => "Bounced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceNotice {
    pub bounce_type: String,
    pub bounced_address: String,
}

/// Renders a log timestamp at the fixed UTC+05:30 offset: `dd/mm/yyyy - h:mm AM`.
pub fn log_timestamp(at: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(LOG_UTC_OFFSET_SECS).expect("offset is within one day");
    at.with_timezone(&offset)
        .format("%d/%m/%Y - %-I:%M %p")
        .to_string()
}

pub fn new_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Error taxonomy shared by every batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutreachError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("lookup miss: {0}")]
    Lookup(String),
    #[error("data source error: {0}")]
    DataSource(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("operation cancelled")]
    Cancelled,
}

impl OutreachError {
    /// Lookup misses are logged and skipped rather than failing an item.
    pub fn is_soft(&self) -> bool {
        matches!(self, OutreachError::Lookup(_))
    }

    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        OutreachError::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }
}

/// Replaces every configured secret in `text` with `[redacted]`.
pub fn redact_secrets<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        let secret = secret.as_ref().trim();
        // very short values would shred unrelated text
        if secret.len() < 4 {
            continue;
        }
        out = out.replace(secret, "[redacted]");
    }
    out
}
