//! Spreadsheet-backed log of sent messages, detected replies, lead and job statuses.

use std::sync::Arc;

use reachout_core::{
    parse_rows_at, JobPosting, LeadStatus, OutreachError, ParsedRows, RecordCategory, ReplyLogEntry,
    SentLogEntry, INITIAL_JOB_STATUS,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::sheets::{cell_ref, RangeRef, SheetStore};

/// Where each log lives in the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetLayout {
    pub applications_sent: String,
    pub referrals_sent: String,
    pub application_replies: String,
    pub referral_replies: String,
    /// Single column of lead addresses.
    pub leads: String,
    /// 0-based column that receives the lead status.
    pub lead_status_column: usize,
    pub jobs: String,
    pub highlight_bounces: bool,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            applications_sent: "Applications_Sent!A:F".into(),
            referrals_sent: "Referrals_Sent!A:F".into(),
            application_replies: "Replies_Recieved!A:G".into(),
            referral_replies: "Referrals_Recieved!A:G".into(),
            leads: "Job_Sheet!A:A".into(),
            lead_status_column: 2,
            jobs: "Sheet3!A:G".into(),
            highlight_bounces: true,
        }
    }
}

impl SheetLayout {
    pub fn sent_range(&self, category: RecordCategory) -> &str {
        match category {
            RecordCategory::Application => &self.applications_sent,
            RecordCategory::Referral => &self.referrals_sent,
        }
    }

    pub fn reply_range(&self, category: RecordCategory) -> &str {
        match category {
            RecordCategory::Application => &self.application_replies,
            RecordCategory::Referral => &self.referral_replies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub cell: String,
    pub previous: Option<String>,
}

pub struct StatusLog {
    sheets: Arc<dyn SheetStore>,
    layout: SheetLayout,
    write_lock: Mutex<()>,
}

impl StatusLog {
    pub fn new(sheets: Arc<dyn SheetStore>, layout: SheetLayout) -> Self {
        Self {
            sheets,
            layout,
            write_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    pub fn sheets(&self) -> &Arc<dyn SheetStore> {
        &self.sheets
    }

    pub async fn append_sent(
        &self,
        category: RecordCategory,
        entry: &SentLogEntry,
    ) -> Result<(), OutreachError> {
        let range = self.layout.sent_range(category);
        let _guard = self.write_lock.lock().await;
        self.sheets.append_rows(range, vec![entry.to_row()]).await?;
        debug!(range, conversation_id = %entry.conversation_id, "logged sent message");
        Ok(())
    }

    /// Every sent entry of a category. An empty range is a data-source error.
    pub async fn read_sent(
        &self,
        category: RecordCategory,
    ) -> Result<ParsedRows<SentLogEntry>, OutreachError> {
        let range = self.layout.sent_range(category);
        let first_row = RangeRef::parse(range)?.start_row;
        let rows = self.sheets.read_range(range).await?;
        if rows.is_empty() {
            return Err(OutreachError::DataSource(format!("no rows found in {range}")));
        }
        Ok(parse_rows_at(&rows, first_row, SentLogEntry::from_row))
    }

    /// Appends `entry` unless a reply with the same conversation id is
    /// already logged. Returns whether a row was written.
    ///
    /// The read and the append run under the log's write lock, so concurrent
    /// callers for the same id produce one row.
    pub async fn insert_reply_if_absent(
        &self,
        category: RecordCategory,
        entry: &ReplyLogEntry,
    ) -> Result<bool, OutreachError> {
        let range = self.layout.reply_range(category);
        let id = entry.conversation_id().trim();
        let _guard = self.write_lock.lock().await;

        let rows = self.sheets.read_range(range).await?;
        let id_column = ReplyLogEntry::COLUMNS - 1;
        let already_logged = rows
            .iter()
            .any(|row| row.get(id_column).is_some_and(|cell| cell.trim() == id));
        if already_logged {
            debug!(range, conversation_id = id, "reply already logged");
            return Ok(false);
        }

        self.sheets.append_rows(range, vec![entry.to_row()]).await?;
        info!(range, conversation_id = id, "logged reply");
        Ok(true)
    }

    /// Writes `status` on the first job row whose URL matches.
    ///
    /// Last write wins: the row is located by a read and then updated by a
    /// separate write, so a concurrent edit between the two is overwritten.
    pub async fn update_job_status(
        &self,
        job_url: &str,
        status: &str,
    ) -> Result<StatusUpdate, OutreachError> {
        let job_url = job_url.trim();
        if job_url.is_empty() {
            return Err(OutreachError::Validation("job url is empty".into()));
        }
        let range = RangeRef::parse(&self.layout.jobs)?;
        let rows = self.sheets.read_range(&self.layout.jobs).await?;
        let (idx, row) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| {
                row.get(JobPosting::URL_COLUMN)
                    .is_some_and(|cell| cell.trim() == job_url)
            })
            .ok_or_else(|| OutreachError::Lookup(format!("no job row with url {job_url}")))?;

        let cell = cell_ref(
            &range.tab,
            range.first_col + JobPosting::STATUS_COLUMN,
            range.start_row + idx,
        );
        let previous = row.get(JobPosting::STATUS_COLUMN).cloned();
        self.sheets.update_cell(&cell, status).await?;
        info!(%cell, status, "updated job status");
        Ok(StatusUpdate { cell, previous })
    }

    /// Writes the status cell on the lead row holding `address` and, for
    /// bounces, highlights the row when the layout asks for it.
    ///
    /// The address is matched in the lead range's first column; the status
    /// column is an absolute sheet column.
    pub async fn mark_lead(
        &self,
        address: &str,
        status: LeadStatus,
    ) -> Result<StatusUpdate, OutreachError> {
        let wanted = address.trim().to_ascii_lowercase();
        let range = RangeRef::parse(&self.layout.leads)?;
        let rows = self.sheets.read_range(&self.layout.leads).await?;
        let row = rows
            .iter()
            .position(|row| {
                row.first()
                    .is_some_and(|cell| cell.trim().to_ascii_lowercase() == wanted)
            })
            .map(|idx| range.start_row + idx)
            .ok_or_else(|| OutreachError::Lookup(format!("{wanted} is not in the lead sheet")))?;

        let cell = cell_ref(&range.tab, self.layout.lead_status_column, row);
        self.sheets.update_cell(&cell, status.as_str()).await?;
        if status == LeadStatus::Bounced && self.layout.highlight_bounces {
            self.sheets.highlight_row(&range.tab, row).await?;
        }
        info!(address = %wanted, status = status.as_str(), %cell, "marked lead");
        Ok(StatusUpdate {
            cell,
            previous: None,
        })
    }

    pub async fn append_jobs(&self, postings: &[JobPosting]) -> Result<usize, OutreachError> {
        if postings.is_empty() {
            return Ok(0);
        }
        let rows: Vec<_> = postings
            .iter()
            .map(|p| p.to_row(INITIAL_JOB_STATUS))
            .collect();
        let _guard = self.write_lock.lock().await;
        self.sheets.append_rows(&self.layout.jobs, rows).await?;
        Ok(postings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::MemorySheets;
    use chrono::Utc;
    use reachout_core::{ConversationRef, OutreachRecord};

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sent(id: &str) -> SentLogEntry {
        SentLogEntry::new(
            Utc::now(),
            &OutreachRecord {
                recipient_address: "a@x.com".into(),
                job_title: "Backend Developer".into(),
                recipient_name: "Dana".into(),
                company_name: "Acme".into(),
                referral_target_url: None,
            },
            RecordCategory::Application,
            &ConversationRef::gmail(id),
        )
    }

    fn log_over(sheets: Arc<MemorySheets>) -> StatusLog {
        StatusLog::new(sheets, SheetLayout::default())
    }

    #[tokio::test]
    async fn sent_entries_round_trip_through_the_sheet() {
        let sheets = Arc::new(MemorySheets::new());
        let log = log_over(sheets.clone());
        log.append_sent(RecordCategory::Application, &sent("t1"))
            .await
            .unwrap();

        let parsed = log.read_sent(RecordCategory::Application).await.unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].conversation_id, "t1");
        assert!(sheets.rows("Referrals_Sent").is_empty());
    }

    #[tokio::test]
    async fn empty_sent_range_is_a_data_source_error() {
        let log = log_over(Arc::new(MemorySheets::new()));
        assert!(matches!(
            log.read_sent(RecordCategory::Referral).await,
            Err(OutreachError::DataSource(_))
        ));
    }

    #[tokio::test]
    async fn first_reply_is_logged_into_an_empty_range() {
        let sheets = Arc::new(MemorySheets::new());
        let log = log_over(sheets.clone());
        let reply = ReplyLogEntry::detected(Utc::now(), sent("t1"));

        assert!(log
            .insert_reply_if_absent(RecordCategory::Application, &reply)
            .await
            .unwrap());
        assert!(!log
            .insert_reply_if_absent(RecordCategory::Application, &reply)
            .await
            .unwrap());
        assert_eq!(sheets.rows("Replies_Recieved").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_detections_write_one_row() {
        let sheets = Arc::new(MemorySheets::new());
        let log = Arc::new(log_over(sheets.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let reply = ReplyLogEntry::detected(Utc::now(), sent("dup"));
                log.insert_reply_if_absent(RecordCategory::Referral, &reply)
                    .await
                    .unwrap()
            }));
        }
        let mut written = 0;
        for handle in handles {
            if handle.await.unwrap() {
                written += 1;
            }
        }
        assert_eq!(written, 1);
        assert_eq!(sheets.rows("Referrals_Recieved").len(), 1);
    }

    #[tokio::test]
    async fn job_status_updates_the_matching_row() {
        let sheets = Arc::new(MemorySheets::new().with_rows(
            "Sheet3",
            vec![
                strings(&["Source", "Title", "Company", "Location", "URL", "Skills", "Status"]),
                strings(&["GitHub", "SRE", "GitHub", "Remote", "https://j/1", "go", "Not Applied"]),
                strings(&["GitHub", "SWE", "GitHub", "Remote", "https://j/2", "rust", "Not Applied"]),
            ],
        ));
        let log = log_over(sheets.clone());

        let update = log.update_job_status("https://j/2", "Applied").await.unwrap();
        assert_eq!(update.cell, "Sheet3!G3");
        assert_eq!(update.previous.as_deref(), Some("Not Applied"));
        assert_eq!(sheets.rows("Sheet3")[2][6], "Applied");

        assert!(matches!(
            log.update_job_status("https://j/404", "Applied").await,
            Err(OutreachError::Lookup(_))
        ));
    }

    #[tokio::test]
    async fn bounced_lead_gets_status_and_highlight() {
        let sheets = Arc::new(MemorySheets::new().with_rows(
            "Job_Sheet",
            vec![strings(&["Email"]), strings(&["a@x.com"]), strings(&["B@Y.com"])],
        ));
        let log = log_over(sheets.clone());

        let update = log.mark_lead("b@y.com", LeadStatus::Bounced).await.unwrap();
        assert_eq!(update.cell, "Job_Sheet!C3");
        assert_eq!(sheets.rows("Job_Sheet")[2], strings(&["B@Y.com", "", "Bounced"]));
        assert_eq!(sheets.highlighted_rows("Job_Sheet"), vec![3]);

        log.mark_lead("a@x.com", LeadStatus::Contacted).await.unwrap();
        assert_eq!(sheets.highlighted_rows("Job_Sheet"), vec![3]);

        assert!(matches!(
            log.mark_lead("zz@q.com", LeadStatus::Bounced).await,
            Err(OutreachError::Lookup(_))
        ));
    }

    #[tokio::test]
    async fn ranges_below_the_header_write_the_matching_sheet_row() {
        let sheets = Arc::new(
            MemorySheets::new()
                .with_rows(
                    "Job_Sheet",
                    vec![
                        strings(&["Email", "Name", "Status"]),
                        strings(&["a@x.com"]),
                        strings(&["b@y.com"]),
                    ],
                )
                .with_rows(
                    "Sheet3",
                    vec![
                        strings(&["Source", "Title", "Company", "Location", "URL", "Skills", "Status"]),
                        strings(&["GitHub", "SWE", "GitHub", "Remote", "https://j/1", "rust", "Not Applied"]),
                    ],
                ),
        );
        let log = StatusLog::new(
            sheets.clone(),
            SheetLayout {
                leads: "Job_Sheet!A2:A".into(),
                jobs: "Sheet3!A2:G".into(),
                ..SheetLayout::default()
            },
        );

        let lead = log.mark_lead("b@y.com", LeadStatus::Bounced).await.unwrap();
        assert_eq!(lead.cell, "Job_Sheet!C3");
        assert_eq!(sheets.rows("Job_Sheet")[0], strings(&["Email", "Name", "Status"]));
        assert_eq!(sheets.rows("Job_Sheet")[2], strings(&["b@y.com", "", "Bounced"]));
        assert_eq!(sheets.highlighted_rows("Job_Sheet"), vec![3]);

        let job = log.update_job_status("https://j/1", "Applied").await.unwrap();
        assert_eq!(job.cell, "Sheet3!G2");
        assert_eq!(sheets.rows("Sheet3")[0][6], "Status");
        assert_eq!(sheets.rows("Sheet3")[1][6], "Applied");
    }

    #[tokio::test]
    async fn scraped_jobs_start_as_not_applied() {
        let sheets = Arc::new(MemorySheets::new());
        let log = log_over(sheets.clone());
        let written = log
            .append_jobs(&[JobPosting {
                source: "GitHub".into(),
                title: "SWE".into(),
                company: "GitHub".into(),
                location: "Remote".into(),
                url: Some("https://j/1".into()),
                skills: vec!["rust".into(), "go".into()],
            }])
            .await
            .unwrap();
        assert_eq!(written, 1);
        let row = &sheets.rows("Sheet3")[0];
        assert_eq!(row[5], "rust, go");
        assert_eq!(row[6], INITIAL_JOB_STATUS);
    }
}
