//! Lead sheet: a single column of recruiter addresses.

use reachout_core::{looks_like_address, parse_rows_at, OutreachRecord, ParsedRows, RowError};
use reachout_storage::{RangeRef, SheetStore};
use tracing::info;

use crate::AdapterError;

pub const LEAD_NAME: &str = "Hiring Team";
pub const LEAD_COMPANY: &str = "your esteemed Organization";
pub const LEAD_TITLE: &str = "Software Developer";

/// Maps one lead row onto a record with placeholder name, company and title.
pub fn lead_from_row(row: usize, cells: &[String]) -> Result<OutreachRecord, RowError> {
    let address = cells
        .first()
        .map(|c| c.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if address.is_empty() {
        return Err(RowError::MissingField {
            row,
            column: "email",
        });
    }
    if !looks_like_address(&address) {
        return Err(RowError::InvalidAddress {
            row,
            value: address,
        });
    }
    Ok(OutreachRecord {
        recipient_address: address,
        job_title: LEAD_TITLE.to_string(),
        recipient_name: LEAD_NAME.to_string(),
        company_name: LEAD_COMPANY.to_string(),
        referral_target_url: None,
    })
}

pub async fn read_leads(
    sheets: &dyn SheetStore,
    range: &str,
) -> Result<ParsedRows<OutreachRecord>, AdapterError> {
    let first_row = RangeRef::parse(range)?.start_row;
    let rows = sheets.read_range(range).await?;
    let parsed = parse_rows_at(&rows, first_row, lead_from_row);
    info!(
        range,
        leads = parsed.entries.len(),
        rejected = parsed.rejected.len(),
        "read lead sheet"
    );
    Ok(parsed)
}
