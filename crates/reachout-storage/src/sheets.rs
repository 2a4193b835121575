//! Narrow spreadsheet seam: read a range, append rows, write one cell, paint a row.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use reachout_core::OutreachError;
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::google::{AuthError, TokenProvider};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sheets api returned {status} for {target}: {body}")]
    Api {
        status: u16,
        target: String,
        body: String,
    },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid range `{0}`")]
    InvalidRange(String),
    #[error("no tab named `{0}`")]
    UnknownTab(String),
}

impl From<SheetError> for OutreachError {
    fn from(err: SheetError) -> Self {
        OutreachError::DataSource(err.to_string())
    }
}

#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Rows of `range`, starting at the range's first column. Trailing empty
    /// cells may be missing.
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError>;

    async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), SheetError>;

    /// `cell` is an A1 reference such as `Sheet3!G5`.
    async fn update_cell(&self, cell: &str, value: &str) -> Result<(), SheetError>;

    /// Paints a 1-based row red with white text.
    async fn highlight_row(&self, tab: &str, row: usize) -> Result<(), SheetError>;
}

/// Parsed A1 range: `Tab!B:F`, `Tab!A2:C`, `Tab!G5`, or a bare tab name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub tab: String,
    /// 0-based first column.
    pub first_col: usize,
    /// 0-based inclusive last column, when the range names one.
    pub last_col: Option<usize>,
    /// 1-based sheet row of the first row a read returns.
    pub start_row: usize,
    /// 1-based inclusive last row, when the range names one.
    pub last_row: Option<usize>,
    /// 1-based row of a single-cell reference.
    pub row: Option<usize>,
}

impl RangeRef {
    pub fn parse(range: &str) -> Result<Self, SheetError> {
        let (tab, cells) = match range.split_once('!') {
            Some((tab, cells)) => (tab, Some(cells)),
            None => (range, None),
        };
        let tab = tab.trim().trim_matches('\'').to_string();
        if tab.is_empty() {
            return Err(SheetError::InvalidRange(range.to_string()));
        }
        let Some(cells) = cells else {
            return Ok(Self {
                tab,
                first_col: 0,
                last_col: None,
                start_row: 1,
                last_row: None,
                row: None,
            });
        };

        let (start, end) = match cells.split_once(':') {
            Some((s, e)) => (s, Some(e)),
            None => (cells, None),
        };
        let (first_col, row) =
            split_cell(start).ok_or_else(|| SheetError::InvalidRange(range.to_string()))?;
        let (last_col, last_row) = match end {
            Some(end) => {
                let (col, end_row) =
                    split_cell(end).ok_or_else(|| SheetError::InvalidRange(range.to_string()))?;
                (Some(col), end_row)
            }
            None if row.is_some() => (Some(first_col), row),
            None => (None, None),
        };
        let start_row = row.unwrap_or(1);
        if last_row.is_some_and(|last| last < start_row) {
            return Err(SheetError::InvalidRange(range.to_string()));
        }
        Ok(Self {
            tab,
            first_col,
            last_col,
            start_row,
            last_row,
            row: if end.is_none() { row } else { None },
        })
    }

    pub fn width(&self) -> Option<usize> {
        self.last_col.map(|last| last.saturating_sub(self.first_col) + 1)
    }
}

fn split_cell(cell: &str) -> Option<(usize, Option<usize>)> {
    let cell = cell.trim();
    let letters: String = cell.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let digits = &cell[letters.len()..];
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<usize>().ok().filter(|r| *r > 0)?)
    };
    Some((column_index(&letters)?, row))
}

/// `A` -> 0, `G` -> 6, `AA` -> 26.
pub fn column_index(letters: &str) -> Option<usize> {
    let mut idx = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        idx = idx * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    idx.checked_sub(1)
}

/// 0 -> `A`, 26 -> `AA`.
pub fn column_letter(mut idx: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push((b'A' + (idx % 26) as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    out.iter().rev().collect()
}

pub fn cell_ref(tab: &str, col: usize, row: usize) -> String {
    format!("{tab}!{}{row}", column_letter(col))
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

fn cell_text(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 REST client.
pub struct GoogleSheets {
    http: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    spreadsheet_id: String,
    base: String,
    tab_ids: Mutex<HashMap<String, i64>>,
}

impl GoogleSheets {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        auth: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, SheetError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            auth,
            spreadsheet_id: spreadsheet_id.into(),
            base: SHEETS_API_BASE.to_string(),
            tab_ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SheetError> {
        let mut url = Url::parse(&format!("{}/v4/spreadsheets/", self.base.trim_end_matches('/')))
            .map_err(|e| SheetError::InvalidRange(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetError::InvalidRange(self.base.clone()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, SheetError> {
        let token = self.auth.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, req: RequestBuilder, target: &str) -> Result<reqwest::Response, SheetError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetError::Api {
                status: status.as_u16(),
                target: target.to_string(),
                body,
            });
        }
        Ok(resp)
    }

    async fn tab_id(&self, tab: &str) -> Result<i64, SheetError> {
        let mut ids = self.tab_ids.lock().await;
        if let Some(id) = ids.get(tab) {
            return Ok(*id);
        }
        let mut url = self.url(&[&self.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let req = self.request(Method::GET, url).await?;
        let meta: SpreadsheetMeta = self.send(req, "spreadsheet metadata").await?.json().await?;
        for sheet in meta.sheets {
            ids.insert(sheet.properties.title, sheet.properties.sheet_id);
        }
        ids.get(tab)
            .copied()
            .ok_or_else(|| SheetError::UnknownTab(tab.to_string()))
    }
}

#[async_trait]
impl SheetStore for GoogleSheets {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.url(&[&self.spreadsheet_id, "values", range])?;
        let req = self.request(Method::GET, url).await?;
        let body: ValueRange = self.send(req, range).await?.json().await?;
        debug!(range, rows = body.values.len(), "read sheet range");
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), SheetError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut url = self.url(&[&self.spreadsheet_id, "values", &format!("{range}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let count = rows.len();
        let req = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "values": rows }));
        self.send(req, range).await?;
        debug!(range, rows = count, "appended sheet rows");
        Ok(())
    }

    async fn update_cell(&self, cell: &str, value: &str) -> Result<(), SheetError> {
        let mut url = self.url(&[&self.spreadsheet_id, "values", cell])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let req = self
            .request(Method::PUT, url)
            .await?
            .json(&json!({ "values": [[value]] }));
        self.send(req, cell).await?;
        Ok(())
    }

    async fn highlight_row(&self, tab: &str, row: usize) -> Result<(), SheetError> {
        let sheet_id = self.tab_id(tab).await?;
        let url = self.url(&[&format!("{}:batchUpdate", self.spreadsheet_id)])?;
        let body = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row.saturating_sub(1),
                        "endRowIndex": row,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": 1, "green": 0, "blue": 0 },
                            "textFormat": { "foregroundColor": { "red": 1, "green": 1, "blue": 1 } }
                        }
                    },
                    "fields": "userEnteredFormat(backgroundColor,textFormat)"
                }
            }]
        });
        let req = self.request(Method::POST, url).await?.json(&body);
        self.send(req, tab).await?;
        Ok(())
    }
}

/// In-process sheet used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySheets {
    tabs: StdMutex<BTreeMap<String, Vec<Vec<String>>>>,
    highlighted: StdMutex<BTreeSet<(String, usize)>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, tab: &str, rows: Vec<Vec<String>>) -> Self {
        self.tabs
            .lock()
            .expect("memory sheet lock poisoned")
            .insert(tab.to_string(), rows);
        self
    }

    pub fn rows(&self, tab: &str) -> Vec<Vec<String>> {
        self.tabs
            .lock()
            .expect("memory sheet lock poisoned")
            .get(tab)
            .cloned()
            .unwrap_or_default()
    }

    pub fn highlighted_rows(&self, tab: &str) -> Vec<usize> {
        self.highlighted
            .lock()
            .expect("memory sheet lock poisoned")
            .iter()
            .filter(|(t, _)| t == tab)
            .map(|(_, row)| *row)
            .collect()
    }
}

#[async_trait]
impl SheetStore for MemorySheets {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let range = RangeRef::parse(range)?;
        // let concurrent callers interleave the way they would against the API
        tokio::task::yield_now().await;
        let tabs = self.tabs.lock().expect("memory sheet lock poisoned");
        let rows = tabs.get(&range.tab).cloned().unwrap_or_default();
        let take = range
            .last_row
            .map_or(usize::MAX, |last| last + 1 - range.start_row);
        Ok(rows
            .into_iter()
            .skip(range.start_row - 1)
            .take(take)
            .map(|row| {
                let end = range
                    .last_col
                    .map(|last| (last + 1).min(row.len()))
                    .unwrap_or(row.len());
                row.get(range.first_col.min(end)..end)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), SheetError> {
        let range = RangeRef::parse(range)?;
        tokio::task::yield_now().await;
        let mut tabs = self.tabs.lock().expect("memory sheet lock poisoned");
        let tab = tabs.entry(range.tab).or_default();
        for row in rows {
            let mut padded = vec![String::new(); range.first_col];
            padded.extend(row);
            tab.push(padded);
        }
        Ok(())
    }

    async fn update_cell(&self, cell: &str, value: &str) -> Result<(), SheetError> {
        let target = RangeRef::parse(cell)?;
        let row = target
            .row
            .ok_or_else(|| SheetError::InvalidRange(cell.to_string()))?;
        tokio::task::yield_now().await;
        let mut tabs = self.tabs.lock().expect("memory sheet lock poisoned");
        let tab = tabs.entry(target.tab).or_default();
        if tab.len() < row {
            tab.resize(row, Vec::new());
        }
        let cells = &mut tab[row - 1];
        if cells.len() <= target.first_col {
            cells.resize(target.first_col + 1, String::new());
        }
        cells[target.first_col] = value.to_string();
        Ok(())
    }

    async fn highlight_row(&self, tab: &str, row: usize) -> Result<(), SheetError> {
        self.highlighted
            .lock()
            .expect("memory sheet lock poisoned")
            .insert((tab.to_string(), row));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn range_parsing_covers_columns_cells_and_tabs() {
        let cols = RangeRef::parse("Applications_Sent!A:F").unwrap();
        assert_eq!(cols.tab, "Applications_Sent");
        assert_eq!((cols.first_col, cols.last_col, cols.row), (0, Some(5), None));
        assert_eq!(cols.width(), Some(6));

        let cell = RangeRef::parse("Sheet3!G12").unwrap();
        assert_eq!((cell.first_col, cell.last_col, cell.row), (6, Some(6), Some(12)));
        assert_eq!((cell.start_row, cell.last_row), (12, Some(12)));

        let below_header = RangeRef::parse("Job_Sheet!A2:A").unwrap();
        assert_eq!((below_header.first_col, below_header.last_col), (0, Some(0)));
        assert_eq!((below_header.start_row, below_header.last_row), (2, None));
        assert_eq!(below_header.row, None);
        assert_eq!(RangeRef::parse("Job_Sheet!A:A").unwrap().start_row, 1);

        let bounded = RangeRef::parse("Sheet3!B3:D5").unwrap();
        assert_eq!((bounded.start_row, bounded.last_row), (3, Some(5)));
        assert!(RangeRef::parse("Sheet3!A5:A2").is_err());

        let quoted = RangeRef::parse("'Job Sheet'!B:B").unwrap();
        assert_eq!(quoted.tab, "Job Sheet");
        assert_eq!(quoted.first_col, 1);

        assert_eq!(RangeRef::parse("Leads").unwrap().last_col, None);
        assert!(RangeRef::parse("!A:B").is_err());
        assert!(RangeRef::parse("Tab!7").is_err());
    }

    #[test]
    fn column_letters_round_trip_past_z() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("g"), Some(6));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(cell_ref("Sheet3", 6, 4), "Sheet3!G4");
    }

    #[tokio::test]
    async fn memory_sheet_slices_columns_and_pads_appends() {
        let sheets = MemorySheets::new().with_rows(
            "Job_Sheet",
            vec![row(&["a@x.com", "Acme", "x"]), row(&["b@y.com"])],
        );
        let col_b = sheets.read_range("Job_Sheet!B:C").await.unwrap();
        assert_eq!(col_b, vec![row(&["Acme", "x"]), Vec::<String>::new()]);

        let below_header = sheets.read_range("Job_Sheet!A2:A").await.unwrap();
        assert_eq!(below_header, vec![row(&["b@y.com"])]);
        let first_only = sheets.read_range("Job_Sheet!A1:B1").await.unwrap();
        assert_eq!(first_only, vec![row(&["a@x.com", "Acme"])]);

        sheets
            .append_rows("Job_Sheet!B:B", vec![row(&["Globex"])])
            .await
            .unwrap();
        assert_eq!(sheets.rows("Job_Sheet")[2], row(&["", "Globex"]));
    }

    #[tokio::test]
    async fn memory_sheet_updates_cells_and_tracks_highlights() {
        let sheets = MemorySheets::new();
        sheets.update_cell("Sheet3!C2", "Applied").await.unwrap();
        assert_eq!(sheets.rows("Sheet3"), vec![vec![], row(&["", "", "Applied"])]);
        assert!(sheets.update_cell("Sheet3!C:C", "x").await.is_err());

        sheets.highlight_row("Job_Sheet", 3).await.unwrap();
        assert_eq!(sheets.highlighted_rows("Job_Sheet"), vec![3]);
    }

    #[test]
    fn google_urls_encode_ranges_as_path_segments() {
        let sheets = GoogleSheets::new(
            "sheet-123",
            Arc::new(crate::google::StaticToken("t".into())),
            Duration::from_secs(5),
        )
        .unwrap();
        let url = sheets
            .url(&["sheet-123", "values", "Job Sheet!A:A"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/Job%20Sheet!A:A"
        );
    }
}
