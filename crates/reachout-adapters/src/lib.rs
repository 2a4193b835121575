//! Job-board source adapters, the source registry and the lead-sheet adapter.

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use reachout_core::{JobPosting, OutreachError};
use reachout_storage::{FetchError, HttpFetcher, SheetError, TokenBucketConfig};
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

pub mod boards;
pub mod leads;
pub mod registry;

pub use boards::{adapter_for_source, skills_from_text, HtmlBoard, BUILTIN_SOURCES};
pub use leads::{lead_from_row, read_leads, LEAD_COMPANY, LEAD_NAME, LEAD_TITLE};
pub use registry::{configure_rates, SourceConfig, SourceRegistry};

pub const CRATE_NAME: &str = "reachout-adapters";

/// Upper bound on pages a single search stream will request.
pub const MAX_PAGES: u32 = 50;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid search: {0}")]
    Query(String),
    #[error("unknown job source `{0}`")]
    UnknownSource(String),
}

impl From<AdapterError> for OutreachError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Fetch(_) => OutreachError::Transport(err.to_string()),
            AdapterError::Query(_) | AdapterError::UnknownSource(_) => {
                OutreachError::Validation(err.to_string())
            }
            AdapterError::Sheet(_) | AdapterError::Selector { .. } => {
                OutreachError::DataSource(err.to_string())
            }
        }
    }
}

/// One job board: `(query, page)` in, postings out.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    /// Request budget used when the registry does not override it.
    fn default_rate(&self) -> TokenBucketConfig;
    /// 1-based page URL.
    fn page_url(&self, query: &str, page: u32) -> Result<Url, AdapterError>;
    fn parse_page(&self, html: &str) -> Result<Vec<JobPosting>, AdapterError>;

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        query: &str,
        page: u32,
    ) -> Result<Vec<JobPosting>, AdapterError> {
        let url = self.page_url(query, page)?;
        let fetched = http.fetch_page(self.source_id(), url.as_str()).await?;
        let postings = self.parse_page(&fetched.body)?;
        debug!(source = self.source_id(), page, postings = postings.len(), "parsed result page");
        Ok(postings)
    }
}

/// Lazily pages through a source starting at `first_page`. The next page is
/// only requested when the consumer has drained the previous one, and the
/// stream ends at the first empty page.
pub fn search_stream<'a>(
    source: &'a dyn JobSource,
    http: &'a HttpFetcher,
    query: &'a str,
    first_page: u32,
) -> impl Stream<Item = Result<JobPosting, AdapterError>> + Send + 'a {
    let pages = stream::try_unfold(Some(first_page.max(1)), move |next| async move {
        let Some(page) = next else {
            return Ok::<_, AdapterError>(None);
        };
        let postings = source.fetch_page(http, query, page).await?;
        if postings.is_empty() {
            return Ok(None);
        }
        let following = (page < MAX_PAGES).then_some(page + 1);
        Ok(Some((postings, following)))
    });
    pages
        .map_ok(|postings| stream::iter(postings.into_iter().map(Ok)))
        .try_flatten()
}

pub(crate) fn validate_query(query: &str, page: u32) -> Result<&str, AdapterError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AdapterError::Query("query is required".into()));
    }
    if page == 0 {
        return Err(AdapterError::Query("pages start at 1".into()));
    }
    Ok(query)
}
