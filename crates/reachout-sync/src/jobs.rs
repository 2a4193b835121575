//! Job search over the enabled boards, and status edits on the jobs sheet.

use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reachout_adapters::{adapter_for_source, search_stream, AdapterError, JobSource, SourceRegistry};
use reachout_core::{JobPosting, OutreachError};
use reachout_storage::{HttpFetcher, StatusLog, StatusUpdate};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::with_timeout;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub source: Option<String>,
    /// Append the postings to the jobs sheet.
    #[serde(default)]
    pub record: bool,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub source: String,
    pub page: u32,
    pub jobs: Vec<JobPosting>,
    pub has_more: bool,
    pub recorded: usize,
}

pub struct JobSearch {
    http: Arc<HttpFetcher>,
    registry: SourceRegistry,
    sources: BTreeMap<String, Arc<dyn JobSource>>,
    log: Arc<StatusLog>,
    page_size: usize,
    call_timeout: Duration,
}

impl JobSearch {
    /// Builds adapters for every enabled source and installs their rate
    /// limits on the shared fetcher.
    pub async fn new(
        http: Arc<HttpFetcher>,
        registry: SourceRegistry,
        log: Arc<StatusLog>,
        call_timeout: Duration,
    ) -> Self {
        reachout_adapters::configure_rates(&http, &registry).await;
        let sources = registry
            .enabled()
            .filter_map(|cfg| adapter_for_source(&cfg.source_id))
            .map(|adapter| (adapter.source_id().to_string(), Arc::from(adapter)))
            .collect();
        Self {
            http,
            registry,
            sources,
            log,
            page_size: DEFAULT_PAGE_SIZE,
            call_timeout,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn JobSource>) -> Self {
        self.sources.insert(source.source_id().to_string(), source);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    fn resolve(&self, requested: Option<&str>) -> Result<&Arc<dyn JobSource>, OutreachError> {
        let id = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .registry
                .default_source()
                .map(|s| s.source_id.clone())
                .or_else(|| self.sources.keys().next().cloned())
                .ok_or_else(|| OutreachError::Validation("no job source is enabled".into()))?,
        };
        if let Some(cfg) = self.registry.get(&id) {
            if !cfg.enabled {
                return Err(OutreachError::Validation(format!(
                    "job source `{id}` is disabled"
                )));
            }
        }
        self.sources
            .get(&id)
            .ok_or_else(|| AdapterError::UnknownSource(id).into())
    }

    /// Collects up to one page worth of postings starting at `request.page`.
    /// Rate-limit waits are not bounded by a timeout; each HTTP request is
    /// bounded by the fetcher's client timeout.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResult, OutreachError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(OutreachError::Validation("query is required".into()));
        }
        if request.page == 0 {
            return Err(OutreachError::Validation("pages start at 1".into()));
        }
        let source = self.resolve(request.source.as_deref())?;
        let span = info_span!("job_search", source = source.source_id(), query, page = request.page);

        async {
            let (jobs, has_more) = self
                .collect_postings(source.as_ref(), query, request.page)
                .await?;
            let recorded = if request.record {
                with_timeout("recording jobs", self.call_timeout, self.log.append_jobs(&jobs))
                    .await?
            } else {
                0
            };
            info!(jobs = jobs.len(), has_more, recorded, "search finished");
            Ok::<_, OutreachError>(SearchResult {
                source: source.display_name().to_string(),
                page: request.page,
                jobs,
                has_more,
                recorded,
            })
        }
        .instrument(span)
        .await
    }

    async fn collect_postings(
        &self,
        source: &dyn JobSource,
        query: &str,
        page: u32,
    ) -> Result<(Vec<JobPosting>, bool), OutreachError> {
        let mut stream = pin!(search_stream(source, &self.http, query, page));
        let mut jobs = Vec::with_capacity(self.page_size);
        while let Some(item) = stream.next().await {
            match item {
                Ok(posting) if jobs.len() < self.page_size => jobs.push(posting),
                Ok(_) => return Ok((jobs, true)),
                Err(err) if jobs.is_empty() => return Err(err.into()),
                Err(err) => {
                    warn!(%err, collected = jobs.len(), "stopping search early");
                    break;
                }
            }
        }
        Ok((jobs, false))
    }

    /// Writes `status` on the jobs-sheet row with this URL.
    pub async fn update_status(
        &self,
        job_url: &str,
        status: &str,
    ) -> Result<StatusUpdate, OutreachError> {
        let status = status.trim();
        if status.is_empty() {
            return Err(OutreachError::Validation("status is required".into()));
        }
        with_timeout(
            "updating job status",
            self.call_timeout,
            self.log.update_job_status(job_url, status),
        )
        .await
    }
}
