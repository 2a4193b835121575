//! `sources.yaml`: which job boards are enabled and how fast they may be hit.

use std::path::Path;

use anyhow::{Context, Result};
use reachout_storage::{HttpFetcher, TokenBucketConfig};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use crate::{adapter_for_source, JobSource};

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        for source in &registry.sources {
            if adapter_for_source(&source.source_id).is_none() {
                anyhow::bail!("no adapter registered for {}", source.source_id);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// The enabled source a search should use when the caller names none.
    pub fn default_source(&self) -> Option<&SourceConfig> {
        self.enabled().next()
    }

    pub fn rate_for(&self, source: &dyn JobSource) -> TokenBucketConfig {
        self.get(source.source_id())
            .and_then(|s| s.requests_per_minute)
            .map(TokenBucketConfig::per_minute)
            .unwrap_or_else(|| source.default_rate())
    }
}

/// Installs a token bucket on the fetcher for every enabled source.
pub async fn configure_rates(http: &HttpFetcher, registry: &SourceRegistry) {
    for source in registry.enabled() {
        let Some(adapter) = adapter_for_source(&source.source_id) else {
            warn!(source_id = %source.source_id, "enabled source has no adapter");
            continue;
        };
        http.set_source_rate(&source.source_id, registry.rate_for(adapter.as_ref()))
            .await;
    }
}
