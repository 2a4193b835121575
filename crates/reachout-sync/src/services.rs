use std::sync::Arc;

use anyhow::{Context, Result};
use reachout_adapters::SourceRegistry;
use reachout_core::redact_secrets;
use reachout_mail::{GmailClient, ImapMailbox, SmtpMailer};
use reachout_storage::google::SHEETS_SCOPE;
use reachout_storage::{
    GoogleSheets, HttpClientConfig, HttpFetcher, RefreshTokenAuth, ServiceAccountAuth, SheetStore,
    StatusLog,
};
use tracing::info;

use crate::bounce::BounceScanner;
use crate::config::AppConfig;
use crate::dispatch::{AttachmentSet, DispatchSettings, Dispatcher};
use crate::jobs::JobSearch;
use crate::reconcile::Reconciler;

/// Every operation the web surface, the CLI and the scheduler can run.
pub struct Services {
    pub dispatcher: Dispatcher,
    pub reconciler: Reconciler,
    pub bounces: BounceScanner,
    pub jobs: JobSearch,
    secrets: Vec<String>,
}

impl Services {
    pub fn new(
        dispatcher: Dispatcher,
        reconciler: Reconciler,
        bounces: BounceScanner,
        jobs: JobSearch,
    ) -> Self {
        Self {
            dispatcher,
            reconciler,
            bounces,
            jobs,
            secrets: Vec::new(),
        }
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Wires the Google Sheets, Gmail, SMTP and IMAP implementations.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let auth_http = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .context("building oauth http client")?;

        let sheets_auth = ServiceAccountAuth::from_key_file(
            &config.google.service_account_key,
            &[SHEETS_SCOPE],
            auth_http.clone(),
        )
        .with_context(|| {
            format!(
                "loading service account key {}",
                config.google.service_account_key.display()
            )
        })?;
        info!(client = sheets_auth.client_email(), "using service account for sheets");
        let sheets = GoogleSheets::new(
            config.google.spreadsheet_id.clone(),
            Arc::new(sheets_auth),
            config.call_timeout,
        )
        .context("building sheets client")?;

        Self::with_sheets(config, Arc::new(sheets), auth_http).await
    }

    /// Same wiring as [`Services::from_config`] over a caller-supplied sheet.
    pub async fn with_sheets(
        config: &AppConfig,
        sheets: Arc<dyn SheetStore>,
        auth_http: reqwest::Client,
    ) -> Result<Self> {
        let log = Arc::new(StatusLog::new(sheets, config.layout.clone()));

        let gmail_auth = RefreshTokenAuth::new(
            config.google.client_id.clone(),
            config.google.client_secret.clone(),
            config.google.refresh_token.clone(),
            auth_http,
        );
        let gmail = Arc::new(
            GmailClient::new(Arc::new(gmail_auth), config.call_timeout)
                .context("building gmail client")?,
        );
        let smtp = Arc::new(SmtpMailer::new(&config.smtp).context("building smtp transport")?);
        let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));

        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: config.call_timeout,
                user_agent: Some(config.user_agent.clone()),
                ..HttpClientConfig::default()
            })
            .context("building job-board http client")?,
        );
        let registry = SourceRegistry::load(&config.sources_path).await?;

        let dispatcher = Dispatcher::new(
            smtp,
            gmail.clone(),
            log.clone(),
            config.sender.clone(),
            AttachmentSet::from_paths(&config.attachments),
            DispatchSettings::from_config(config),
        );
        let reconciler = Reconciler::new(
            gmail,
            log.clone(),
            config.reconcile_concurrency,
            config.call_timeout,
        );
        let bounces = BounceScanner::new(mailbox, log.clone(), config.call_timeout);
        let jobs = JobSearch::new(http, registry, log, config.call_timeout).await;

        Ok(Self::new(dispatcher, reconciler, bounces, jobs).with_secrets(config.secrets()))
    }

    /// Strips configured secrets from text bound for a caller.
    pub fn redact(&self, text: &str) -> String {
        redact_secrets(text, &self.secrets)
    }
}
