//! IMAP inbox reader used by the bounce scan.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{MailError, Mailbox};

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
}

/// IMAP over TLS. The `imap` crate is blocking, so each scan runs on the
/// blocking pool with its own connection.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

fn fetch_blocking(config: &ImapConfig) -> Result<Vec<Vec<u8>>, MailError> {
    let tls = native_tls::TlsConnector::builder().build()?;
    let client = imap::connect((config.host.as_str(), config.port), &config.host, &tls)?;
    let mut session = client
        .login(&config.username, &config.password)
        .map_err(|(err, _client)| err)?;

    let folder = session.select(&config.folder)?;
    if folder.exists == 0 {
        session.logout()?;
        return Ok(Vec::new());
    }
    let fetched = session.fetch("1:*", "RFC822")?;
    let raws: Vec<Vec<u8>> = fetched
        .iter()
        .filter_map(|message| message.body().map(<[u8]>::to_vec))
        .collect();
    debug!(exists = folder.exists, fetched = raws.len(), "imap fetch complete");
    session.logout()?;
    Ok(raws)
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_all(&self) -> Result<Vec<Vec<u8>>, MailError> {
        let config = self.config.clone();
        let raws = tokio::task::spawn_blocking(move || fetch_blocking(&config))
            .await
            .map_err(|e| MailError::Worker(e.to_string()))??;
        info!(folder = %self.config.folder, messages = raws.len(), "scanned mailbox");
        Ok(raws)
    }
}
