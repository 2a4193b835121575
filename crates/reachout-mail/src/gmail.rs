//! Gmail REST lookups: find the thread a sent message landed in and list its senders.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reachout_core::ConversationRef;
use reachout_storage::TokenProvider;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::{MailError, MailProvider, ThreadMessage};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thread {
    #[serde(default)]
    messages: Vec<ThreadEntry>,
}

#[derive(Debug, Deserialize)]
struct ThreadEntry {
    id: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl From<ThreadEntry> for ThreadMessage {
    fn from(entry: ThreadEntry) -> Self {
        let from = entry.payload.and_then(|p| {
            p.headers
                .into_iter()
                .find(|h| h.name.eq_ignore_ascii_case("from"))
                .map(|h| h.value)
        });
        ThreadMessage { id: entry.id, from }
    }
}

/// `subject:` takes the whole subject as one phrase. Gmail has no escape for
/// a quote inside a phrase, so embedded quotes are dropped.
pub fn search_query(to: &str, subject: &str) -> String {
    let phrase = subject.replace('"', "");
    format!("to:{to} subject:\"{}\"", phrase.trim())
}

/// Gmail REST client authorised as the mailbox owner.
pub struct GmailClient {
    http: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    base: Url,
}

impl GmailClient {
    pub fn new(auth: Arc<dyn TokenProvider>, timeout: Duration) -> Result<Self, MailError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            auth,
            base: Url::parse(GMAIL_API_BASE).expect("gmail base url is valid"),
        })
    }

    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base = base;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, MailError> {
        let token = self.auth.access_token().await?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    fn search_url(&self, to: &str, subject: &str) -> Url {
        let mut url = self.endpoint(&["messages"]);
        url.query_pairs_mut()
            .append_pair("q", &search_query(to, subject))
            .append_pair("maxResults", "1");
        url
    }

    fn thread_url(&self, thread_id: &str) -> Url {
        let mut url = self.endpoint(&["threads", thread_id]);
        url.query_pairs_mut()
            .append_pair("format", "metadata")
            .append_pair("metadataHeaders", "From");
        url
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn find_conversation(
        &self,
        to: &str,
        subject: &str,
    ) -> Result<Option<ConversationRef>, MailError> {
        let list: MessageList = self.get_json(self.search_url(to, subject)).await?;
        let Some(stub) = list.messages.into_iter().next() else {
            debug!(to, subject, "no sent message matched");
            return Ok(None);
        };
        let thread_id = match stub.thread_id {
            Some(id) => id,
            None => {
                let full: MessageStub = self.get_json(self.endpoint(&["messages", &stub.id])).await?;
                match full.thread_id {
                    Some(id) => id,
                    None => return Ok(None),
                }
            }
        };
        Ok(Some(ConversationRef::gmail(thread_id)))
    }

    async fn fetch_thread(&self, conversation_id: &str) -> Result<Vec<ThreadMessage>, MailError> {
        let thread: Thread = self.get_json(self.thread_url(conversation_id)).await?;
        Ok(thread.messages.into_iter().map(ThreadMessage::from).collect())
    }
}
