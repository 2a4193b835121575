//! OAuth2 access tokens for the Sheets and Gmail REST APIs.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Tokens are refreshed this long before Google says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("reading key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing service account key: {0}")]
    KeyFormat(#[from] serde_json::Error),
    #[error("signing token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint rejected the grant ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse, AuthError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(cached.value.clone());
            }
        }
        let fresh = fetch().await?;
        let value = fresh.access_token.clone();
        *slot = Some(CachedToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(value)
    }
}

async fn exchange(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let resp = http.post(url).form(form).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json::<TokenResponse>().await?)
}

/// Service-account JWT bearer grant, used for the spreadsheet.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    scope: String,
    http: reqwest::Client,
    cache: TokenCache,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, scopes: &[&str], http: reqwest::Client) -> Self {
        Self {
            key,
            scope: scopes.join(" "),
            http,
            cache: TokenCache::default(),
        }
    }

    pub fn from_key_file(
        path: impl AsRef<Path>,
        scopes: &[&str],
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AuthError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&text)?;
        Ok(Self::new(key, scopes, http))
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn token_uri(&self) -> &str {
        self.key.token_uri.as_deref().unwrap_or(TOKEN_URL)
    }

    fn signed_assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: self.token_uri(),
            iat: issued_at,
            exp: issued_at + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        self.cache
            .get_or_fetch(|| async {
                debug!(client = %self.key.client_email, "requesting service account token");
                let assertion = self.signed_assertion(Utc::now().timestamp())?;
                exchange(
                    &self.http,
                    self.token_uri(),
                    &[
                        ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                        ("assertion", &assertion),
                    ],
                )
                .await
            })
            .await
    }
}

/// OAuth2 refresh-token grant, used for the Gmail mailbox owner.
pub struct RefreshTokenAuth {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    http: reqwest::Client,
    cache: TokenCache,
}

impl RefreshTokenAuth {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            http,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenProvider for RefreshTokenAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        self.cache
            .get_or_fetch(|| async {
                debug!("refreshing gmail access token");
                exchange(
                    &self.http,
                    TOKEN_URL,
                    &[
                        ("grant_type", "refresh_token"),
                        ("client_id", &self.client_id),
                        ("client_secret", &self.client_secret),
                        ("refresh_token", &self.refresh_token),
                    ],
                )
                .await
            })
            .await
    }
}

/// Fixed token, for tests and for callers that mint tokens elsewhere.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}
