use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use signoff_core::config::SyncConfig;

use crate::SyncError;

/// A freshly issued access token and its advertised lifetime.
pub struct FetchedToken {
    pub access_token: SecretString,
    pub expires_in_secs: u64,
}

/// Where new tokens come from. The production implementation posts a
/// client-credentials grant; tests substitute a counter.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<FetchedToken, SyncError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    600
}

/// OAuth client-credentials source against the accounting tenant's token
/// endpoint.
pub struct OauthTokenSource {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl OauthTokenSource {
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let token_url =
            config.token_url.clone().ok_or(SyncError::IncompleteConfig("token_url"))?;
        let client_id =
            config.client_id.clone().ok_or(SyncError::IncompleteConfig("client_id"))?;
        let client_secret =
            config.client_secret.clone().ok_or(SyncError::IncompleteConfig("client_secret"))?;

        Ok(Self { client: reqwest::Client::new(), token_url, client_id, client_secret })
    }
}

#[async_trait::async_trait]
impl TokenSource for OauthTokenSource {
    async fn fetch(&self) -> Result<FetchedToken, SyncError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<TokenResponse>()
            .await?;

        if response.access_token.is_empty() {
            return Err(SyncError::MissingToken);
        }

        Ok(FetchedToken {
            access_token: response.access_token.into(),
            expires_in_secs: response.expires_in,
        })
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Explicit token state behind an accessor that refreshes on expiry. The
/// `refresh_skew` renews slightly early so in-flight requests never carry a
/// token that dies mid-call.
pub struct TokenCache<S> {
    source: S,
    refresh_skew: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl<S> TokenCache<S>
where
    S: TokenSource,
{
    pub fn new(source: S, refresh_skew_secs: u64) -> Self {
        Self {
            source,
            refresh_skew: Duration::seconds(refresh_skew_secs as i64),
            cached: Mutex::new(None),
        }
    }

    pub async fn valid_token(&self) -> Result<SecretString, SyncError> {
        self.valid_token_at(Utc::now()).await
    }

    pub(crate) async fn valid_token_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SecretString, SyncError> {
        let mut cached = self.cached.lock().await;

        if let Some(current) = cached.as_ref() {
            if now + self.refresh_skew < current.expires_at {
                return Ok(current.token.clone());
            }
        }

        debug!("access token missing or near expiry, refreshing");
        let fetched = self.source.fetch().await?;
        let expires_at = now + Duration::seconds(fetched.expires_in_secs as i64);
        let token = fetched.access_token.clone();
        *cached = Some(CachedToken { token: fetched.access_token, expires_at });
        Ok(token)
    }
}
