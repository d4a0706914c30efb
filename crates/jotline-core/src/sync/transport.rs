//! Transport seam between the sync engine and the sync server.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{SyncError, SyncResult};
use super::protocol::{PullQuery, PullResponse, PushRequest, PushResponse};
use crate::util::{api_error_message, normalize_base_url, normalize_text_option};

/// Request/response exchange with the sync server.
///
/// Implementations map every failure onto [`SyncError`] so the retry
/// executor can classify it.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch one page of changes.
    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse>;

    /// Upload local changes of one collection.
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;
}

/// HTTP implementation of [`SyncTransport`] against the Jotline API service.
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    /// Builds a transport for an explicit API base URL.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let base_url = normalize_base_url(base_url).map_err(SyncError::Validation)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SyncError::Network(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            client,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(Some(token.into()));
        self
    }

    /// Replace the bearer credential, e.g. after a refresh.
    pub fn set_access_token(&self, token: Option<String>) {
        let mut slot = self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = normalize_text_option(token);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> SyncResult<String> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SyncError::Auth("No access token configured".to_string()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(
                status.as_u16(),
                api_error_message(status.as_u16(), &body),
            ));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(format!("{}/v1/sync/pull", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(format!("{}/v1/sync/push", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }
}
