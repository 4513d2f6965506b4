//! HTTP transport implementation.
//!
//! Talks to a PostgREST-style backend: merges are RPC calls to one
//! function per entity kind, pulls are filtered table reads.

use async_trait::async_trait;
use bujo_sync_protocol::{EntityKind, WireRecord};
use std::sync::Arc;

use crate::config::RemoteConfig;
use crate::environment::AuthProvider;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;

/// HTTP-based sync transport.
pub struct HttpTransport {
    client: reqwest::Client,
    config: RemoteConfig,
    auth: Arc<dyn AuthProvider>,
}

impl HttpTransport {
    /// Creates a transport for the given backend.
    pub fn new(config: RemoteConfig, auth: Arc<dyn AuthProvider>) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// URL of the merge function for `kind`.
    pub fn merge_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url(), kind.merge_function())
    }

    /// URL of one pull page for `kind`.
    pub fn fetch_url(&self, kind: EntityKind, since: i64, limit: usize) -> String {
        format!(
            "{}/rest/v1/{}?select=*&revision=gt.{since}&order=revision.asc&limit={limit}",
            self.base_url(),
            kind.table_name()
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> SyncResult<reqwest::RequestBuilder> {
        if !self.auth.is_signed_in() {
            return Err(SyncError::NotAuthenticated);
        }
        let token = self
            .auth
            .access_token()
            .unwrap_or_else(|| self.config.api_key.clone());
        Ok(request
            .header("apikey", &self.config.api_key)
            .bearer_auth(token))
    }

    async fn check(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::from_status(status.as_u16(), body))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn merge(&self, kind: EntityKind, record: WireRecord) -> SyncResult<()> {
        let url = self.merge_url(kind);
        tracing::debug!(%kind, %url, "merging record");

        let request = self.authorize(self.client.post(&url).json(&record))?;
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn fetch_changes(
        &self,
        kind: EntityKind,
        since: i64,
        limit: usize,
    ) -> SyncResult<Vec<WireRecord>> {
        let url = self.fetch_url(kind, since, limit);
        tracing::debug!(%kind, since, limit, "fetching changes");

        let request = self.authorize(self.client.get(&url))?;
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<Vec<WireRecord>>().await?)
    }
}
