//! Upstream document retrieval for `upstream-raw`.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{ComposeError, ProvisionError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Fetches the upstream Slurp'it compose document.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Returns the document body.
    ///
    /// Transport errors and non-2xx responses are
    /// [`ComposeError::FetchFailed`].
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("netbox-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching upstream document: {url}");

        let failed = |message: String| ComposeError::FetchFailed {
            url: url.to_string(),
            message,
        };

        let response = self.client.get(url).send().await.map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")).into());
        }

        let body = response.text().await.map_err(|e| failed(e.to_string()))?;
        debug!("Fetched {} bytes from {url}", body.len());
        Ok(body)
    }
}
