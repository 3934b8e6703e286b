//! NetBox reachability checks for `status`.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Default health check timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// NetBox API status endpoint.
const STATUS_PATH: &str = "/api/status/";

/// Result of probing NetBox from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reachability {
    /// URL probed.
    pub url: String,
    /// Whether NetBox answered.
    pub reachable: bool,
    /// HTTP status code, if any response came back.
    pub status_code: Option<u16>,
    /// Response time in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Error message, if any.
    pub error: Option<String>,
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.reachable { "reachable" } else { "unreachable" };
        write!(f, "{}: {state}", self.url)?;

        if let Some(code) = self.status_code {
            write!(f, " (HTTP {code}")?;
            if let Some(ms) = self.response_time_ms {
                write!(f, ", {ms} ms")?;
            }
            write!(f, ")")?;
        }

        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }

        Ok(())
    }
}

/// Probes NetBox's status endpoint.
#[derive(Debug, Clone)]
pub struct ReachabilityChecker {
    client: Client,
}

impl ReachabilityChecker {
    /// Creates a new checker.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProvisionError::http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Probes `<base_url>/api/status/`.
    ///
    /// Authentication errors still count as reachable: the server answered.
    pub async fn check(&self, base_url: &str) -> Reachability {
        let url = format!("{}{STATUS_PATH}", base_url.trim_end_matches('/'));
        let start = std::time::Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                let response_time = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let reachable =
                    status.is_success() || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);

                if !reachable {
                    debug!("{url} returned status {status}");
                }

                Reachability {
                    url,
                    reachable,
                    status_code: Some(status.as_u16()),
                    response_time_ms: Some(response_time),
                    error: if reachable { None } else { Some(format!("HTTP {status}")) },
                }
            }
            Err(e) => {
                debug!("{url} is unreachable: {e}");

                Reachability {
                    url,
                    reachable: false,
                    status_code: None,
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
