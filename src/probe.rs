use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// Reachability check run before spending upload effort on a candidate.
#[async_trait]
pub trait Prober: Send + Sync {
    /// True when `url` answered a HEAD request with 2xx inside the deadline.
    /// Never fails; every problem is reported as `false`.
    async fn is_accessible(&self, url: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpProber {
    http: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("ad-media-pipeline/0.1")
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn is_accessible(&self, url: &str) -> bool {
        // Bound the whole exchange, not just connect.
        let request = self.http.head(url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(res)) if res.status().is_success() => true,
            Ok(Ok(res)) => {
                debug!(url, status = res.status().as_u16(), "probe returned non-success status");
                false
            }
            Ok(Err(err)) => {
                debug!(url, %err, "probe request failed");
                false
            }
            Err(_) => {
                warn!(url, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                false
            }
        }
    }
}
