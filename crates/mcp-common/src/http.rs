/// Plain-text HTTP fetching with per-request timeouts and bounded retry.
///
/// Retries happen only for failures that can plausibly succeed on a second attempt:
/// timeouts, connection errors, `429` and `5xx` responses. Everything else is returned
/// immediately.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use tracing::warn;

use crate::error::CommonError;

#[derive(Clone, Debug)]
pub struct FetchClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FetchClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),
}

impl From<FetchError> for CommonError {
    fn from(err: FetchError) -> Self {
        CommonError::Http(err.to_string())
    }
}

#[derive(Clone)]
pub struct FetchClient {
    config: FetchClientConfig,
    http: reqwest::Client,
}

impl FetchClient {
    pub fn new(config: FetchClientConfig) -> Result<Self, CommonError> {
        let http = reqwest::Client::builder()
            .user_agent("mcp-servers/wcag-a11y")
            .build()
            .map_err(|e| CommonError::Http(format!("client construction failed: {e}")))?;
        Ok(Self { config, http })
    }

    /// GET a URL and return the body as text.
    ///
    /// Returns `Ok(None)` for `404`, which callers usually treat as "nothing published".
    pub async fn get_text(&self, url: &str) -> Result<Option<String>, CommonError> {
        let result = self
            .request_with_retry(|| async {
                let resp = self
                    .http
                    .get(url)
                    .timeout(self.config.timeout)
                    .send()
                    .await?;
                let status = resp.status();
                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !status.is_success() {
                    return Err(FetchError::Status(status));
                }
                Ok(Some(resp.text().await?))
            })
            .await?;
        Ok(result)
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "http fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn should_retry(err: &FetchError) -> bool {
    match err {
        FetchError::Request(e) => e.is_timeout() || e.is_connect() || e.is_body(),
        FetchError::Status(status) => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
    }
}

/// Exponential backoff capped at `max`, plus up to 25% jitter.
pub fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    let jitter_ms = pseudo_jitter_ms(jitter_cap);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(1_000);
        for exponent in 0..40 {
            let delay = backoff_delay(initial, max, exponent);
            // cap plus at most 25% jitter
            assert!(delay <= Duration::from_millis(1_250), "exponent {exponent}: {delay:?}");
        }
    }

    #[test]
    fn test_backoff_grows() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(60);
        assert!(backoff_delay(initial, max, 0) >= Duration::from_millis(100));
        assert!(backoff_delay(initial, max, 3) >= Duration::from_millis(800));
    }

    #[test]
    fn test_status_retry_policy() {
        assert!(should_retry(&FetchError::Status(StatusCode::TOO_MANY_REQUESTS)));
        assert!(should_retry(&FetchError::Status(StatusCode::BAD_GATEWAY)));
        assert!(!should_retry(&FetchError::Status(StatusCode::FORBIDDEN)));
    }
}
