use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;

use crate::error::DownloadError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Retry behavior for per-segment fetch attempts.
///
/// The backoff is deliberately linear, not exponential: before retry `k`
/// (1-indexed) the worker sleeps `backoff_unit * k`, tolerating transient
/// network stalls without the long tail of exponential growth.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget per segment, including the initial attempt.
    pub max_attempts: u32,
    /// Unit multiplied by the retry number to compute the sleep.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_unit: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Compute the sleep before retry `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff_unit.saturating_mul(retry)
    }
}

/// Configurable options for the downloader
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Timeout for a single segment request
    pub segment_download_timeout: Duration,

    /// Timeout for the key request
    pub key_download_timeout: Duration,

    /// Retry policy for per-segment fetch attempts
    pub retry: RetryPolicy,

    /// File extension for persisted segments (joined to the ordinal index)
    pub segment_extension: String,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(30),
            key_download_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            segment_extension: "ts".to_owned(),
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloadConfig::get_default_headers(),
        }
    }
}

impl DownloadConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloadConfig) -> Result<Client, DownloadError> {
    // Create the crypto provider
    let provider = Arc::new(aws_lc_rs::default_provider());

    // Build platform default TLS configuration
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::Internal {
            reason: format!("failed to configure default TLS protocol versions: {e}"),
        })?
        .with_platform_verifier()
        .map_err(|e| DownloadError::Internal {
            reason: format!("failed to configure platform certificate verifier: {e}"),
        })?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to same host
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(DownloadError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_matches_legacy_behavior() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(15));
    }

    #[test]
    fn delay_is_linear_not_exponential() {
        let policy = RetryPolicy {
            max_attempts: 8,
            backoff_unit: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(7), Duration::from_millis(700));
    }
}
