// Network seam for the download pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::trace;

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::segment::Segment;

/// Retrieval of raw key and segment bodies.
///
/// The engine only ever talks to the network through this trait, so tests
/// (and alternative transports) can stand in for HTTP.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetch the raw key bytes from a key URI.
    async fn fetch_key(&self, uri: &str) -> Result<Bytes, DownloadError>;

    /// Fetch the raw (still encrypted) body of a segment.
    async fn fetch_segment(&self, segment: &Segment) -> Result<Bytes, DownloadError>;
}

/// HTTP implementation of [`SegmentSource`] backed by a shared reqwest client.
pub struct HttpSource {
    client: Client,
    config: DownloadConfig,
}

impl HttpSource {
    pub fn new(client: Client, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    async fn get(
        &self,
        uri: &str,
        timeout: std::time::Duration,
        operation: &'static str,
    ) -> Result<Bytes, DownloadError> {
        let response = self
            .client
            .get(uri)
            .timeout(timeout)
            .send()
            .await
            .map_err(DownloadError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, uri, operation));
        }

        let bytes = response.bytes().await.map_err(DownloadError::from)?;
        trace!(uri, size = bytes.len(), operation, "fetched resource");
        Ok(bytes)
    }
}

#[async_trait]
impl SegmentSource for HttpSource {
    async fn fetch_key(&self, uri: &str) -> Result<Bytes, DownloadError> {
        self.get(uri, self.config.key_download_timeout, "key fetch")
            .await
    }

    async fn fetch_segment(&self, segment: &Segment) -> Result<Bytes, DownloadError> {
        self.get(
            &segment.uri,
            self.config.segment_download_timeout,
            "segment fetch",
        )
        .await
    }
}
