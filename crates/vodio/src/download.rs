// Orchestrator: resolves key material once, partitions the sequence across
// workers, joins them and reports exactly one terminal outcome.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{DownloadConfig, create_client};
use crate::crypto::CryptoContext;
use crate::error::DownloadError;
use crate::fetcher::SegmentFetcher;
use crate::segment::SegmentSequence;
use crate::source::{HttpSource, SegmentSource};
use crate::worker::{DownloadState, SegmentCallback, Worker};

/// Per-download options supplied by the caller.
#[derive(Clone)]
pub struct DownloadOptions {
    /// Number of concurrent workers (must be at least 1).
    pub worker_count: usize,
    /// When true, per-segment callbacks run under a global lock so they
    /// observe a consistent, non-interleaved view of output.
    pub serialize_callbacks: bool,
    /// Optional per-segment callback; a returned error aborts the download.
    pub on_segment: Option<SegmentCallback>,
    /// External cancellation token.
    pub cancel_token: CancellationToken,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            serialize_callbacks: false,
            on_segment: None,
            cancel_token: CancellationToken::new(),
        }
    }
}

/// Concurrent segment download pipeline.
///
/// Fetches every segment of a sequence, decrypts it with the stream's shared
/// key material and persists it under its ordinal filename so the files can
/// later be concatenated in order.
pub struct Downloader {
    source: Arc<dyn SegmentSource>,
    config: DownloadConfig,
}

impl Downloader {
    /// Create a downloader backed by an HTTP client built from `config`.
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config)?;
        let source = Arc::new(HttpSource::new(client, config.clone()));
        Ok(Self { source, config })
    }

    /// Create a downloader over a custom segment source.
    pub fn with_source(config: DownloadConfig, source: Arc<dyn SegmentSource>) -> Self {
        Self { source, config }
    }

    /// Download every segment of `sequence` into `output_dir`.
    ///
    /// Segments are written as `<index>.<ext>`. Returns exactly one terminal
    /// outcome: external cancellation wins over worker failures, and only the
    /// first worker failure is surfaced. There is no partial-success return;
    /// callers that need partial-progress accounting inspect the output
    /// directory.
    pub async fn download(
        &self,
        sequence: SegmentSequence,
        output_dir: &Path,
        options: DownloadOptions,
    ) -> Result<(), DownloadError> {
        if options.worker_count == 0 {
            return Err(DownloadError::configuration(
                "worker_count must be at least 1",
            ));
        }
        let total = sequence.len();
        let Some(first) = sequence.first() else {
            debug!("empty segment sequence, nothing to download");
            return Ok(());
        };

        // Supported streams share a single key across all segments; the
        // context resolved from the first segment must be valid for every
        // other one, so mixed key references are rejected before any work.
        if let Some(mismatch) = sequence.iter().find(|s| s.key.uri != first.key.uri) {
            return Err(DownloadError::unsupported_format(format!(
                "segment {} references key {} but the stream key is {}",
                mismatch.index, mismatch.key.uri, first.key.uri
            )));
        }

        // Fired either by the external token or by the first failing worker.
        let abort = options.cancel_token.child_token();

        let crypto = CryptoContext::resolve(self.source.as_ref(), first, &abort).await?;
        tokio::fs::create_dir_all(output_dir).await?;

        let ranges = sequence.partition(options.worker_count);
        info!(
            segments = total,
            workers = ranges.len(),
            output_dir = %output_dir.display(),
            "starting segment download"
        );

        let sequence = Arc::new(sequence);
        let crypto = Arc::new(crypto);
        let state = Arc::new(DownloadState::new(
            total as u64,
            abort,
            options.on_segment,
            options.serialize_callbacks,
        ));
        let fetcher = Arc::new(SegmentFetcher::new(Arc::clone(&self.source), crypto));

        let mut workers = JoinSet::new();
        for range in ranges {
            workers.spawn(
                Worker {
                    range,
                    sequence: Arc::clone(&sequence),
                    fetcher: Arc::clone(&fetcher),
                    state: Arc::clone(&state),
                    retry: self.config.retry.clone(),
                    output_dir: output_dir.to_path_buf(),
                    extension: self.config.segment_extension.clone(),
                }
                .run(),
            );
        }

        // Join barrier: all workers finish before an outcome is reported.
        while let Some(joined) = workers.join_next().await {
            if let Err(join_err) = joined {
                state.record_failure(DownloadError::Internal {
                    reason: format!("worker task failed: {join_err}"),
                });
            }
        }

        if options.cancel_token.is_cancelled() {
            info!("download cancelled by caller");
            return Err(DownloadError::Cancelled);
        }
        if let Some(err) = state.take_error() {
            return Err(err);
        }

        debug_assert_eq!(state.completed(), total as u64);
        info!(segments = total, "segment download finished");
        Ok(())
    }
}
