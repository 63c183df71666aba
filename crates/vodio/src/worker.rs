// Worker: sequentially drains one contiguous range of the segment sequence,
// retrying transient failures and reporting progress through shared state.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{CallbackError, DownloadError};
use crate::fetcher::{DownloadedSegment, SegmentFetcher};
use crate::segment::{Segment, SegmentSequence};

/// Caller-supplied hook invoked after each segment is persisted, with the
/// segment, the new completion count, the total segment count and the open
/// file handle. Returning an error aborts the whole download.
///
/// Unless callback serialization is enabled, the hook may be invoked
/// concurrently from different workers and must be safe for that.
pub type SegmentCallback =
    Arc<dyn Fn(&Segment, u64, u64, &mut DownloadedSegment) -> Result<(), CallbackError> + Send + Sync>;

/// State shared by all workers of one download.
pub(crate) struct DownloadState {
    /// Total number of segments in the sequence.
    pub total: u64,
    /// Count of segments successfully completed, across all workers.
    pub completed: AtomicU64,
    /// Broadcast-once abort signal: child of the caller's token, also fired
    /// by the first worker to hit an unrecoverable failure. Simultaneous
    /// setters never block each other.
    pub abort: CancellationToken,
    /// First unrecoverable error; losers of the race are dropped.
    first_error: Mutex<Option<DownloadError>>,
    pub on_segment: Option<SegmentCallback>,
    /// Global mutual-exclusion lock for callback invocations, when the
    /// caller asked for a serialized view of output.
    callback_lock: Option<Mutex<()>>,
}

impl DownloadState {
    pub fn new(
        total: u64,
        abort: CancellationToken,
        on_segment: Option<SegmentCallback>,
        serialize_callbacks: bool,
    ) -> Self {
        Self {
            total,
            completed: AtomicU64::new(0),
            abort,
            first_error: Mutex::new(None),
            on_segment,
            callback_lock: serialize_callbacks.then(|| Mutex::new(())),
        }
    }

    /// Record an unrecoverable failure and signal every worker to stop.
    /// Only the first recorded error survives.
    pub fn record_failure(&self, err: DownloadError) {
        {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.abort.cancel();
    }

    pub fn take_error(&self) -> Option<DownloadError> {
        self.first_error.lock().take()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Processes one contiguous sub-range of the sequence, in ascending ordinal
/// order, never more than one segment at a time.
pub(crate) struct Worker {
    pub range: Range<usize>,
    pub sequence: Arc<SegmentSequence>,
    pub fetcher: Arc<SegmentFetcher>,
    pub state: Arc<DownloadState>,
    pub retry: RetryPolicy,
    pub output_dir: PathBuf,
    pub extension: String,
}

impl Worker {
    pub async fn run(self) {
        for index in self.range.clone() {
            // Cancellation is cooperative: checked before every segment.
            if self.state.abort.is_cancelled() {
                debug!(index, "worker observed abort signal, stopping");
                return;
            }

            let Some(segment) = self.sequence.get(index) else {
                self.state.record_failure(DownloadError::Internal {
                    reason: format!("worker range index {index} out of bounds"),
                });
                return;
            };

            let dest = self.output_dir.join(format!("{index}.{}", self.extension));
            let mut downloaded = match self.fetch_with_retry(segment, &dest).await {
                Ok(Some(downloaded)) => downloaded,
                // Cancelled mid-flight: not a failure of this worker.
                Ok(None) => return,
                Err(err) => {
                    self.state.record_failure(err);
                    return;
                }
            };

            let current = self.state.completed.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(index, current, total = self.state.total, "segment completed");

            if let Some(callback) = &self.state.on_segment {
                let result = {
                    let _guard = self.state.callback_lock.as_ref().map(|lock| lock.lock());
                    callback(segment, current, self.state.total, &mut downloaded)
                };
                if let Err(cb_err) = result {
                    drop(downloaded);
                    self.state
                        .record_failure(DownloadError::Callback { source: cb_err });
                    return;
                }
            }
            // File handle closes here, after the callback has seen it.
        }
    }

    /// Attempt the fetch up to the configured budget, sleeping
    /// `backoff_unit * k` before retry `k`. Non-retryable errors and an
    /// exhausted budget escalate to the caller; cancellation surfaces as
    /// `Ok(None)` because it is not a failure of this worker.
    async fn fetch_with_retry(
        &self,
        segment: &Segment,
        dest: &Path,
    ) -> Result<Option<DownloadedSegment>, DownloadError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.fetcher.fetch(segment, dest, &self.state.abort).await {
                Ok(downloaded) => return Ok(Some(downloaded)),
                Err(DownloadError::Cancelled) => return Ok(None),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_retry(attempt);
                    warn!(
                        index = segment.index,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying segment after transient error"
                    );
                    tokio::select! {
                        _ = self.state.abort.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
