// Per-segment retrieval: fetch the encrypted body, decrypt it and persist
// the plaintext. Retry policy lives with the caller, not here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::crypto::CryptoContext;
use crate::error::DownloadError;
use crate::segment::Segment;
use crate::source::SegmentSource;

/// A decrypted segment persisted to disk.
///
/// The file handle is rewound to the start so callbacks can read the
/// plaintext directly; closing happens when the value is dropped. The
/// filesystem object itself stays in the output directory until external
/// cleanup.
#[derive(Debug)]
pub struct DownloadedSegment {
    pub path: PathBuf,
    pub file: std::fs::File,
}

pub struct SegmentFetcher {
    source: Arc<dyn SegmentSource>,
    crypto: Arc<CryptoContext>,
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn SegmentSource>, crypto: Arc<CryptoContext>) -> Self {
        Self { source, crypto }
    }

    /// Fetch one segment, decrypt it with the shared context and write the
    /// plaintext to `dest`.
    ///
    /// The network await is raced against the cancellation token so an
    /// external cancel aborts in-flight requests promptly.
    pub async fn fetch(
        &self,
        segment: &Segment,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadedSegment, DownloadError> {
        let encrypted = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            result = self.source.fetch_segment(segment) => result?,
        };

        let plaintext = self.crypto.decrypt(encrypted)?;

        let mut file = tokio::fs::File::create(dest).await?;
        file.write_all(&plaintext).await?;
        file.flush().await?;
        file.rewind().await?;

        debug!(
            index = segment.index,
            size = plaintext.len(),
            path = %dest.display(),
            "segment persisted"
        );

        Ok(DownloadedSegment {
            path: dest.to_path_buf(),
            file: file.into_std().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::io::Read;

    use crate::crypto::tests::encrypt_data;
    use crate::segment::KeyReference;

    struct FixedBodySource {
        body: Vec<u8>,
    }

    #[async_trait]
    impl SegmentSource for FixedBodySource {
        async fn fetch_key(&self, _uri: &str) -> Result<Bytes, DownloadError> {
            unreachable!("fetcher never resolves keys")
        }

        async fn fetch_segment(&self, _segment: &Segment) -> Result<Bytes, DownloadError> {
            Ok(Bytes::from(self.body.clone()))
        }
    }

    fn segment(index: usize) -> Segment {
        Segment {
            index,
            uri: format!("https://example.com/{index}.ts"),
            key: KeyReference::new("https://example.com/key.bin"),
        }
    }

    #[tokio::test]
    async fn fetch_decrypts_and_persists_plaintext() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let plaintext = b"mpeg-ts segment payload";
        let source = Arc::new(FixedBodySource {
            body: encrypt_data(plaintext, &key, &iv),
        });
        let crypto = Arc::new(CryptoContext::from_material(key, iv.to_vec()).unwrap());
        let fetcher = SegmentFetcher::new(source, crypto);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0.ts");
        let token = CancellationToken::new();

        let mut downloaded = fetcher.fetch(&segment(0), &dest, &token).await.unwrap();
        assert_eq!(downloaded.path, dest);

        // The returned handle is rewound and readable.
        let mut from_handle = Vec::new();
        downloaded.file.read_to_end(&mut from_handle).unwrap();
        assert_eq!(from_handle, plaintext);

        assert_eq!(std::fs::read(&dest).unwrap(), plaintext);
    }

    #[tokio::test]
    async fn fetch_returns_cancelled_when_token_is_set() {
        struct NeverResolves;

        #[async_trait]
        impl SegmentSource for NeverResolves {
            async fn fetch_key(&self, _uri: &str) -> Result<Bytes, DownloadError> {
                unreachable!()
            }

            async fn fetch_segment(&self, _segment: &Segment) -> Result<Bytes, DownloadError> {
                futures::future::pending().await
            }
        }

        let crypto = Arc::new(CryptoContext::from_material([0u8; 16], vec![0u8; 16]).unwrap());
        let fetcher = SegmentFetcher::new(Arc::new(NeverResolves), crypto);
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = fetcher
            .fetch(&segment(0), &dir.path().join("0.ts"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
    }
}
