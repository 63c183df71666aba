// Key resolution and segment decryption.
//
// The whole stream shares one key and IV: the context is resolved once from
// the first segment's key reference and reused for every segment. Streams
// that violate this are rejected up front by the orchestrator.

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DownloadError;
use crate::segment::Segment;
use crate::source::SegmentSource;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const BLOCK_SIZE: usize = 16;

/// Shared cipher material for every segment of a stream.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    key: [u8; BLOCK_SIZE],
    iv: Vec<u8>,
}

impl CryptoContext {
    /// Resolve the decryption context from the first segment of the sequence.
    ///
    /// Fetches the key bytes from the segment's key URI (one network
    /// round-trip, performed exactly once per download) and picks the IV:
    /// the segment's explicit IV when present and non-empty, otherwise the
    /// key bytes themselves.
    pub async fn resolve(
        source: &dyn SegmentSource,
        first_segment: &Segment,
        token: &CancellationToken,
    ) -> Result<Self, DownloadError> {
        let key_uri = &first_segment.key.uri;
        let key_bytes = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            result = source.fetch_key(key_uri) => result.map_err(|e| match e {
                DownloadError::Cancelled => DownloadError::Cancelled,
                other => DownloadError::key_fetch(key_uri, other.to_string()),
            })?,
        };

        let key: [u8; BLOCK_SIZE] = key_bytes.as_ref().try_into().map_err(|_| {
            DownloadError::cipher_init(format!(
                "key from {} has incorrect length: {} bytes (expected {})",
                key_uri,
                key_bytes.len(),
                BLOCK_SIZE
            ))
        })?;

        let iv = match first_segment.key.explicit_iv() {
            Some(iv) => {
                if iv.len() < BLOCK_SIZE {
                    return Err(DownloadError::cipher_init(format!(
                        "IV is shorter than the cipher block size: {} bytes",
                        iv.len()
                    )));
                }
                iv.to_vec()
            }
            None => key.to_vec(),
        };

        debug!(
            key_uri = %key_uri,
            explicit_iv = first_segment.key.explicit_iv().is_some(),
            "resolved crypto context"
        );
        Ok(Self { key, iv })
    }

    /// Construct a context from known key and IV bytes.
    pub fn from_material(key: [u8; BLOCK_SIZE], iv: Vec<u8>) -> Result<Self, DownloadError> {
        if iv.len() < BLOCK_SIZE {
            return Err(DownloadError::cipher_init(format!(
                "IV is shorter than the cipher block size: {} bytes",
                iv.len()
            )));
        }
        Ok(Self { key, iv })
    }

    /// Decrypt one segment body with AES-128-CBC and strip trailing padding.
    ///
    /// The IV is sliced to the cipher block size. Ciphertext whose length is
    /// not a multiple of the block size is rejected.
    pub fn decrypt(&self, data: Bytes) -> Result<Vec<u8>, DownloadError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(DownloadError::decrypt(format!(
                "ciphertext length {} is not a multiple of the block size",
                data.len()
            )));
        }

        let mut buffer = data.to_vec();
        let decryptor = Aes128CbcDec::new_from_slices(&self.key, &self.iv[..BLOCK_SIZE])
            .map_err(|e| DownloadError::decrypt(format!("failed to initialize decryptor: {e}")))?;
        let decrypted_len = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|e| DownloadError::decrypt(format!("decryption failed: {e}")))?
            .len();
        buffer.truncate(decrypted_len);

        strip_legacy_padding(&mut buffer);
        Ok(buffer)
    }
}

/// PKCS#5/PKCS#7-style padding removal that trusts the last byte blindly.
///
/// The value of the final plaintext byte is taken as the number of bytes to
/// discard from the tail, without checking that the discarded bytes actually
/// form well-formed padding. This mirrors the legacy stream format handling
/// and is a documented weak point; the strip saturates at the buffer length
/// instead of indexing out of range. A hardened variant can replace this
/// function without touching call sites.
pub fn strip_legacy_padding(buffer: &mut Vec<u8>) {
    if let Some(&last) = buffer.last() {
        let pad = last as usize;
        buffer.truncate(buffer.len().saturating_sub(pad));
    }
}
