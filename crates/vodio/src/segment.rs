// Segment descriptors and range partitioning for the download pipeline.

use std::ops::Range;

use url::Url;

use crate::error::DownloadError;

/// Reference to the key material protecting a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReference {
    /// URI the key bytes are fetched from.
    pub uri: String,
    /// Explicit initialization vector, when the manifest carries one.
    /// An empty vector is treated the same as no IV at all.
    pub iv: Option<Vec<u8>>,
}

impl KeyReference {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            iv: None,
        }
    }

    pub fn with_iv(uri: impl Into<String>, iv: Vec<u8>) -> Self {
        Self {
            uri: uri.into(),
            iv: Some(iv),
        }
    }

    /// The explicit IV, if present and non-empty.
    pub fn explicit_iv(&self) -> Option<&[u8]> {
        self.iv.as_deref().filter(|iv| !iv.is_empty())
    }
}

/// One individually encrypted chunk of the overall stream.
///
/// Immutable once obtained from the manifest; the ordinal index determines
/// the output filename and the eventual concatenation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the stream, starting at 0.
    pub index: usize,
    /// Absolute source URI of the encrypted segment body.
    pub uri: String,
    /// Key material reference.
    pub key: KeyReference,
}

/// Ordered, read-only sequence of segments with length known up front.
#[derive(Debug, Clone, Default)]
pub struct SegmentSequence {
    segments: Vec<Segment>,
}

impl SegmentSequence {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Split the sequence into contiguous, disjoint index ranges, one per
    /// worker. Chunk size is `ceil(len / worker_count)`; the last range may
    /// be shorter, and fewer than `worker_count` ranges are returned when
    /// there are not enough segments to go around.
    pub fn partition(&self, worker_count: usize) -> Vec<Range<usize>> {
        debug_assert!(worker_count >= 1);
        let total = self.segments.len();
        if total == 0 {
            return Vec::new();
        }
        let chunk = total.div_ceil(worker_count);
        (0..total)
            .step_by(chunk)
            .map(|start| start..(start + chunk).min(total))
            .collect()
    }

    /// Build a sequence from an already-parsed media playlist.
    ///
    /// Relative URIs are resolved against `base_url`. Key tags apply to every
    /// subsequent segment until the next tag, per HLS semantics; hex IV
    /// attributes (with or without a `0x` prefix) are decoded to bytes.
    /// Streams with non-AES-128 key methods or segments preceding any key tag
    /// are rejected as unsupported.
    pub fn from_media_playlist(
        playlist: &m3u8_rs::MediaPlaylist,
        base_url: &str,
    ) -> Result<Self, DownloadError> {
        let base = Url::parse(base_url).map_err(|e| DownloadError::Playlist {
            reason: format!("invalid base URL {base_url}: {e}"),
        })?;

        let mut current_key: Option<KeyReference> = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());

        for (index, media_segment) in playlist.segments.iter().enumerate() {
            if let Some(key_tag) = &media_segment.key {
                current_key = Some(key_reference_from_tag(key_tag, &base)?);
            }

            let key = current_key.clone().ok_or_else(|| {
                DownloadError::unsupported_format(format!(
                    "segment {index} is not covered by any key tag"
                ))
            })?;

            segments.push(Segment {
                index,
                uri: resolve_uri(&base, &media_segment.uri)?,
                key,
            });
        }

        Ok(Self::new(segments))
    }
}

fn key_reference_from_tag(
    key_tag: &m3u8_rs::Key,
    base: &Url,
) -> Result<KeyReference, DownloadError> {
    if key_tag.method != m3u8_rs::KeyMethod::AES128 {
        return Err(DownloadError::unsupported_format(format!(
            "unsupported key method: {:?}",
            key_tag.method
        )));
    }

    let uri = key_tag.uri.as_deref().ok_or_else(|| DownloadError::Playlist {
        reason: "key tag is missing a URI".to_string(),
    })?;

    let iv = match &key_tag.iv {
        Some(iv_hex) => Some(parse_iv(iv_hex)?),
        None => None,
    };

    Ok(KeyReference {
        uri: resolve_uri(base, uri)?,
        iv,
    })
}

fn parse_iv(iv_hex_str: &str) -> Result<Vec<u8>, DownloadError> {
    let iv_str = iv_hex_str.trim_start_matches("0x");
    hex::decode(iv_str).map_err(|e| DownloadError::Playlist {
        reason: format!("failed to parse IV '{iv_hex_str}': {e}"),
    })
}

fn resolve_uri(base: &Url, uri: &str) -> Result<String, DownloadError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    base.join(uri)
        .map(|url| url.to_string())
        .map_err(|e| DownloadError::Playlist {
            reason: format!("could not join base URL {base} with URI {uri}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence_of(len: usize) -> SegmentSequence {
        let segments = (0..len)
            .map(|index| Segment {
                index,
                uri: format!("https://example.com/{index}.ts"),
                key: KeyReference::new("https://example.com/key"),
            })
            .collect();
        SegmentSequence::new(segments)
    }

    #[test]
    fn partition_covers_all_indices_disjointly() {
        for total in 1..=40 {
            for workers in 1..=8 {
                let sequence = sequence_of(total);
                let ranges = sequence.partition(workers);
                let chunk = total.div_ceil(workers);

                let mut expected_next = 0;
                for range in &ranges {
                    assert_eq!(range.start, expected_next, "N={total} W={workers}");
                    assert!(range.len() <= chunk, "N={total} W={workers}");
                    assert!(!range.is_empty(), "N={total} W={workers}");
                    expected_next = range.end;
                }
                assert_eq!(expected_next, total, "N={total} W={workers}");
                assert!(ranges.len() <= workers, "N={total} W={workers}");
            }
        }
    }

    #[test]
    fn partition_of_empty_sequence_is_empty() {
        assert!(sequence_of(0).partition(4).is_empty());
    }

    #[test]
    fn partition_last_range_may_be_short() {
        let ranges = sequence_of(10).partition(4);
        // chunk = ceil(10 / 4) = 3
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..10]);
    }

    #[test]
    fn explicit_iv_ignores_empty_vectors() {
        let key = KeyReference::with_iv("https://example.com/key", Vec::new());
        assert!(key.explicit_iv().is_none());
        let key = KeyReference::with_iv("https://example.com/key", vec![1, 2, 3]);
        assert_eq!(key.explicit_iv(), Some(&[1u8, 2, 3][..]));
    }

    fn media_segment(uri: &str, key: Option<m3u8_rs::Key>) -> m3u8_rs::MediaSegment {
        m3u8_rs::MediaSegment {
            uri: uri.to_string(),
            key,
            ..Default::default()
        }
    }

    fn aes_key(uri: &str, iv: Option<&str>) -> m3u8_rs::Key {
        m3u8_rs::Key {
            method: m3u8_rs::KeyMethod::AES128,
            uri: Some(uri.to_string()),
            iv: iv.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn playlist_adapter_propagates_key_and_resolves_uris() {
        let playlist = m3u8_rs::MediaPlaylist {
            segments: vec![
                media_segment("0.ts", Some(aes_key("key.bin", Some("0x00000000000000000000000000000001")))),
                media_segment("1.ts", None),
            ],
            ..Default::default()
        };

        let sequence =
            SegmentSequence::from_media_playlist(&playlist, "https://cdn.example.com/vod/")
                .unwrap();
        assert_eq!(sequence.len(), 2);
        let first = sequence.get(0).unwrap();
        assert_eq!(first.uri, "https://cdn.example.com/vod/0.ts");
        assert_eq!(first.key.uri, "https://cdn.example.com/vod/key.bin");
        let mut expected_iv = vec![0u8; 16];
        expected_iv[15] = 1;
        assert_eq!(first.key.iv.as_deref(), Some(expected_iv.as_slice()));

        // Key tag applies forward to the second segment.
        let second = sequence.get(1).unwrap();
        assert_eq!(second.key, first.key);
        assert_eq!(second.index, 1);
    }

    #[test]
    fn playlist_adapter_rejects_keyless_segments() {
        let playlist = m3u8_rs::MediaPlaylist {
            segments: vec![media_segment("0.ts", None)],
            ..Default::default()
        };
        let err = SegmentSequence::from_media_playlist(&playlist, "https://cdn.example.com/")
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedFormat { .. }));
    }

    #[test]
    fn playlist_adapter_rejects_non_aes_methods() {
        let key = m3u8_rs::Key {
            method: m3u8_rs::KeyMethod::SampleAES,
            uri: Some("key.bin".to_string()),
            ..Default::default()
        };
        let playlist = m3u8_rs::MediaPlaylist {
            segments: vec![media_segment("0.ts", Some(key))],
            ..Default::default()
        };
        let err = SegmentSequence::from_media_playlist(&playlist, "https://cdn.example.com/")
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedFormat { .. }));
    }
}
