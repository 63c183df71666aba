//! # Vodio
//!
//! A library for downloading encrypted VOD media streams that are split into
//! many small, sequentially-numbered segments. The engine fetches segments
//! concurrently, decrypts each with the stream's shared AES-128-CBC key
//! material and persists them under ordinal filenames so they can later be
//! concatenated into a single playable file.
//!
//! ## Features
//!
//! - Static partitioning of the segment sequence across parallel workers
//! - Per-segment retry with linear backoff for transient network failures
//! - Cooperative cancellation threaded through every network await
//! - Per-segment caller callbacks with optional serialized invocation
//! - A pluggable network seam for testing and alternative transports

pub mod config;
pub mod crypto;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod segment;
pub mod source;

mod worker;

pub use config::{DEFAULT_USER_AGENT, DownloadConfig, RetryPolicy, create_client};
pub use crypto::{CryptoContext, strip_legacy_padding};
pub use download::{DownloadOptions, Downloader};
pub use error::{CallbackError, DownloadError};
pub use fetcher::{DownloadedSegment, SegmentFetcher};
pub use segment::{KeyReference, Segment, SegmentSequence};
pub use source::{HttpSource, SegmentSource};
pub use worker::SegmentCallback;
