use reqwest::StatusCode;

/// Boxed error returned by a caller-supplied segment callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("failed to fetch decryption key from `{uri}`: {reason}")]
    KeyFetch { uri: String, reason: String },

    #[error("failed to initialize cipher: {reason}")]
    CipherInit { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("decryption error: {reason}")]
    Decrypt { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("segment callback failed: {source}")]
    Callback {
        #[source]
        source: CallbackError,
    },

    #[error("unsupported stream format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn key_fetch(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyFetch {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn cipher_init(reason: impl Into<String>) -> Self {
        Self::CipherInit {
            reason: reason.into(),
        }
    }

    pub fn decrypt(reason: impl Into<String>) -> Self {
        Self::Decrypt {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn unsupported_format(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a per-segment attempt that failed with this error may be
    /// retried within the worker's attempt budget.
    ///
    /// Transport failures, server-side HTTP errors and malformed ciphertext
    /// are treated as transient. I/O failures are environment failures and
    /// callback errors are caller decisions; neither is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Decrypt { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Cancelled
            | Self::KeyFetch { .. }
            | Self::CipherInit { .. }
            | Self::Io { .. }
            | Self::Callback { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Configuration { .. }
            | Self::Playlist { .. }
            | Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://x/0.ts", "segment");
        assert!(err.is_retryable());
        let err =
            DownloadError::http_status(StatusCode::TOO_MANY_REQUESTS, "http://x/0.ts", "segment");
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = DownloadError::http_status(StatusCode::NOT_FOUND, "http://x/0.ts", "segment");
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_and_callback_errors_are_not_retryable() {
        let err = DownloadError::from(std::io::Error::other("disk full"));
        assert!(!err.is_retryable());
        let err = DownloadError::Callback {
            source: "caller aborted".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn decrypt_errors_are_retryable() {
        assert!(DownloadError::decrypt("short read").is_retryable());
    }
}
