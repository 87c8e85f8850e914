//! Transport failures.
//!
//! Page loads, "load more" batches, HEAD probes and file transfers all fail
//! with a [`DownloadError`]. The variant decides what [`super::classify_error`]
//! makes of it: retry, wait for the server, or give up on the unit.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A failed request against the catalog site or a file host.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection-level failure. TLS failures are not retried.
    #[error("request to {url} failed: {source}")]
    Network {
        /// Requested URL.
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No complete response within the page or transfer timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Non-2xx answer.
    #[error("{url} answered HTTP {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
        /// Raw `Retry-After` header, kept for the rate limiter.
        retry_after: Option<String>,
    },

    /// Writing the `.part` file or renaming it into place failed.
    #[error("cannot write {}: {source}", path.display())]
    Io {
        /// File being written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not an absolute http(s) URL.
    #[error("not a fetchable URL: {url}")]
    InvalidUrl {
        /// Offending input.
        url: String,
    },

    /// A page or JSON body that could not be read.
    #[error("unreadable body from {url}: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder message.
        reason: String,
    },
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Attaches a `Retry-After` header to an [`DownloadError::HttpStatus`].
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_retry_after(mut self, header: Option<String>) -> Self {
        if let Self::HttpStatus { retry_after, .. } = &mut self {
            *retry_after = header;
        }
        self
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// The server's `Retry-After` value, when it sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}
