//! Constants for the download module (timeouts, transfer naming).

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout for page, JSON and probe requests (20 seconds).
pub const PAGE_TIMEOUT_SECS: u64 = 20;

/// Default HTTP read timeout for audio/archive transfers (2 minutes).
pub const TRANSFER_TIMEOUT_SECS: u64 = 120;

/// Suffix of in-progress transfers; renamed away once the body is complete.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Longest file or folder name produced by [`super::filename::sanitize_filename`].
pub const MAX_NAME_CHARS: usize = 180;
