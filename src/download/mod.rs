//! HTTP transport for pages, probes and file transfers.
//!
//! This module is the transport collaborator the rest of the crate builds on:
//! a shared [`HttpClient`], the [`DownloadError`] taxonomy, the
//! [`RetryPolicy`] applied on top of it, and the run-wide [`RateLimiter`].
//!
//! # Features
//!
//! - Streaming transfers to `<name>.part`, renamed into place on completion
//! - HEAD probes that report final URL, Content-Disposition filename and type
//! - Structured error types with full context
//! - Exponential backoff with jitter, honouring Retry-After
//!
//! # Example
//!
//! ```no_run
//! use ripper_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let bytes = client
//!     .download_to_file("https://example.com/01.mp3", Path::new("./dl/01.mp3"))
//!     .await?;
//! println!("Downloaded {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod filename;
pub mod rate_limiter;
mod retry;

pub use client::{BROWSER_USER_AGENT, FetchedBytes, HttpClient, ProbeInfo, partial_path};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
