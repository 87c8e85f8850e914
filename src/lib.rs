//! Ripper Core Library
//!
//! Crawls an audiobook catalog site, rebuilds the tree of listings,
//! collective projects, books and tracks it describes, lays that tree out
//! as collision-free folders, and downloads it concurrently with retry and
//! duplicate avoidance.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - HTTP transport, retry policy, rate limiter, file naming
//! - [`page`] - HTML parsing into owned node lists and site metadata extraction
//! - [`fetch`] - Page source seam with rate-limited, retrying implementation
//! - [`classify`] - URL classification with a per-run page cache
//! - [`tracks`] - "Load more" track batches
//! - [`tree`] - Resolved tree model, sommaire strategies and the resolver
//! - [`layout`] - Folder path assignment
//! - [`dedup`] - Run-wide target path registry and duplicate aliases
//! - [`orchestrator`] - Concurrent, retrying downloads over a laid-out tree
//! - [`media`] - ID3 tagging and ZIP extraction
//! - [`export`] - Metadata files and run summary
//! - [`pipeline`] - Per-input resolve, layout and download driver
//! - [`verify`] - Output folder verification
//! - [`config`] - Run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod dedup;
pub mod download;
pub mod export;
pub mod fetch;
pub mod layout;
pub mod media;
pub mod orchestrator;
pub mod page;
pub mod pipeline;
pub mod tracks;
pub mod tree;
pub mod verify;

// Re-export commonly used types
pub use classify::Classifier;
pub use config::{ConfigError, FormatPolicy, MultiAuthorPlacement, RunConfig};
pub use dedup::{DedupRegistry, DedupState};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, FailureType, HttpClient, RateLimiter, RetryDecision,
    RetryPolicy, classify_error,
};
pub use fetch::{PageSource, SitePageSource};
pub use layout::{LayoutError, assign_paths};
pub use orchestrator::{DownloadResult, Orchestrator, SkipReason, Transfer, UnitReport};
pub use pipeline::{Pipeline, PipelineError, ProcessExit, RunReport, parse_input_list};
pub use tree::resolver::{Resolution, ResolveError, Resolver};
pub use tree::{BookNode, Node, ProjectNode, UrlKind};
pub use verify::{VerifyReport, verify_dir};
