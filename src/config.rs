//! Run configuration consumed by the resolver and the orchestrator.
//!
//! The binary builds a [`RunConfig`] from command-line arguments; library
//! callers can construct one directly or deserialize it from JSON (every
//! field has a default).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted worker count.
pub const MIN_THREADS: usize = 1;

/// Largest accepted worker count.
pub const MAX_THREADS: usize = 32;

/// Default worker count.
pub const DEFAULT_THREADS: usize = 4;

/// Errors raised while validating a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Thread count outside `1..=32`.
    #[error("invalid thread count {value}: must be between {MIN_THREADS} and {MAX_THREADS}")]
    InvalidThreads {
        /// The rejected value.
        value: usize,
    },

    /// Unknown `--format` value.
    #[error("unknown format '{value}': expected default, mp3, zip, mp3+zip, all or unzip")]
    UnknownFormat {
        /// The rejected value.
        value: String,
    },

    /// Unknown multi-author placement value.
    #[error("unknown multi-author placement '{value}': expected nested or independent")]
    UnknownPlacement {
        /// The rejected value.
        value: String,
    },
}

/// Which download variants to fetch for each book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatPolicy {
    /// MP3 when available, otherwise ZIP.
    #[default]
    Default,
    /// MP3 only; books without MP3 are skipped.
    Mp3,
    /// ZIP only; books without ZIP are skipped.
    Zip,
    /// MP3 and ZIP when available.
    #[serde(rename = "mp3+zip")]
    Mp3Zip,
    /// Every variant found, including MP3s that duplicate track files.
    All,
    /// ZIP, extracted in place, archive removed.
    Unzip,
}

impl FormatPolicy {
    /// The command-line spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Mp3 => "mp3",
            Self::Zip => "zip",
            Self::Mp3Zip => "mp3+zip",
            Self::All => "all",
            Self::Unzip => "unzip",
        }
    }
}

impl fmt::Display for FormatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "mp3" => Ok(Self::Mp3),
            "zip" => Ok(Self::Zip),
            "mp3+zip" | "mp3zip" => Ok(Self::Mp3Zip),
            "all" => Ok(Self::All),
            "unzip" => Ok(Self::Unzip),
            other => Err(ConfigError::UnknownFormat {
                value: other.to_string(),
            }),
        }
    }
}

/// Where a multi-author project found inside an author/reader/member
/// listing is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiAuthorPlacement {
    /// Nested in the listing folder under its own title.
    #[default]
    NestedInListing,
    /// Own folder `Auteurs divers - {Title}` at the output root.
    IndependentRoot,
}

impl FromStr for MultiAuthorPlacement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nested" | "nested-in-listing" => Ok(Self::NestedInListing),
            "independent" | "independent-root" => Ok(Self::IndependentRoot),
            other => Err(ConfigError::UnknownPlacement {
                value: other.to_string(),
            }),
        }
    }
}

/// Every knob the core consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunConfig {
    /// Output root.
    pub output_dir: PathBuf,
    /// Worker pool size per project.
    pub threads: usize,
    /// Minimum interval between any two requests.
    #[serde(with = "duration_ms")]
    pub request_delay: Duration,
    /// Variant selection policy.
    pub format: FormatPolicy,
    /// Write `cover.*` files and embed covers in tags.
    pub write_cover: bool,
    /// Write `description.txt`.
    pub write_description: bool,
    /// Write per-node JSON metadata.
    pub write_json: bool,
    /// Tag downloaded MP3s.
    pub write_id3: bool,
    /// Skip units whose target already holds audio; alias duplicate books.
    pub skip_duplicates: bool,
    /// Listing page cap (0 = unlimited).
    pub max_pages: usize,
    /// Resolve and report only; write nothing.
    pub dry_run: bool,
    /// Write metadata files but schedule no audio transfers.
    pub metadata_only: bool,
    /// Multi-author project placement inside listings.
    pub multi_author_placement: MultiAuthorPlacement,
    /// Query the WordPress REST API for extra metadata.
    pub wp_api: bool,
    /// Where to write the JSON run summary.
    pub summary_report: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dl"),
            threads: DEFAULT_THREADS,
            request_delay: Duration::ZERO,
            format: FormatPolicy::Default,
            write_cover: true,
            write_description: true,
            write_json: true,
            write_id3: true,
            skip_duplicates: false,
            max_pages: 0,
            dry_run: false,
            metadata_only: false,
            multi_author_placement: MultiAuthorPlacement::NestedInListing,
            wp_api: true,
            summary_report: None,
        }
    }
}

impl RunConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidThreads`] if `threads` is outside `1..=32`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.threads) {
            return Err(ConfigError::InvalidThreads {
                value: self.threads,
            });
        }
        Ok(())
    }

    /// Page cap as an option (`None` = unlimited).
    #[must_use]
    pub fn page_limit(&self) -> Option<usize> {
        (self.max_pages > 0).then_some(self.max_pages)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
