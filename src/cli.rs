//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ripper_core::config::{DEFAULT_THREADS, MAX_THREADS, MIN_THREADS};
use ripper_core::{FormatPolicy, MultiAuthorPlacement, RunConfig};

/// Default file for `--summary-report` given without a path.
pub const DEFAULT_SUMMARY_FILE: &str = "summary.json";

/// Download audiobooks, collective projects and author listings.
///
/// Every input URL is classified, resolved into a tree of projects, books
/// and tracks, laid out as folders under the output directory, and
/// downloaded.
#[derive(Parser, Debug)]
#[command(name = "ripper")]
#[command(author, version, about)]
#[allow(clippy::struct_excessive_bools)]
pub struct Args {
    /// Book, project or listing URLs
    pub urls: Vec<String>,

    /// Read URLs from a file (one per line, '#' comments allowed)
    #[arg(long, value_name = "FILE")]
    pub txt: Option<PathBuf>,

    /// Verify an existing output folder instead of downloading
    #[arg(long, value_name = "DIR", conflicts_with_all = ["urls", "txt"])]
    pub verify: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "dl")]
    pub output: PathBuf,

    /// Parallel downloads within a project (1-32)
    #[arg(short, long, default_value_t = DEFAULT_THREADS, value_parser = parse_threads)]
    pub threads: usize,

    /// Download one file at a time (same as --threads 1)
    #[arg(long)]
    pub sequential: bool,

    /// Minimum delay between requests in milliseconds (0 to disable)
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub sleep: u64,

    /// Variants to fetch: default, mp3, zip, mp3+zip, all, unzip
    #[arg(long, default_value = "default")]
    pub format: FormatPolicy,

    /// Do not save cover images
    #[arg(long)]
    pub no_cover: bool,

    /// Do not write description.txt
    #[arg(long)]
    pub no_description: bool,

    /// Do not write JSON metadata
    #[arg(long)]
    pub no_json: bool,

    /// Do not write ID3 tags
    #[arg(long)]
    pub no_id3: bool,

    /// Skip files already present and alias books seen earlier in the run
    #[arg(long)]
    pub no_duplicates: bool,

    /// Maximum listing pages to follow (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_pages: usize,

    /// Resolve and report without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Write metadata files only, no audio
    #[arg(long)]
    pub metadata_only: bool,

    /// Placement of multi-author projects found on listings: nested, independent
    #[arg(long, value_name = "PLACEMENT", default_value = "nested")]
    pub multi_author: MultiAuthorPlacement,

    /// Do not query the WordPress REST API
    #[arg(long)]
    pub no_wp_api: bool,

    /// Write a JSON run summary (default: <output>/summary.json)
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "")]
    pub summary_report: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

fn parse_threads(value: &str) -> Result<usize, String> {
    let threads: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (MIN_THREADS..=MAX_THREADS).contains(&threads) {
        Ok(threads)
    } else {
        Err(format!("must be between {MIN_THREADS} and {MAX_THREADS}"))
    }
}

impl Args {
    /// Log level implied by `-v`/`-q`.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Builds the run configuration.
    #[must_use]
    pub fn run_config(&self) -> RunConfig {
        let summary_report = self.summary_report.as_ref().map(|path| {
            if path.as_os_str().is_empty() {
                self.output.join(DEFAULT_SUMMARY_FILE)
            } else {
                path.clone()
            }
        });
        RunConfig {
            output_dir: self.output.clone(),
            threads: if self.sequential { 1 } else { self.threads },
            request_delay: Duration::from_millis(self.sleep),
            format: self.format,
            write_cover: !self.no_cover,
            write_description: !self.no_description,
            write_json: !self.no_json,
            write_id3: !self.no_id3,
            skip_duplicates: self.no_duplicates,
            max_pages: self.max_pages,
            dry_run: self.dry_run,
            metadata_only: self.metadata_only,
            multi_author_placement: self.multi_author,
            wp_api: !self.no_wp_api,
            summary_report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["ripper"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.threads, 4);
        assert_eq!(args.format, FormatPolicy::Default);
        assert_eq!(args.output, PathBuf::from("dl"));
        assert!(args.urls.is_empty());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["ripper", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.default_log_level(), "trace");

        let args = Args::try_parse_from(["ripper", "-q"]).unwrap();
        assert_eq!(args.default_log_level(), "error");
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["ripper", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["ripper", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Threads Tests ====================

    #[test]
    fn test_cli_threads_range() {
        assert_eq!(Args::try_parse_from(["ripper", "-t", "1"]).unwrap().threads, 1);
        assert_eq!(Args::try_parse_from(["ripper", "-t", "32"]).unwrap().threads, 32);
        let err = Args::try_parse_from(["ripper", "-t", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = Args::try_parse_from(["ripper", "--threads", "33"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_sequential_forces_one_thread() {
        let args = Args::try_parse_from(["ripper", "-t", "8", "--sequential"]).unwrap();
        assert_eq!(args.run_config().threads, 1);
    }

    // ==================== Format Tests ====================

    #[test]
    fn test_cli_format_values() {
        let args = Args::try_parse_from(["ripper", "--format", "mp3+zip"]).unwrap();
        assert_eq!(args.format, FormatPolicy::Mp3Zip);
        let err = Args::try_parse_from(["ripper", "--format", "flac"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_multi_author_placement() {
        let args = Args::try_parse_from(["ripper", "--multi-author", "independent"]).unwrap();
        assert_eq!(args.multi_author, MultiAuthorPlacement::IndependentRoot);
    }

    // ==================== RunConfig Tests ====================

    #[test]
    fn test_cli_toggles_map_to_config() {
        let args = Args::try_parse_from([
            "ripper",
            "--no-cover",
            "--no-id3",
            "--no-duplicates",
            "--no-wp-api",
            "--sleep",
            "250",
            "--max-pages",
            "3",
        ])
        .unwrap();
        let config = args.run_config();
        assert!(!config.write_cover);
        assert!(!config.write_id3);
        assert!(config.write_json);
        assert!(config.skip_duplicates);
        assert!(!config.wp_api);
        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert_eq!(config.page_limit(), Some(3));
    }

    #[test]
    fn test_cli_summary_report_default_path() {
        let args = Args::try_parse_from(["ripper", "-o", "out", "--summary-report"]).unwrap();
        assert_eq!(
            args.run_config().summary_report,
            Some(PathBuf::from("out").join("summary.json"))
        );

        let args = Args::try_parse_from(["ripper", "--summary-report", "r.json"]).unwrap();
        assert_eq!(args.run_config().summary_report, Some(PathBuf::from("r.json")));

        let args = Args::try_parse_from(["ripper"]).unwrap();
        assert_eq!(args.run_config().summary_report, None);
    }

    #[test]
    fn test_cli_verify_conflicts_with_urls() {
        let err = Args::try_parse_from(["ripper", "--verify", "dl", "https://example.com/a.html"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
