//! Run driver: every input URL is resolved first, then all resolved trees
//! are laid out together under the output root, then downloaded one input
//! at a time.
//!
//! A failing input is reported and skipped. The run itself fails only when
//! the output root is unusable or no input resolves at all.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::classify::Classifier;
use crate::config::{ConfigError, RunConfig};
use crate::dedup::DedupRegistry;
use crate::download::{HttpClient, RateLimiter, RetryPolicy};
use crate::export::{self, RunSummary};
use crate::fetch::{PageSource, SitePageSource};
use crate::layout::{LayoutError, assign_roots};
use crate::orchestrator::{Orchestrator, OrchestratorError, Transfer, UnitReport};
use crate::tree::Node;
use crate::tree::resolver::{ResolutionIssue, ResolveOptions, Resolver};

/// Name of the file used to check the output root is writable.
const WRITE_PROBE: &str = ".ripper-write-test";

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Every input resolved and every unit succeeded or was skipped.
    Success,
    /// Nothing could be done.
    Failure,
    /// The run completed with failed inputs or units.
    Partial,
}

impl ProcessExit {
    /// Process exit code: 0, 1 or 2.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

/// Maps input and unit failure counts to the exit outcome.
#[must_use]
pub fn determine_exit_outcome(failed_inputs: usize, failed_units: usize) -> ProcessExit {
    if failed_inputs == 0 && failed_units == 0 {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}

/// Run-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The output root cannot be created or written.
    #[error("output directory {} is not writable: {source}", path.display())]
    OutputNotWritable {
        /// Output root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Every input failed to resolve.
    #[error("none of the {inputs} input(s) could be resolved")]
    NothingResolved {
        /// Number of inputs given.
        inputs: usize,
    },

    /// Folder naming failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Orchestration stopped.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// What happened to one input.
#[derive(Debug, Clone, Serialize)]
pub struct InputOutcome {
    /// The input URL (fragment stripped).
    pub url: String,
    /// Why the input could not be resolved.
    pub error: Option<String>,
    /// Laid-out tree, when resolved.
    pub tree: Option<Node>,
    /// Non-fatal resolution events.
    pub issues: Vec<ResolutionIssue>,
    /// Per-unit results.
    pub units: Vec<UnitReport>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// One entry per input, in input order.
    pub inputs: Vec<InputOutcome>,
    /// The run was interrupted.
    pub interrupted: bool,
}

impl RunReport {
    /// All unit reports, in order.
    pub fn units(&self) -> impl Iterator<Item = &UnitReport> {
        self.inputs.iter().flat_map(|i| i.units.iter())
    }

    /// Aggregated summary.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let units: Vec<UnitReport> = self.units().cloned().collect();
        RunSummary::from_reports(&units)
    }

    /// Exit outcome for this report.
    #[must_use]
    pub fn exit(&self) -> ProcessExit {
        let failed_inputs = self.inputs.iter().filter(|i| i.error.is_some()).count();
        let failed_units = self.units().filter(|u| u.result.is_failed()).count();
        if self.interrupted {
            return ProcessExit::Partial;
        }
        determine_exit_outcome(failed_inputs, failed_units)
    }
}

/// Strips the fragment of an input URL.
#[must_use]
pub fn strip_fragment(input: &str) -> String {
    match Url::parse(input.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => input.split('#').next().unwrap_or(input).trim().to_string(),
    }
}

/// Parses a URL list: one per line, blank lines and `#` comments ignored.
#[must_use]
pub fn parse_input_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(strip_fragment)
        .collect()
}

fn ensure_writable(dir: &Path) -> Result<(), PipelineError> {
    let not_writable = |source| PipelineError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE);
    fs::write(&probe, b"").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}

/// Wires the resolver and orchestrator together for a run.
#[derive(Debug)]
pub struct Pipeline {
    config: RunConfig,
    resolver: Resolver,
    orchestrator: Orchestrator,
    interrupted: Arc<AtomicBool>,
}

impl Pipeline {
    /// Builds the production stack: one HTTP client and one rate limiter
    /// shared by page fetches and file transfers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Client`] if the HTTP client cannot be built.
    pub fn new(config: RunConfig, interrupted: Arc<AtomicBool>) -> Result<Self, PipelineError> {
        let client = HttpClient::new()?;
        let limiter = if config.request_delay.is_zero() {
            Arc::new(RateLimiter::disabled())
        } else {
            Arc::new(RateLimiter::new(config.request_delay))
        };
        let pages: Arc<dyn PageSource> = Arc::new(SitePageSource::new(
            client.clone(),
            Arc::clone(&limiter),
            RetryPolicy::default(),
        ));
        Ok(Self::from_parts(config, pages, Arc::new(client), limiter, interrupted))
    }

    /// Builds a pipeline over caller-provided collaborators.
    #[must_use]
    pub fn from_parts(
        config: RunConfig,
        pages: Arc<dyn PageSource>,
        transfer: Arc<dyn Transfer>,
        limiter: Arc<RateLimiter>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        let classifier = Arc::new(Classifier::new(Arc::clone(&pages)));
        let resolver = Resolver::new(classifier, ResolveOptions::from_config(&config));
        let orchestrator = Orchestrator::new(config.clone(), transfer, pages, limiter)
            .with_registry(Arc::new(DedupRegistry::new()))
            .with_interrupt(Arc::clone(&interrupted));
        Self {
            config,
            resolver,
            orchestrator,
            interrupted,
        }
    }

    /// Replaces the per-unit retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.orchestrator = self.orchestrator.with_retry_policy(policy);
        self
    }

    /// Resolves every input, lays the trees out in one output namespace,
    /// then downloads them in input order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for run-level failures: invalid
    /// configuration, unwritable output, no resolvable input, or a layout
    /// or orchestration error.
    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    pub async fn run(&self, inputs: &[String]) -> Result<RunReport, PipelineError> {
        self.config.validate()?;
        if !self.config.dry_run {
            ensure_writable(&self.config.output_dir)?;
        }

        let mut report = RunReport::default();
        for input in inputs {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!("interrupted, remaining inputs not processed");
                report.interrupted = true;
                break;
            }
            let url = strip_fragment(input);
            report.inputs.push(self.resolve_input(url).await);
        }

        assign_roots(
            report.inputs.iter_mut().filter_map(|i| i.tree.as_mut()),
            self.config.multi_author_placement,
        )?;

        for outcome in &mut report.inputs {
            let Some(root) = &outcome.tree else {
                continue;
            };
            debug!(
                url = %outcome.url,
                folder = ?root.path().map(|p| &p.relative),
                books = root.book_count(),
                "tree laid out"
            );
            outcome.units = self.orchestrator.run(root).await?;
        }
        if self.interrupted.load(Ordering::SeqCst) {
            report.interrupted = true;
        }

        let resolved = report.inputs.iter().filter(|i| i.error.is_none()).count();
        if !inputs.is_empty() && resolved == 0 && !report.interrupted {
            return Err(PipelineError::NothingResolved {
                inputs: inputs.len(),
            });
        }

        let summary = report.summary();
        info!(
            inputs = report.inputs.len(),
            resolved,
            success = summary.success,
            skipped = summary.skipped,
            failed = summary.failed,
            bytes = summary.bytes,
            "run complete"
        );

        if let Some(path) = &self.config.summary_report {
            match export::write_summary(path, &summary) {
                Ok(()) => info!(path = %path.display(), "summary report written"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to write summary report"),
            }
        }
        Ok(report)
    }

    async fn resolve_input(&self, url: String) -> InputOutcome {
        match self.resolver.resolve(&url).await {
            Ok(resolution) => InputOutcome {
                url,
                error: None,
                tree: Some(resolution.root),
                issues: resolution.issues,
                units: Vec::new(),
            },
            Err(e) => {
                error!(url = %url, error = %e, "input could not be resolved");
                InputOutcome {
                    url,
                    error: Some(e.to_string()),
                    tree: None,
                    issues: Vec::new(),
                    units: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::Failure.code(), 1);
        assert_eq!(ProcessExit::Partial.code(), 2);
    }

    #[test]
    fn test_exit_outcome_success_when_nothing_failed() {
        assert_eq!(determine_exit_outcome(0, 0), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_partial_on_failed_units() {
        assert_eq!(determine_exit_outcome(0, 2), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_partial_on_failed_input() {
        assert_eq!(determine_exit_outcome(1, 0), ProcessExit::Partial);
    }

    #[test]
    fn test_strip_fragment() {
        assert_eq!(
            strip_fragment("https://example.com/livre.html#comments"),
            "https://example.com/livre.html"
        );
        assert_eq!(
            strip_fragment("https://example.com/a.html?x=1"),
            "https://example.com/a.html?x=1"
        );
        assert_eq!(strip_fragment("not a url#frag"), "not a url");
    }

    #[test]
    fn test_parse_input_list_skips_comments_and_blanks() {
        let text = "# mes livres\n\nhttps://example.com/a.html#top\n  https://example.com/b.html  \n#https://example.com/c.html\n";
        assert_eq!(
            parse_input_list(text),
            vec!["https://example.com/a.html", "https://example.com/b.html"]
        );
    }

    #[test]
    fn test_ensure_writable_creates_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("a").join("b");
        ensure_writable(&out).unwrap();
        assert!(out.is_dir());
        assert!(!out.join(WRITE_PROBE).exists());
    }

    #[test]
    fn test_ensure_writable_rejects_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_writable(&file),
            Err(PipelineError::OutputNotWritable { .. })
        ));
    }
}
