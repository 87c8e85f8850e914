//! Download orchestration over a laid-out tree.
//!
//! The tree is walked container by container in pre-order. For each
//! container the orchestrator writes its metadata first, then dispatches the
//! download units of its direct books to a semaphore-bounded worker pool,
//! waits for all of them, and finalizes the books (tags, archive
//! extraction, JSON). Only then does it move on to the next container, so
//! two projects never write at the same time.
//!
//! Every unit goes through the [`DedupRegistry`] before its transfer and
//! gets at most [`RetryPolicy::max_attempts`] attempts. A failed unit never
//! stops its siblings.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{FormatPolicy, RunConfig};
use crate::dedup::{Claim, DedupRegistry, create_shortcut};
use crate::download::filename::{extension_of, sanitize_filename, url_file_name};
use crate::download::{
    DownloadError, FailureType, HttpClient, RateLimiter, RetryDecision, RetryPolicy,
    classify_error,
};
use crate::export;
use crate::fetch::{PageSource, record_retry_after};
use crate::media::{self, CoverImage, TagFields};
use crate::tree::{BookNode, DownloadVariant, Node, VariantKind, VariantScope};

/// Why a unit was not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Audio already at the target path.
    AlreadyPresent,
    /// Another worker holds the target path.
    InFlight,
    /// The book was materialised in another folder earlier in the run.
    AlreadyDownloaded,
    /// Dry run.
    DryRun,
    /// The run was interrupted before the unit started.
    Cancelled,
    /// The format policy selects nothing this book offers.
    NoMatchingVariant,
}

impl SkipReason {
    /// Stable label used in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyPresent => "already_present",
            Self::InFlight => "in_flight",
            Self::AlreadyDownloaded => "already_downloaded",
            Self::DryRun => "dry_run",
            Self::Cancelled => "cancelled",
            Self::NoMatchingVariant => "no_matching_variant",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one download unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResult {
    /// The file is in place.
    Success {
        /// Attempts used, 1-based.
        attempts: u32,
        /// Bytes written.
        bytes: u64,
    },
    /// Not transferred.
    Skipped(SkipReason),
    /// Every attempt failed.
    Failed {
        /// Last error.
        error: String,
        /// Attempts made.
        attempts: u32,
    },
}

impl DownloadResult {
    /// True for [`DownloadResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// True for [`DownloadResult::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One planned file transfer of a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadUnit {
    /// Format.
    pub kind: VariantKind,
    /// URL to fetch.
    pub url: String,
    /// Track index for track-level files.
    pub track: Option<u32>,
    /// File name inside the book folder.
    pub filename: String,
}

/// A unit's result with the context reporting needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    /// Book page URL.
    pub book_url: String,
    /// Book title.
    pub book_title: String,
    /// Book author.
    pub author: Option<String>,
    /// Top-level folder the unit belongs to.
    pub group: String,
    /// Variant format; `None` when no variant matched.
    pub kind: Option<VariantKind>,
    /// File URL (the book URL when no variant matched).
    pub url: String,
    /// Target path.
    pub target: PathBuf,
    /// Outcome.
    pub result: DownloadResult,
}

/// Errors that stop the orchestration of a tree.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The worker pool was closed.
    #[error("worker pool closed")]
    SemaphoreClosed,

    /// A node reached the orchestrator without a layout path.
    #[error("node {url} has no assigned folder")]
    Unplaced {
        /// Node URL.
        url: String,
    },
}

/// Streams one remote file to a local path.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Downloads `url` to `dest`, returning the bytes written.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

#[async_trait]
impl Transfer for HttpClient {
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.download_to_file(url, dest).await
    }
}

/// Selects the variants `policy` wants from `book` and names their files.
///
/// # Errors
///
/// Returns [`SkipReason::NoMatchingVariant`] when the selection is empty.
pub fn plan_units(book: &BookNode, policy: FormatPolicy) -> Result<Vec<DownloadUnit>, SkipReason> {
    let track_mp3: Vec<&DownloadVariant> = book
        .variants_of(VariantKind::Mp3)
        .filter(|v| matches!(v.scope, VariantScope::Track(_)))
        .collect();
    let book_mp3: Vec<&DownloadVariant> = book
        .variants_of(VariantKind::Mp3)
        .filter(|v| v.scope == VariantScope::Book)
        .collect();
    let zips: Vec<&DownloadVariant> = book.variants_of(VariantKind::Zip).collect();

    // Track files and a whole-book MP3 usually carry the same audio.
    let mp3 = if track_mp3.is_empty() {
        book_mp3.clone()
    } else {
        track_mp3.clone()
    };

    let chosen: Vec<&DownloadVariant> = match policy {
        FormatPolicy::Default if mp3.is_empty() => zips,
        FormatPolicy::Default | FormatPolicy::Mp3 => mp3,
        FormatPolicy::Zip | FormatPolicy::Unzip => zips,
        FormatPolicy::Mp3Zip => mp3.into_iter().chain(zips).collect(),
        FormatPolicy::All => track_mp3.into_iter().chain(book_mp3).chain(zips).collect(),
    };
    if chosen.is_empty() {
        return Err(SkipReason::NoMatchingVariant);
    }

    let mut seen_urls = HashSet::new();
    let mut taken = HashSet::new();
    let mut units = Vec::new();
    for variant in chosen {
        if !seen_urls.insert(variant.url.as_str()) {
            continue;
        }
        let filename = unique_name(&unit_filename(book, variant), &mut taken);
        units.push(DownloadUnit {
            kind: variant.kind,
            url: variant.url.clone(),
            track: match variant.scope {
                VariantScope::Track(index) => Some(index),
                VariantScope::Book => None,
            },
            filename,
        });
    }
    Ok(units)
}

/// File name for `variant`: the server's name, else the URL's, else one
/// built from the title.
#[must_use]
pub fn unit_filename(book: &BookNode, variant: &DownloadVariant) -> String {
    let ext = variant.kind.extension();
    let has_ext = |name: &String| extension_of(name).as_deref() == Some(ext);

    let name = variant
        .filename
        .clone()
        .filter(has_ext)
        .or_else(|| url_file_name(&variant.url).filter(has_ext))
        .unwrap_or_else(|| match variant.scope {
            VariantScope::Track(index) => format!(
                "{index:02} - {}.{ext}",
                book.track_title(index).unwrap_or(&book.title)
            ),
            VariantScope::Book => format!("{}.{ext}", book.title),
        });
    sanitize_filename(&name)
}

fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let mut n = 2;
    loop {
        let candidate = if ext.is_empty() {
            format!("{stem} ({n})")
        } else {
            format!("{stem} ({n}).{ext}")
        };
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

/// Shared state a spawned unit task needs.
#[derive(Clone)]
struct UnitContext {
    transfer: Arc<dyn Transfer>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    registry: Arc<DedupRegistry>,
    skip_existing: bool,
}

/// A book ready for its units to run.
struct PreparedBook<'a> {
    node: &'a Node,
    book: &'a BookNode,
    folder: PathBuf,
    cover: Option<CoverImage>,
    units: Vec<DownloadUnit>,
}

/// A container and its direct books, processed as one step.
struct Phase<'a> {
    container: Option<&'a Node>,
    books: Vec<&'a Node>,
}

fn phases(root: &Node) -> Vec<Phase<'_>> {
    fn walk<'a>(node: &'a Node, out: &mut Vec<Phase<'a>>) {
        out.push(Phase {
            container: Some(node),
            books: node
                .children()
                .iter()
                .filter(|c| matches!(c, Node::Book(_)))
                .collect(),
        });
        for child in node.children() {
            if !matches!(child, Node::Book(_)) {
                walk(child, out);
            }
        }
    }

    let mut out = Vec::new();
    if matches!(root, Node::Book(_)) {
        out.push(Phase {
            container: None,
            books: vec![root],
        });
    } else {
        walk(root, &mut out);
    }
    out
}

enum Slot {
    Done(DownloadResult),
    Running(JoinHandle<DownloadResult>),
}

/// Walks laid-out trees and downloads their books.
pub struct Orchestrator {
    config: RunConfig,
    transfer: Arc<dyn Transfer>,
    pages: Arc<dyn PageSource>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    registry: Arc<DedupRegistry>,
    semaphore: Arc<Semaphore>,
    interrupted: Arc<AtomicBool>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("output_dir", &self.config.output_dir)
            .field("threads", &self.config.threads)
            .field("format", &self.config.format)
            .field("max_attempts", &self.policy.max_attempts())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with `config.threads` workers.
    #[must_use]
    pub fn new(
        config: RunConfig,
        transfer: Arc<dyn Transfer>,
        pages: Arc<dyn PageSource>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let workers = config.threads.max(1);
        debug!(workers, format = %config.format, "creating orchestrator");
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            config,
            transfer,
            pages,
            limiter,
            policy: RetryPolicy::default(),
            registry: Arc::new(DedupRegistry::new()),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the per-unit retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shares a registry across several orchestrated trees.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DedupRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Uses `flag` as the run-level interrupt.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// The dedup registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DedupRegistry> {
        &self.registry
    }

    /// Downloads everything under `root`, which must be laid out.
    ///
    /// Returns one report per unit, in dispatch order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if a node has no path or the pool
    /// closes. Unit failures are reported, not returned.
    #[instrument(skip(self, root), fields(root = %root.source_url()))]
    pub async fn run(&self, root: &Node) -> Result<Vec<UnitReport>, OrchestratorError> {
        let group = root
            .path()
            .map_or_else(|| root.title().to_string(), |p| p.segment.clone());
        let mut reports = Vec::new();

        for phase in phases(root) {
            if let Some(container) = phase.container {
                self.write_container(container).await?;
            }
            let phase_reports = self.process_books(&phase.books, &group).await?;
            reports.extend(phase_reports);
        }

        let success = reports.iter().filter(|r| r.result.is_success()).count();
        let failed = reports.iter().filter(|r| r.result.is_failed()).count();
        info!(
            success,
            failed,
            skipped = reports.len() - success - failed,
            "tree processed"
        );
        Ok(reports)
    }

    fn folder_of(&self, node: &Node) -> Result<PathBuf, OrchestratorError> {
        node.path()
            .map(|p| self.config.output_dir.join(&p.relative))
            .ok_or_else(|| OrchestratorError::Unplaced {
                url: node.source_url().to_string(),
            })
    }

    async fn write_container(&self, node: &Node) -> Result<(), OrchestratorError> {
        let folder = self.folder_of(node)?;
        if self.config.dry_run {
            info!(folder = %folder.display(), "would create folder");
            return Ok(());
        }
        if let Err(e) = tokio::fs::create_dir_all(&folder).await {
            warn!(folder = %folder.display(), error = %e, "failed to create folder");
            return Ok(());
        }

        if let Node::Project(project) = node {
            if self.config.write_cover {
                if let Some(url) = &project.cover_url {
                    self.fetch_cover(url, &folder, true).await;
                }
            }
            if self.config.write_description {
                if let Some(text) = &project.description {
                    if let Err(e) = export::write_description(&folder, text) {
                        warn!(error = %e, "failed to write description");
                    }
                }
            }
        }
        if self.config.write_json {
            if let Err(e) = export::write_metadata(&folder, node, Vec::new()) {
                warn!(error = %e, "failed to write metadata");
            }
        }
        Ok(())
    }

    /// Fetches a cover, optionally saving it as `cover.<ext>`.
    async fn fetch_cover(&self, url: &str, folder: &Path, save: bool) -> Option<CoverImage> {
        let fetched = match self.pages.get_bytes(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(url = %url, error = %e, "cover download failed");
                return None;
            }
        };
        if save {
            if let Err(e) = export::write_cover(folder, &fetched.bytes, fetched.content_type.as_deref())
            {
                warn!(error = %e, "failed to write cover");
            }
        }
        Some(CoverImage {
            mime_type: fetched
                .content_type
                .as_deref()
                .and_then(|ct| ct.split(';').next())
                .map_or_else(|| "image/jpeg".to_string(), |ct| ct.trim().to_string()),
            data: fetched.bytes,
        })
    }

    fn report(
        group: &str,
        book: &BookNode,
        unit: Option<&DownloadUnit>,
        target: PathBuf,
        result: DownloadResult,
    ) -> UnitReport {
        UnitReport {
            book_url: book.source_url.clone(),
            book_title: book.title.clone(),
            author: book.author.clone(),
            group: group.to_string(),
            kind: unit.map(|u| u.kind),
            url: unit.map_or_else(|| book.source_url.clone(), |u| u.url.clone()),
            target,
            result,
        }
    }

    async fn process_books(
        &self,
        books: &[&Node],
        group: &str,
    ) -> Result<Vec<UnitReport>, OrchestratorError> {
        let mut reports = Vec::new();
        let mut prepared = Vec::new();

        for &node in books {
            let Node::Book(book) = node else { continue };
            let folder = self.folder_of(node)?;

            let units = if self.config.metadata_only {
                Vec::new()
            } else {
                match plan_units(book, self.config.format) {
                    Ok(units) => units,
                    Err(reason) => {
                        info!(url = %book.source_url, format = %self.config.format, "no matching variant");
                        reports.push(Self::report(group, book, None, folder.clone(), DownloadResult::Skipped(reason)));
                        Vec::new()
                    }
                }
            };

            if self.config.skip_duplicates {
                if let Some(first) = self.registry.register_book(&book.source_url, &folder) {
                    info!(
                        url = %book.source_url,
                        first = %first.display(),
                        "book already downloaded in this run"
                    );
                    if !self.config.dry_run {
                        if let Err(e) = create_shortcut(&first, &folder) {
                            warn!(folder = %folder.display(), error = %e, "failed to create shortcut");
                        }
                    }
                    for unit in &units {
                        reports.push(Self::report(
                            group,
                            book,
                            Some(unit),
                            folder.join(&unit.filename),
                            DownloadResult::Skipped(SkipReason::AlreadyDownloaded),
                        ));
                    }
                    continue;
                }
            }

            if self.config.dry_run {
                for unit in &units {
                    let target = folder.join(&unit.filename);
                    info!(url = %unit.url, target = %target.display(), "would download");
                    reports.push(Self::report(group, book, Some(unit), target, DownloadResult::Skipped(SkipReason::DryRun)));
                }
                continue;
            }

            if let Err(e) = tokio::fs::create_dir_all(&folder).await {
                warn!(folder = %folder.display(), error = %e, "failed to create folder");
            }
            let want_cover = self.config.write_cover || self.config.write_id3;
            let cover = match (&book.cover_url, want_cover) {
                (Some(url), true) => self.fetch_cover(url, &folder, self.config.write_cover).await,
                _ => None,
            };
            if self.config.write_description {
                if let Some(text) = &book.description {
                    if let Err(e) = export::write_description(&folder, text) {
                        warn!(error = %e, "failed to write description");
                    }
                }
            }

            prepared.push(PreparedBook {
                node,
                book,
                folder,
                cover,
                units,
            });
        }

        let results = self.dispatch(&prepared).await?;
        for (book, book_results) in prepared.iter().zip(results) {
            self.finalize_book(book, &book_results).await;
            for (unit, result) in book.units.iter().zip(book_results) {
                reports.push(Self::report(
                    group,
                    book.book,
                    Some(unit),
                    book.folder.join(&unit.filename),
                    result,
                ));
            }
        }
        Ok(reports)
    }

    /// Runs every unit of `books` on the worker pool; results keep unit order.
    async fn dispatch(
        &self,
        books: &[PreparedBook<'_>],
    ) -> Result<Vec<Vec<DownloadResult>>, OrchestratorError> {
        let ctx = UnitContext {
            transfer: Arc::clone(&self.transfer),
            limiter: Arc::clone(&self.limiter),
            policy: self.policy.clone(),
            registry: Arc::clone(&self.registry),
            skip_existing: self.config.skip_duplicates,
        };

        let mut slots: Vec<Vec<Slot>> = Vec::with_capacity(books.len());
        for book in books {
            let mut book_slots = Vec::with_capacity(book.units.len());
            for unit in &book.units {
                if self.interrupted.load(Ordering::SeqCst) {
                    book_slots.push(Slot::Done(DownloadResult::Skipped(SkipReason::Cancelled)));
                    continue;
                }
                let permit = Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| OrchestratorError::SemaphoreClosed)?;
                if self.interrupted.load(Ordering::SeqCst) {
                    book_slots.push(Slot::Done(DownloadResult::Skipped(SkipReason::Cancelled)));
                    continue;
                }

                let ctx = ctx.clone();
                let url = unit.url.clone();
                let target = book.folder.join(&unit.filename);
                book_slots.push(Slot::Running(tokio::spawn(async move {
                    let _permit = permit;
                    run_unit(&ctx, &url, &target).await
                })));
            }
            slots.push(book_slots);
        }

        let mut results = Vec::with_capacity(slots.len());
        for book_slots in slots {
            let mut book_results = Vec::with_capacity(book_slots.len());
            for slot in book_slots {
                book_results.push(match slot {
                    Slot::Done(result) => result,
                    Slot::Running(handle) => match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, "download task panicked");
                            DownloadResult::Failed {
                                error: e.to_string(),
                                attempts: 0,
                            }
                        }
                    },
                });
            }
            results.push(book_results);
        }
        Ok(results)
    }

    /// Post-processing once every unit of a book has settled.
    async fn finalize_book(&self, prepared: &PreparedBook<'_>, results: &[DownloadResult]) {
        let book = prepared.book;
        let folder = &prepared.folder;
        let mut files: Vec<String> = Vec::new();
        let mut mp3s: Vec<(PathBuf, Option<u32>)> = Vec::new();

        for (unit, result) in prepared.units.iter().zip(results) {
            let obtained = matches!(
                result,
                DownloadResult::Success { .. } | DownloadResult::Skipped(SkipReason::AlreadyPresent)
            );
            if !obtained {
                continue;
            }
            let target = folder.join(&unit.filename);

            if unit.kind == VariantKind::Zip
                && self.config.format == FormatPolicy::Unzip
                && result.is_success()
            {
                match media::extract_archive(target.clone(), folder.clone()).await {
                    Ok(extracted) => {
                        for path in extracted {
                            if extension_of(&path.to_string_lossy()).as_deref() == Some("mp3") {
                                mp3s.push((path.clone(), None));
                            }
                            if let Ok(relative) = path.strip_prefix(folder) {
                                files.push(relative.to_string_lossy().into_owned());
                            }
                        }
                        continue;
                    }
                    Err(e) => warn!(zip = %target.display(), error = %e, "archive extraction failed"),
                }
            }

            if unit.kind == VariantKind::Mp3 && result.is_success() {
                mp3s.push((target, unit.track));
            }
            files.push(unit.filename.clone());
        }

        if self.config.write_id3 {
            for (path, track) in mp3s {
                let fields = TagFields {
                    title: Some(
                        track
                            .and_then(|i| book.track_title(i))
                            .unwrap_or(&book.title)
                            .to_string(),
                    ),
                    artist: book.reader.clone(),
                    composer: book.author.clone(),
                    album: Some(book.title.clone()),
                    track,
                    cover: prepared.cover.clone(),
                };
                if let Err(e) = media::tag_audio(path, fields).await {
                    warn!(error = %e, "tagging failed");
                }
            }
        }

        if self.config.write_json {
            if let Err(e) = export::write_metadata(folder, prepared.node, files) {
                warn!(error = %e, "failed to write metadata");
            }
        }
    }
}

async fn run_unit(ctx: &UnitContext, url: &str, target: &Path) -> DownloadResult {
    match ctx.registry.claim(target, ctx.skip_existing) {
        Claim::Claimed => {}
        Claim::AlreadyPresent => {
            info!(target = %target.display(), "already present, skipping");
            return DownloadResult::Skipped(SkipReason::AlreadyPresent);
        }
        Claim::InFlight => {
            debug!(target = %target.display(), "target in flight elsewhere");
            return DownloadResult::Skipped(SkipReason::InFlight);
        }
    }

    let outcome = transfer_with_retry(ctx, url, target).await;
    ctx.registry.settle(target, outcome.is_ok());
    match outcome {
        Ok((bytes, attempts)) => {
            info!(target = %target.display(), bytes, attempts, "download completed");
            DownloadResult::Success { attempts, bytes }
        }
        Err((error, attempts)) => {
            warn!(url = %url, error = %error, attempts, "download failed after all attempts");
            DownloadResult::Failed {
                error: error.to_string(),
                attempts,
            }
        }
    }
}

/// Transfers `url` to `target`, retrying per the policy.
///
/// Returns the bytes written and the attempts used, or the last error and
/// the attempts made. Attempts never overlap.
#[instrument(skip(ctx, target), fields(url = %url))]
async fn transfer_with_retry(
    ctx: &UnitContext,
    url: &str,
    target: &Path,
) -> Result<(u64, u32), (DownloadError, u32)> {
    let max_attempts = ctx.policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if attempt > 1 {
            info!(url = %url, attempt, max_attempts, "retrying download");
        }

        ctx.limiter.acquire().await;

        let error = match ctx.transfer.fetch_to_file(url, target).await {
            Ok(bytes) => return Ok((bytes, attempt)),
            Err(e) => e,
        };
        warn!(url = %url, error = %error, attempt, max_attempts, "download attempt failed");

        let failure_type = classify_error(&error);
        let retry_after = if failure_type == FailureType::RateLimited {
            record_retry_after(&ctx.limiter, &error).await
        } else {
            None
        };

        match ctx.policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry { delay, .. } => {
                tokio::time::sleep(retry_after.unwrap_or(delay)).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(url = %url, %reason, attempt, "not retrying download");
                return Err((error, attempt));
            }
        }
    }
}
