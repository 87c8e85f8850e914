//! Recursive expansion of an input URL into a [`Node`] tree.
//!
//! Resolution is sequential and data-dependent: a project's sommaire is
//! extracted, every accepted child link is classified and resolved in turn,
//! and the multi-author flag is derived from the resolved children. A
//! single visited set is threaded through the whole walk; a child URL seen
//! before is truncated and reported as a [`ResolutionIssue::Cycle`].
//!
//! Failures below the root are recorded as issues and their siblings carry
//! on. Failures of the root itself are returned as [`ResolveError`].

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::sommaire::{self, Confidence, SommaireOutcome};
use super::{
    BookNode, Discovery, DownloadVariant, ListingKind, ListingNode, Node, ProjectNode, UrlKind,
    VariantKind, VariantScope, union_authors,
};
use crate::classify::Classifier;
use crate::config::RunConfig;
use crate::download::filename::{extension_of, url_file_name};
use crate::download::{DownloadError, RetryPolicy};
use crate::page::ParsedPage;
use crate::page::extract::{self, normalize_page_url};
use crate::tracks::{SiteTrackBatches, TrackBatchError, TrackBatches};

/// Errors that abort the resolution of one node.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The page could not be fetched (classified `Unknown`).
    #[error("could not fetch {url}: {source}")]
    Fetch {
        /// Page URL.
        url: String,
        /// Transport error after retries.
        #[source]
        source: Arc<DownloadError>,
    },

    /// A track batch kept failing; the track list would be truncated.
    #[error("track list of {url} is incomplete: {source}")]
    TrackBatch {
        /// Book page URL.
        url: String,
        /// Failing batch.
        #[source]
        source: TrackBatchError,
    },

    /// An accepted sommaire yielded no resolvable child.
    #[error("project {url} resolved to no children")]
    EmptyProject {
        /// Project page URL.
        url: String,
    },

    /// A listing yielded no resolvable work.
    #[error("listing {url} has no resolvable works")]
    EmptyListing {
        /// Listing URL.
        url: String,
    },

    /// The page carries neither a title nor anything to download.
    #[error("{url} does not look like a catalog work")]
    NotAWork {
        /// Page URL.
        url: String,
    },
}

/// Non-fatal events recorded while resolving.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ResolutionIssue {
    /// A child link pointed at an already visited URL; it was not descended.
    Cycle {
        /// Revisited URL.
        url: String,
        /// Page that linked it.
        parent: String,
    },
    /// A child failed to resolve; its siblings were kept.
    ChildFailed {
        /// Child URL.
        url: String,
        /// Error text.
        error: String,
    },
    /// A collection page scored too low and was treated as a book.
    SommaireDegraded {
        /// Page URL.
        url: String,
        /// Primary confidence ratio.
        confidence: f64,
    },
    /// The relaxed sommaire strategy found nothing; treated as a book.
    SommaireFailed {
        /// Page URL.
        url: String,
        /// Primary confidence ratio.
        confidence: f64,
    },
    /// A download button could not be typed as MP3 or ZIP.
    VariantDropped {
        /// Book page URL.
        url: String,
        /// Button target.
        href: String,
    },
    /// A later listing page failed; pagination stopped there.
    ListingPageFailed {
        /// Listing page URL.
        url: String,
        /// Error text.
        error: String,
    },
}

/// A resolved input.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    /// Root of the tree.
    pub root: Node,
    /// Non-fatal events, in order.
    pub issues: Vec<ResolutionIssue>,
}

/// Knobs of the resolver.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Listing page cap.
    pub max_pages: Option<usize>,
    /// Query the WordPress REST API.
    pub wp_api: bool,
    /// Batch-level retry budget.
    pub retry: RetryPolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            wp_api: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ResolveOptions {
    /// Options derived from a run configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_pages: config.page_limit(),
            wp_api: config.wp_api,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct Walk {
    visited: HashSet<String>,
    issues: Vec<ResolutionIssue>,
}

impl Walk {
    fn first_visit(&mut self, url: &str) -> bool {
        self.visited.insert(normalize_page_url(url))
    }
}

/// Expands input URLs into trees.
#[derive(Debug)]
pub struct Resolver {
    classifier: Arc<Classifier>,
    options: ResolveOptions,
}

impl Resolver {
    /// Creates a resolver sharing `classifier`'s page cache.
    #[must_use]
    pub fn new(classifier: Arc<Classifier>, options: ResolveOptions) -> Self {
        Self {
            classifier,
            options,
        }
    }

    /// Resolves one top-level input.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the input itself cannot be resolved.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve(&self, url: &str) -> Result<Resolution, ResolveError> {
        let mut walk = Walk::default();
        walk.first_visit(url);
        let root = self
            .resolve_node(url.to_string(), Discovery::Direct, &mut walk)
            .await?;
        info!(
            books = root.book_count(),
            issues = walk.issues.len(),
            "input resolved"
        );
        Ok(Resolution {
            root,
            issues: walk.issues,
        })
    }

    fn resolve_node<'a>(
        &'a self,
        url: String,
        discovery: Discovery,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, Result<Node, ResolveError>> {
        async move {
            let kind = self.classifier.classify(&url).await;
            debug!(url = %url, ?kind, "resolving node");
            if let Some(listing) = kind.listing_kind() {
                return self
                    .resolve_listing(&url, listing, walk)
                    .await
                    .map(Node::Listing);
            }

            let page = self.fetch(&url).await?;
            if kind == UrlKind::CollectiveProject {
                match sommaire::extract(&page) {
                    SommaireOutcome::Accepted(extraction) => {
                        debug!(
                            url = %url,
                            strategy = ?extraction.strategy,
                            children = extraction.children.len(),
                            "sommaire accepted"
                        );
                        return self
                            .resolve_project(&url, &page, extraction.children, discovery, walk)
                            .await
                            .map(Node::Project);
                    }
                    SommaireOutcome::Failed { confidence } => {
                        warn!(url = %url, ratio = confidence.ratio(), "sommaire extraction failed, treating as book");
                        walk.issues.push(ResolutionIssue::SommaireFailed {
                            url: url.clone(),
                            confidence: confidence.ratio(),
                        });
                    }
                    SommaireOutcome::NotACollection { confidence } => {
                        warn!(url = %url, ratio = confidence.ratio(), "sommaire confidence too low, treating as book");
                        walk.issues.push(degraded(&url, confidence));
                    }
                }
            }
            self.resolve_book(&url, &page, discovery, walk)
                .await
                .map(Node::Book)
        }
        .boxed()
    }

    async fn fetch(&self, url: &str) -> Result<Arc<ParsedPage>, ResolveError> {
        self.classifier
            .page(url)
            .await
            .map_err(|source| ResolveError::Fetch {
                url: url.to_string(),
                source,
            })
    }

    #[instrument(skip(self, page, children, walk), fields(url = %url))]
    async fn resolve_project(
        &self,
        url: &str,
        page: &ParsedPage,
        children: Vec<String>,
        discovery: Discovery,
        walk: &mut Walk,
    ) -> Result<ProjectNode, ResolveError> {
        let mut resolved = Vec::new();
        for child in children {
            if !walk.first_visit(&child) {
                warn!(child = %child, "child already visited, not descending");
                walk.issues.push(ResolutionIssue::Cycle {
                    url: child,
                    parent: url.to_string(),
                });
                continue;
            }
            let child_discovery = Discovery::Project {
                parent_url: url.to_string(),
            };
            match self.resolve_node(child.clone(), child_discovery, walk).await {
                Ok(node) => resolved.push(node),
                Err(e) => {
                    warn!(child = %child, error = %e, "child failed to resolve");
                    walk.issues.push(ResolutionIssue::ChildFailed {
                        url: child,
                        error: e.to_string(),
                    });
                }
            }
        }
        if resolved.is_empty() {
            return Err(ResolveError::EmptyProject {
                url: url.to_string(),
            });
        }

        let multi_author = union_authors(&resolved).len() >= 2;
        Ok(ProjectNode {
            source_url: url.to_string(),
            title: extract::title(page).unwrap_or_else(|| fallback_title(url)),
            author: extract::author(page),
            multi_author,
            children: resolved,
            discovery,
            cover_url: extract::cover_url(page),
            description: extract::description(page),
            path: None,
        })
    }

    #[instrument(skip(self, walk), fields(url = %url))]
    async fn resolve_listing(
        &self,
        url: &str,
        kind: ListingKind,
        walk: &mut Walk,
    ) -> Result<ListingNode, ResolveError> {
        let first = self.fetch(url).await?;
        let name = extract::listing_name(&first, kind);
        let mut entries = extract::listing_entries(&first);
        let mut seen_pages: HashSet<String> = HashSet::from([normalize_page_url(url)]);
        let mut next = first.next_page_href.clone();
        let mut pages = 1usize;

        while let Some(next_url) = next.take() {
            if self.options.max_pages.is_some_and(|max| pages >= max) {
                debug!(pages, "listing page cap reached");
                break;
            }
            if !seen_pages.insert(normalize_page_url(&next_url)) {
                break;
            }
            match self.classifier.page(&next_url).await {
                Ok(page) => {
                    entries.extend(extract::listing_entries(&page));
                    next = page.next_page_href.clone();
                    pages += 1;
                }
                Err(e) => {
                    warn!(page = %next_url, error = %e, "listing page failed, stopping pagination");
                    walk.issues.push(ResolutionIssue::ListingPageFailed {
                        url: next_url,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(name = %name, pages, entries = entries.len(), "listing collected");

        let mut listed = HashSet::new();
        entries.retain(|entry| listed.insert(normalize_page_url(entry)));

        let mut children = Vec::new();
        for entry in entries {
            if !walk.first_visit(&entry) {
                warn!(entry = %entry, "listing entry already resolved, skipped");
                walk.issues.push(ResolutionIssue::Cycle {
                    url: entry,
                    parent: url.to_string(),
                });
                continue;
            }
            let discovery = Discovery::Listing {
                kind,
                name: name.clone(),
            };
            match self.resolve_node(entry.clone(), discovery, walk).await {
                Ok(node) => children.push(node),
                Err(e) => {
                    warn!(entry = %entry, error = %e, "listing entry failed to resolve");
                    walk.issues.push(ResolutionIssue::ChildFailed {
                        url: entry,
                        error: e.to_string(),
                    });
                }
            }
        }
        if children.is_empty() {
            return Err(ResolveError::EmptyListing {
                url: url.to_string(),
            });
        }
        Ok(ListingNode {
            kind,
            name,
            source_url: url.to_string(),
            children,
            path: None,
        })
    }

    #[instrument(skip(self, page, walk), fields(url = %url))]
    async fn resolve_book(
        &self,
        url: &str,
        page: &ParsedPage,
        discovery: Discovery,
        walk: &mut Walk,
    ) -> Result<BookNode, ResolveError> {
        let source = Arc::clone(self.classifier.source());
        let batches = SiteTrackBatches::new(source, page.loop_more_href.clone());
        let tracks = TrackBatches::new(
            page.tracks.clone(),
            page.loop_more_href.is_some(),
            &batches,
            &self.options.retry,
        )
        .collect()
        .await
        .map_err(|source| ResolveError::TrackBatch {
            url: url.to_string(),
            source,
        })?;

        let page_title = extract::title(page);
        let mut book = BookNode::new(url, page_title.clone().unwrap_or_default());
        book.author = extract::author(page);
        book.reader = extract::reader(page);
        book.cover_url = extract::cover_url(page);
        book.description = extract::description(page);
        book.duration = extract::duration(page);
        book.post_id = extract::post_id(page);
        book.version = extract::version_tag(url);
        book.discovery = discovery;
        book.variants = tracks
            .iter()
            .map(|t| DownloadVariant {
                kind: VariantKind::Mp3,
                url: t.url.clone(),
                scope: VariantScope::Track(t.index),
                filename: None,
            })
            .collect();
        book.tracks = tracks;

        for button in extract::book_buttons(page) {
            match self.type_link(&button.href).await {
                Some(variant) => book.variants.push(variant),
                None => {
                    warn!(href = %button.href, "download link is neither mp3 nor zip, dropped");
                    walk.issues.push(ResolutionIssue::VariantDropped {
                        url: url.to_string(),
                        href: button.href.clone(),
                    });
                }
            }
        }

        if self.options.wp_api {
            if let Some(post_id) = book.post_id {
                self.enrich_from_wp(&mut book, post_id).await;
            }
        }

        if book.title.is_empty() {
            if page_title.is_none() && book.tracks.is_empty() && book.variants.is_empty() {
                return Err(ResolveError::NotAWork {
                    url: url.to_string(),
                });
            }
            book.title = fallback_title(url);
        }
        debug!(
            title = %book.title,
            tracks = book.tracks.len(),
            variants = book.variants.len(),
            "book resolved"
        );
        Ok(book)
    }

    /// Types a book-level download link, probing it when its URL says nothing.
    async fn type_link(&self, href: &str) -> Option<DownloadVariant> {
        if let Some(kind) = url_file_name(href).as_deref().and_then(kind_from_name) {
            return Some(DownloadVariant {
                kind,
                url: href.to_string(),
                scope: VariantScope::Book,
                filename: None,
            });
        }
        let probe = match self.classifier.source().probe(href).await {
            Ok(probe) => probe,
            Err(e) => {
                debug!(href = %href, error = %e, "probe failed");
                return None;
            }
        };
        let filename = probe
            .filename
            .clone()
            .or_else(|| url_file_name(&probe.final_url));
        let kind = guess_kind(filename.as_deref(), probe.content_type.as_deref())?;
        Some(DownloadVariant {
            kind,
            url: href.to_string(),
            scope: VariantScope::Book,
            filename,
        })
    }

    async fn enrich_from_wp(&self, book: &mut BookNode, post_id: u64) {
        let Some(api) = wp_post_url(&book.source_url, post_id) else {
            return;
        };
        match self.classifier.source().get_json(&api).await {
            Ok(post) => apply_wp_post(book, &post),
            Err(e) => debug!(api = %api, error = %e, "wordpress enrichment skipped"),
        }
    }
}

fn degraded(url: &str, confidence: Confidence) -> ResolutionIssue {
    ResolutionIssue::SommaireDegraded {
        url: url.to_string(),
        confidence: confidence.ratio(),
    }
}

/// Title made from the URL slug when the page names none.
fn fallback_title(url: &str) -> String {
    extract::slug_from_url(url)
        .map(|slug| slug.replace('-', " "))
        .unwrap_or_else(|| url.to_string())
}

/// Variant kind from a filename extension.
#[must_use]
pub fn kind_from_name(name: &str) -> Option<VariantKind> {
    match extension_of(name)?.as_str() {
        "mp3" => Some(VariantKind::Mp3),
        "zip" => Some(VariantKind::Zip),
        _ => None,
    }
}

/// Variant kind from a probed filename, else from the content type.
#[must_use]
pub fn guess_kind(filename: Option<&str>, content_type: Option<&str>) -> Option<VariantKind> {
    if let Some(kind) = filename.and_then(kind_from_name) {
        return Some(kind);
    }
    let content_type = content_type?.to_ascii_lowercase();
    if content_type.contains("audio") {
        Some(VariantKind::Mp3)
    } else if content_type.contains("zip") || content_type.contains("octet-stream") {
        Some(VariantKind::Zip)
    } else {
        None
    }
}

/// `{origin}/wp-json/wp/v2/posts/{id}?_embed=1` for a page URL.
#[must_use]
pub fn wp_post_url(page_url: &str, post_id: u64) -> Option<String> {
    let origin = Url::parse(page_url).ok()?.origin().ascii_serialization();
    Some(format!("{origin}/wp-json/wp/v2/posts/{post_id}?_embed=1"))
}

/// Fills what the page left empty from a WordPress post object.
pub fn apply_wp_post(book: &mut BookNode, post: &Value) {
    let rendered = |field: &str| {
        post.get(field)
            .and_then(|f| f.get("rendered"))
            .and_then(Value::as_str)
            .map(extract::html_to_text)
            .filter(|t| !t.is_empty())
    };
    if book.title.is_empty() {
        if let Some(title) = rendered("title") {
            book.title = title;
        }
    }
    if book.description.is_none() {
        book.description = rendered("excerpt");
    }
    if book.cover_url.is_none() {
        book.cover_url = post
            .pointer("/_embedded/wp:featuredmedia/0/source_url")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    let meta = post.get("meta");
    if book.duration.is_none() {
        book.duration = meta
            .and_then(|m| m.get("duration"))
            .and_then(|d| d.as_u64().or_else(|| d.as_str()?.trim().parse().ok()))
            .filter(|ms| *ms > 0)
            .map(format_duration_ms);
    }
    for key in ["download_url", "stream", "stream_url"] {
        let Some(link) = meta.and_then(|m| m.get(key)).and_then(Value::as_str) else {
            continue;
        };
        let is_mp3 = url_file_name(link).as_deref().and_then(kind_from_name) == Some(VariantKind::Mp3);
        if is_mp3 && !book.variants.iter().any(|v| v.url == link) {
            book.variants.push(DownloadVariant {
                kind: VariantKind::Mp3,
                url: link.to_string(),
                scope: VariantScope::Book,
                filename: None,
            });
        }
    }
}

/// `H:MM:SS` (or `M:SS` under an hour) from milliseconds.
#[must_use]
pub fn format_duration_ms(ms: u64) -> String {
    let total = ms / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
