//! URL classification.
//!
//! Listing URLs are recognised from their path alone. Anything else is
//! fetched once (the parsed page is cached for the rest of the run) and
//! classified from its content: a collection page exposing at least one
//! candidate sub-work link is a [`UrlKind::CollectiveProject`], any other
//! page a [`UrlKind::Book`]. A page that cannot be fetched is
//! [`UrlKind::Unknown`].

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::download::DownloadError;
use crate::fetch::PageSource;
use crate::page::ParsedPage;
use crate::page::extract::{is_collection_page, normalize_page_url, url_path};
use crate::tree::UrlKind;
use crate::tree::sommaire::candidate_links;

#[allow(clippy::expect_used)]
static AUTHOR_LISTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/livre-audio-gratuit-mp3/auteur/[^/]+(?:/page/\d+)?/?$")
        .expect("author listing regex is valid")
});

#[allow(clippy::expect_used)]
static READER_LISTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/livre-audio-gratuit-mp3/voix/[^/]+(?:/page/\d+)?/?$")
        .expect("reader listing regex is valid")
});

#[allow(clippy::expect_used)]
static MEMBER_LISTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/membre/[^/]+(?:/page/\d+)?/?$").expect("member listing regex is valid")
});

/// Outcome of a cached page fetch.
pub type CachedPage = Result<Arc<ParsedPage>, Arc<DownloadError>>;

/// Listing kind from the URL path alone.
#[must_use]
pub fn classify_path(url: &str) -> Option<UrlKind> {
    let path = url_path(url)?;
    if AUTHOR_LISTING.is_match(&path) {
        Some(UrlKind::AuthorListing)
    } else if READER_LISTING.is_match(&path) {
        Some(UrlKind::ReaderListing)
    } else if MEMBER_LISTING.is_match(&path) {
        Some(UrlKind::MemberListing)
    } else {
        None
    }
}

/// Classifies URLs and memoizes the pages it fetched.
pub struct Classifier {
    source: Arc<dyn PageSource>,
    pages: DashMap<String, CachedPage>,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("cached_pages", &self.pages.len())
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Creates a classifier fetching through `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self {
            source,
            pages: DashMap::new(),
        }
    }

    /// The fetch seam, for callers that need non-page requests.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    /// Fetches and parses `url`, at most once per run.
    ///
    /// Failures are cached too: a page that could not be fetched is not
    /// requested again.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn page(&self, url: &str) -> CachedPage {
        let key = normalize_page_url(url);
        if let Some(cached) = self.pages.get(&key) {
            debug!("page cache hit");
            return cached.clone();
        }

        let fetched = match self.source.get_text(url).await {
            Ok(html) => Ok(Arc::new(ParsedPage::parse(url, &html))),
            Err(e) => {
                warn!(error = %e, "page fetch failed");
                Err(Arc::new(e))
            }
        };
        self.pages.entry(key).or_insert(fetched).clone()
    }

    /// Classifies `url`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn classify(&self, url: &str) -> UrlKind {
        if let Some(kind) = classify_path(url) {
            debug!(?kind, "classified from path");
            return kind;
        }
        let Ok(page) = self.page(url).await else {
            return UrlKind::Unknown;
        };
        let kind = classify_page(&page);
        debug!(?kind, "classified from content");
        kind
    }
}

/// Content-based classification of a fetched page.
#[must_use]
pub fn classify_page(page: &ParsedPage) -> UrlKind {
    if is_collection_page(page) && !candidate_links(page).is_empty() {
        UrlKind::CollectiveProject
    } else {
        UrlKind::Book
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::download::{FetchedBytes, ProbeInfo};

    struct FixedPages {
        pages: HashMap<String, String>,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for FixedPages {
        async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| DownloadError::http_status(url, 404))
        }

        async fn get_json(&self, url: &str) -> Result<serde_json::Value, DownloadError> {
            Err(DownloadError::http_status(url, 404))
        }

        async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, DownloadError> {
            Err(DownloadError::http_status(url, 404))
        }

        async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
            Err(DownloadError::http_status(url, 404))
        }
    }

    const BASE: &str = "https://www.litteratureaudio.com";

    fn classifier(pages: &[(&str, &str)]) -> (Classifier, Arc<FixedPages>) {
        let source = Arc::new(FixedPages {
            pages: pages
                .iter()
                .map(|(u, h)| ((*u).to_string(), (*h).to_string()))
                .collect(),
            requests: AtomicUsize::new(0),
        });
        (Classifier::new(source.clone()), source)
    }

    #[test]
    fn test_classify_path_listings() {
        assert_eq!(
            classify_path(&format!("{BASE}/livre-audio-gratuit-mp3/auteur/jules-verne")),
            Some(UrlKind::AuthorListing)
        );
        assert_eq!(
            classify_path(&format!("{BASE}/livre-audio-gratuit-mp3/auteur/jules-verne/page/2/")),
            Some(UrlKind::AuthorListing)
        );
        assert_eq!(
            classify_path(&format!("{BASE}/livre-audio-gratuit-mp3/voix/ren")),
            Some(UrlKind::ReaderListing)
        );
        assert_eq!(
            classify_path(&format!("{BASE}/membre/ren/page/3")),
            Some(UrlKind::MemberListing)
        );
        assert_eq!(
            classify_path(&format!("{BASE}/livre-audio-gratuit-mp3/verne-strogoff.html")),
            None
        );
    }

    #[tokio::test]
    async fn test_classify_listing_needs_no_fetch() {
        let (classifier, source) = classifier(&[]);
        let kind = classifier
            .classify(&format!("{BASE}/livre-audio-gratuit-mp3/voix/ren"))
            .await;
        assert_eq!(kind, UrlKind::ReaderListing);
        assert_eq!(source.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classify_collection_and_book() {
        let project_url = format!("{BASE}/livre-audio-gratuit-mp3/contes-sommaire.html");
        let project_html = format!(
            r#"<body class="single sommaire"><div class="entry-content"><div class="station-content">
<a href="{BASE}/livre-audio-gratuit-mp3/conte-1.html">1</a>
<a href="{BASE}/livre-audio-gratuit-mp3/conte-2.html">2</a>
</div></div></body>"#
        );
        let book_url = format!("{BASE}/livre-audio-gratuit-mp3/conte-1.html");
        let book_html = "<body><h1 class=\"entry-title\">Conte</h1></body>";
        let (classifier, _) = classifier(&[(&project_url, &project_html), (&book_url, book_html)]);

        assert_eq!(classifier.classify(&project_url).await, UrlKind::CollectiveProject);
        assert_eq!(classifier.classify(&book_url).await, UrlKind::Book);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_unknown_and_cached() {
        let (classifier, source) = classifier(&[]);
        let url = format!("{BASE}/livre-audio-gratuit-mp3/missing.html");
        assert_eq!(classifier.classify(&url).await, UrlKind::Unknown);
        assert_eq!(classifier.classify(&url).await, UrlKind::Unknown);
        assert_eq!(source.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_page_is_memoized() {
        let url = format!("{BASE}/livre-audio-gratuit-mp3/a.html");
        let (classifier, source) = classifier(&[(&url, "<title>A</title>")]);
        let first = classifier.page(&url).await.unwrap();
        let second = classifier.page(&format!("{url}#comments")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.requests.load(Ordering::SeqCst), 1);
    }
}
