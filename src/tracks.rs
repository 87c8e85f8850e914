//! Track batch loading.
//!
//! A book page renders its first tracks and a "load more" link; further
//! tracks come in batches of [`BATCH_SIZE`]. [`TrackBatches`] pulls batches
//! on demand from a [`TrackBatchSource`] and stops on a short batch, an
//! explicit end marker, or a batch that brings nothing new. It never
//! prefetches and cannot be restarted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
use crate::fetch::PageSource;
use crate::page::{ParsedPage, TrackArticle};
use crate::tree::TrackRef;

/// Tracks per batch, including the first (rendered) one.
pub const BATCH_SIZE: usize = 10;

/// One batch of tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackBatch {
    /// Tracks in page order.
    pub tracks: Vec<TrackArticle>,
    /// No batch follows this one.
    pub end: bool,
}

/// Error when a batch keeps failing.
#[derive(Debug, Error)]
#[error("track batch at offset {offset} failed after {attempts} attempts: {source}")]
pub struct TrackBatchError {
    /// Offset of the failing batch.
    pub offset: usize,
    /// Attempts made.
    pub attempts: u32,
    /// Last transport error.
    #[source]
    pub source: DownloadError,
}

/// Supplies the batches following the rendered page.
#[async_trait]
pub trait TrackBatchSource: Send + Sync {
    /// Fetches the batch starting at `offset` (a multiple of [`BATCH_SIZE`], never 0).
    async fn fetch_batch(&self, offset: usize) -> Result<TrackBatch, DownloadError>;
}

/// Batches served by the site's "load more" endpoint.
///
/// Each response is JSON `{"content": "<html>"}`; the fragment holds the
/// next station articles and the link to the following batch.
pub struct SiteTrackBatches {
    source: Arc<dyn PageSource>,
    next_urls: Mutex<HashMap<usize, String>>,
}

impl SiteTrackBatches {
    /// Starts from the book page's load-more link, if any.
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>, load_more: Option<String>) -> Self {
        let next_urls = load_more.map(|url| (BATCH_SIZE, url)).into_iter().collect();
        Self {
            source,
            next_urls: Mutex::new(next_urls),
        }
    }
}

#[async_trait]
impl TrackBatchSource for SiteTrackBatches {
    #[instrument(skip(self))]
    async fn fetch_batch(&self, offset: usize) -> Result<TrackBatch, DownloadError> {
        let Some(url) = self.next_urls.lock().await.get(&offset).cloned() else {
            return Ok(TrackBatch {
                tracks: Vec::new(),
                end: true,
            });
        };
        let json = self.source.get_json(&url).await?;
        let content = json
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(TrackBatch {
                tracks: Vec::new(),
                end: true,
            });
        }

        let fragment = ParsedPage::parse(&url, content);
        let end = match fragment.loop_more_href {
            Some(next) if next != url => {
                self.next_urls.lock().await.insert(offset + BATCH_SIZE, next);
                false
            }
            _ => true,
        };
        Ok(TrackBatch {
            tracks: fragment.tracks,
            end,
        })
    }
}

/// Lazy, finite sequence of batches.
pub struct TrackBatches<'a> {
    source: &'a dyn TrackBatchSource,
    policy: &'a RetryPolicy,
    first: Option<Vec<TrackArticle>>,
    offset: usize,
    finished: bool,
    seen: HashSet<String>,
}

impl<'a> TrackBatches<'a> {
    /// Sequence starting with the rendered tracks. `has_more` is false when
    /// the page shows no load-more link.
    #[must_use]
    pub fn new(
        first: Vec<TrackArticle>,
        has_more: bool,
        source: &'a dyn TrackBatchSource,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            source,
            policy,
            finished: !has_more,
            first: Some(first),
            offset: 0,
            seen: HashSet::new(),
        }
    }

    /// Next batch of new tracks, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`TrackBatchError`] when a batch fails after the retry budget.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<TrackArticle>>, TrackBatchError> {
        if let Some(first) = self.first.take() {
            if first.len() < BATCH_SIZE {
                self.finished = true;
            }
            self.offset = BATCH_SIZE;
            return Ok(Some(self.keep_new(first)));
        }
        if self.finished {
            return Ok(None);
        }

        let batch = self.fetch_with_retry(self.offset).await?;
        let fetched = batch.tracks.len();
        let fresh = self.keep_new(batch.tracks);
        debug!(offset = self.offset, fetched, new = fresh.len(), end = batch.end, "track batch loaded");

        self.offset += BATCH_SIZE;
        if batch.end || fetched < BATCH_SIZE || fresh.is_empty() {
            self.finished = true;
        }
        if fresh.is_empty() {
            return Ok(None);
        }
        Ok(Some(fresh))
    }

    /// Drains the sequence into gapless, 1-based track references.
    ///
    /// # Errors
    ///
    /// Returns [`TrackBatchError`] when any batch fails after the retry budget.
    pub async fn collect(mut self) -> Result<Vec<TrackRef>, TrackBatchError> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(number_tracks(all))
    }

    fn keep_new(&mut self, tracks: Vec<TrackArticle>) -> Vec<TrackArticle> {
        tracks
            .into_iter()
            .filter(|t| self.seen.insert(t.download_href.clone()))
            .collect()
    }

    async fn fetch_with_retry(&self, offset: usize) -> Result<TrackBatch, TrackBatchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > 1 {
                info!(offset, attempt, max_attempts = self.policy.max_attempts(), "retrying track batch");
            }
            let error = match self.source.fetch_batch(offset).await {
                Ok(batch) => return Ok(batch),
                Err(e) => e,
            };
            warn!(offset, attempt, error = %error, "track batch failed");
            match self.policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry { delay, .. } => tokio::time::sleep(delay).await,
                RetryDecision::DoNotRetry { .. } => {
                    return Err(TrackBatchError {
                        offset,
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }
}

/// Converts page articles to numbered tracks (1-based, in order).
#[must_use]
pub fn number_tracks(articles: Vec<TrackArticle>) -> Vec<TrackRef> {
    articles
        .into_iter()
        .zip(1u32..)
        .map(|(article, index)| TrackRef {
            index,
            title: if article.title.is_empty() {
                format!("Piste {index:02}")
            } else {
                article.title
            },
            url: article.download_href,
            page_url: article.page_href,
            duration: article.duration,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn article(n: usize) -> TrackArticle {
        TrackArticle {
            title: format!("Chapitre {n}"),
            download_href: format!("https://example.com/d?track={n}"),
            page_href: None,
            duration: None,
        }
    }

    fn articles(range: std::ops::Range<usize>) -> Vec<TrackArticle> {
        range.map(article).collect()
    }

    /// Serves fixed batches by offset; `failures` transient errors first.
    struct FixedBatches {
        batches: HashMap<usize, TrackBatch>,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FixedBatches {
        fn new(batches: Vec<(usize, TrackBatch)>, failures: u32) -> Self {
            Self {
                batches: batches.into_iter().collect(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TrackBatchSource for FixedBatches {
        async fn fetch_batch(&self, offset: usize) -> Result<TrackBatch, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DownloadError::timeout("https://example.com/loop"));
            }
            Ok(self.batches.get(&offset).cloned().unwrap_or_default())
        }
    }

    fn batch(tracks: Vec<TrackArticle>, end: bool) -> TrackBatch {
        TrackBatch { tracks, end }
    }

    #[tokio::test]
    async fn test_short_first_page_needs_no_fetch() {
        let source = FixedBatches::new(vec![], 0);
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..4), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batches_concatenate_until_short_batch() {
        let source = FixedBatches::new(
            vec![
                (10, batch(articles(11..21), false)),
                (20, batch(articles(21..24), false)),
            ],
            0,
        );
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 23);
        assert!(tracks.iter().zip(1u32..).all(|(t, i)| t.index == i));
        assert_eq!(tracks[22].title, "Chapitre 23");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_stops() {
        let source = FixedBatches::new(vec![], 0);
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 10);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_batch_stops() {
        let source = FixedBatches::new(vec![(10, batch(articles(1..11), false))], 0);
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 10);
    }

    #[tokio::test]
    async fn test_end_marker_stops() {
        let source = FixedBatches::new(
            vec![
                (10, batch(articles(11..21), true)),
                (20, batch(articles(21..31), false)),
            ],
            0,
        );
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 20);
    }

    #[tokio::test]
    async fn test_batch_retried_then_succeeds() {
        let source = FixedBatches::new(vec![(10, batch(articles(11..13), true))], 2);
        let policy = RetryPolicy::immediate();
        let tracks = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(tracks.len(), 12);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_failure_fails_whole_load() {
        let source = FixedBatches::new(vec![(10, batch(articles(11..13), true))], 3);
        let policy = RetryPolicy::immediate();
        let err = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap_err();
        assert_eq!(err.offset, 10);
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let source = FixedBatches::new(vec![(10, batch(articles(11..15), false))], 0);
        let policy = RetryPolicy::immediate();
        let first = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        let second = TrackBatches::new(articles(1..11), true, &source, &policy)
            .collect()
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_number_tracks_fills_missing_titles() {
        let mut untitled = article(1);
        untitled.title.clear();
        let tracks = number_tracks(vec![untitled, article(2)]);
        assert_eq!(tracks[0].title, "Piste 01");
        assert_eq!(tracks[1].index, 2);
    }
}
