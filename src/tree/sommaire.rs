//! Sommaire extraction strategies and the confidence policy.
//!
//! A strategy is a pure function over a [`ParsedPage`] returning the child
//! work URLs it found together with a [`Confidence`]: how many entries of the
//! sommaire region look like work links, out of how many entries the region
//! holds. [`extract`] runs the strategies in order and applies [`band`]:
//!
//! | matching / total | outcome |
//! |---|---|
//! | ≥ 0.70 | primary children accepted |
//! | 0.50 ..< 0.70 | relaxed strategy, accepted if it finds anything |
//! | < 0.50 | not a collection; the page is a book |

use std::collections::HashSet;

use serde::Serialize;

use crate::page::ParsedPage;
use crate::page::extract::{
    TRACK_PATH, WORK_PATH, author_slug, is_book_link, is_taxonomy_link, normalize_page_url,
    url_path,
};

/// Percentage at or above which the primary result is accepted.
pub const ACCEPT_PERCENT: usize = 70;

/// Percentage at or above which the relaxed strategy is tried.
pub const RELAXED_PERCENT: usize = 50;

/// Share of the sommaire's work links a single loop block must hold to be
/// taken as the whole sommaire.
const DOMINANT_BLOCK_PERCENT: usize = 70;

/// Counted links of a sommaire region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confidence {
    /// Entries shaped like a work link.
    pub matching: usize,
    /// All entries of the region.
    pub total: usize,
}

impl Confidence {
    /// `matching / total`, 0 for an empty region.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matching as f64 / self.total as f64
        }
    }

    fn at_least(self, percent: usize) -> bool {
        self.total > 0 && self.matching * 100 >= self.total * percent
    }
}

/// Policy band of a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// Take the primary result as-is.
    Accept,
    /// Try the relaxed strategy.
    TryRelaxed,
    /// Treat the page as a single book.
    Degrade,
}

/// Maps a confidence to its policy band.
#[must_use]
pub fn band(confidence: Confidence) -> Band {
    if confidence.at_least(ACCEPT_PERCENT) {
        Band::Accept
    } else if confidence.at_least(RELAXED_PERCENT) {
        Band::TryRelaxed
    } else {
        Band::Degrade
    }
}

/// Which strategy produced a child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Work-shaped links of the station content (or its dominant loop block).
    Strict,
    /// Any `.html` catalog link of the entry content, then author-tagged articles.
    Relaxed,
}

/// Result of one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Producing strategy.
    pub strategy: Strategy,
    /// Child URLs in document order, deduplicated, self excluded.
    pub children: Vec<String>,
    /// Counted region.
    pub confidence: Confidence,
}

/// Decision of the confidence policy for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SommaireOutcome {
    /// A child list was accepted.
    Accepted(Extraction),
    /// The relaxed band was reached but the relaxed strategy found nothing.
    Failed {
        /// Primary confidence.
        confidence: Confidence,
    },
    /// Too few work links: not a collection.
    NotACollection {
        /// Primary confidence.
        confidence: Confidence,
    },
}

/// Runs the strategies in order and applies the policy.
#[must_use]
pub fn extract(page: &ParsedPage) -> SommaireOutcome {
    decide(strict(page), || relaxed(page))
}

/// The policy itself, over an already computed primary result.
#[must_use]
pub fn decide(primary: Extraction, secondary: impl FnOnce() -> Extraction) -> SommaireOutcome {
    let confidence = primary.confidence;
    match band(confidence) {
        Band::Accept if !primary.children.is_empty() => SommaireOutcome::Accepted(primary),
        Band::Accept | Band::TryRelaxed => {
            let relaxed = secondary();
            if relaxed.children.is_empty() {
                SommaireOutcome::Failed { confidence }
            } else {
                SommaireOutcome::Accepted(relaxed)
            }
        }
        Band::Degrade => SommaireOutcome::NotACollection { confidence },
    }
}

/// Work links a classifier can count without applying the policy.
#[must_use]
pub fn candidate_links(page: &ParsedPage) -> Vec<String> {
    strict(page).children
}

/// Primary strategy: work-shaped links of the sommaire region.
///
/// The region is the station content when the page has one, else the whole
/// entry content. Taxonomy links (author, reader, category) are not entries.
#[must_use]
pub fn strict(page: &ParsedPage) -> Extraction {
    let has_station = page.links.iter().any(|l| l.in_station_content);
    let region: Vec<_> = page
        .links
        .iter()
        .filter(|l| if has_station { l.in_station_content } else { l.in_entry_content })
        .filter(|l| !is_taxonomy_link(&l.href))
        .filter(|l| normalize_page_url(&l.href) != normalize_page_url(&page.url))
        .collect();

    let mut seen = HashSet::new();
    let entries: Vec<_> = region
        .into_iter()
        .filter(|l| seen.insert(normalize_page_url(&l.href)))
        .collect();
    let works: Vec<_> = entries
        .iter()
        .filter(|l| is_book_link(&l.href, &page.url))
        .collect();

    let confidence = Confidence {
        matching: works.len(),
        total: entries.len(),
    };

    let mut per_block: Vec<usize> = Vec::new();
    for link in &works {
        if let Some(block) = link.loop_block {
            if per_block.len() <= block {
                per_block.resize(block + 1, 0);
            }
            per_block[block] += 1;
        }
    }
    let dominant = per_block
        .iter()
        .enumerate()
        .max_by_key(|(index, count)| (**count, std::cmp::Reverse(*index)))
        .filter(|(_, count)| **count * 100 >= works.len() * DOMINANT_BLOCK_PERCENT && **count > 0)
        .map(|(index, _)| index);

    let children = works
        .iter()
        .filter(|l| dominant.is_none() || l.loop_block == dominant)
        .map(|l| l.href.clone())
        .collect();

    Extraction {
        strategy: Strategy::Strict,
        children,
        confidence,
    }
}

/// Secondary strategy: any catalog page link of the entry content, falling
/// back to articles tagged with the page author's slug.
#[must_use]
pub fn relaxed(page: &ParsedPage) -> Extraction {
    let own = normalize_page_url(&page.url);
    let mut seen = HashSet::new();
    let entries: Vec<&str> = page
        .links
        .iter()
        .filter(|l| l.in_entry_content && !is_taxonomy_link(&l.href))
        .map(|l| l.href.as_str())
        .filter(|href| normalize_page_url(href) != own)
        .filter(|href| seen.insert(normalize_page_url(href)))
        .collect();

    let mut children: Vec<String> = entries
        .iter()
        .filter(|href| is_loose_work_link(href))
        .map(|href| (*href).to_string())
        .collect();
    let confidence = Confidence {
        matching: children.len(),
        total: entries.len(),
    };

    if children.is_empty() {
        if let Some(slug) = author_slug(page) {
            let tag = format!("auteur-{slug}");
            let mut seen = HashSet::new();
            children = page
                .articles
                .iter()
                .filter(|a| a.classes.iter().any(|c| c == &tag))
                .map(|a| a.href.clone())
                .filter(|href| is_book_link(href, &page.url))
                .filter(|href| seen.insert(normalize_page_url(href)))
                .collect();
        }
    }

    Extraction {
        strategy: Strategy::Relaxed,
        children,
        confidence,
    }
}

fn is_loose_work_link(href: &str) -> bool {
    url_path(href).is_some_and(|path| {
        !path.contains(TRACK_PATH) && (path.ends_with(".html") || path.contains(WORK_PATH))
    })
}
