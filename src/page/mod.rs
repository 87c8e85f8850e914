//! HTML page collaborator.
//!
//! [`ParsedPage::parse`] turns raw markup into an owned, `Send` snapshot of
//! the nodes the crawler cares about: every link with its structural context,
//! station (track) articles, download buttons, and a handful of metadata
//! fields. `scraper::Html` itself is not `Send`, so the document never
//! outlives the synchronous parse call.
//!
//! Interpretation of those nodes (titles, authors, sommaire shape, ...) lives
//! in [`extract`] and in the sommaire strategies.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub mod extract;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("static selector is valid"));
    };
}

selector!(TITLE, "title");
selector!(META, "meta");
selector!(BODY, "body");
selector!(H1, "h1");
selector!(ANCHOR, "a[href]");
selector!(ARTICLE, "article");
selector!(ENTRY_AUTEUR, "span.entry-auteur");
selector!(ENTRY_VOIX, "span.entry-voix");
selector!(TAG_LINK, "a[rel~='tag']");
selector!(PLAY_DURATION, "span.play-duration");
selector!(DATA_PLAY_ID, "[data-play-id]");
selector!(ENTRY_CONTENT, "div.entry-content");
selector!(BLOCK_LOOP_ITEMS, "div.entry-content div.block-loop-items");
selector!(TRACK_TITLE, "h2.entry-title, h3.entry-title, h4.entry-title");
selector!(BTN_DOWNLOAD, "a.btn-download[href]");
selector!(LOOP_MORE, "a.scroller.no-ajax[href]");
selector!(NEXT_PAGE, "a.next[href], a.page-numbers.next[href]");
selector!(LISTING_ENTRY, ".entry-title a[href]");

#[allow(clippy::expect_used)]
static INLINE_POST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"postid-(\d+)|postID":(\d+)"#).expect("post id regex is valid"));

/// Longest description taken from the entry content text.
const ENTRY_TEXT_MAX_CHARS: usize = 1000;

/// A link found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    /// Absolute URL, fragment removed.
    pub href: String,
    /// Visible text, whitespace collapsed.
    pub text: String,
    /// Inside `div.entry-content`.
    pub in_entry_content: bool,
    /// Inside `div.station-content` (within the entry content).
    pub in_station_content: bool,
    /// Index of the enclosing `div.block-loop-items` among those of the
    /// entry content, in document order.
    pub loop_block: Option<usize>,
}

/// A station (track) article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackArticle {
    /// `h2/h3/h4.entry-title` text.
    pub title: String,
    /// `a.btn-download` target, absolute.
    pub download_href: String,
    /// Link to the `/piste/` page, if the first link points there.
    pub page_href: Option<String>,
    /// `span.play-duration` text.
    pub duration: Option<String>,
}

/// An `a.btn-download` outside station articles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadButton {
    /// Absolute target.
    pub href: String,
    /// `data-url` attribute (the page the button belongs to).
    pub data_url: Option<String>,
}

/// An `<article>` in the entry content with its first link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleLink {
    /// Article classes.
    pub classes: Vec<String>,
    /// First link, absolute.
    pub href: String,
}

/// Owned snapshot of a parsed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// Page URL (base for relative links).
    pub url: String,
    /// `<title>` text.
    pub title_tag: Option<String>,
    /// `og:title` content.
    pub og_title: Option<String>,
    /// `og:image` content.
    pub og_image: Option<String>,
    /// `<meta name="description">` content.
    pub meta_description: Option<String>,
    /// `<body>` classes.
    pub body_classes: Vec<String>,
    /// `h1.archive-title` text.
    pub archive_title: Option<String>,
    /// `h1.entry-title` text, else the first `h1`.
    pub entry_title: Option<String>,
    /// `span.entry-auteur a[rel=tag]` text.
    pub author_tag: Option<String>,
    /// `span.entry-auteur a` href.
    pub author_href: Option<String>,
    /// `span.entry-voix a[rel=tag]` text.
    pub reader_tag: Option<String>,
    /// First `span.play-duration` text.
    pub play_duration: Option<String>,
    /// Post id found in the raw markup (`postid-N` or `"postID":N`).
    pub inline_post_id: Option<u64>,
    /// First `data-play-id` attribute.
    pub data_play_id: Option<u64>,
    /// Text of the entry content (scripts and ads removed, truncated).
    pub entry_text: Option<String>,
    /// Every link of the document, in document order.
    pub links: Vec<PageLink>,
    /// Station articles of the main scope, in document order.
    pub tracks: Vec<TrackArticle>,
    /// Book-level download buttons of the main scope.
    pub buttons: Vec<DownloadButton>,
    /// Articles inside the entry content.
    pub articles: Vec<ArticleLink>,
    /// "Load more tracks" endpoint.
    pub loop_more_href: Option<String>,
    /// Next listing page.
    pub next_page_href: Option<String>,
    /// `.entry-title a[href]` links (listing entries), absolute.
    pub entry_title_links: Vec<String>,
}

impl ParsedPage {
    /// Parses a full document (or a fragment) served at `url`.
    #[must_use]
    pub fn parse(url: &str, html: &str) -> Self {
        let document = Html::parse_document(html);
        let base = Url::parse(url).ok();
        let join = |href: &str| absolutize(base.as_ref(), href);

        let mut page = Self {
            url: url.to_string(),
            ..Self::default()
        };

        page.title_tag = document.select(&TITLE).next().map(text_of).filter(|t| !t.is_empty());
        for meta in document.select(&META) {
            let attrs = meta.value();
            let content = attrs.attr("content").map(collapse_whitespace);
            match (attrs.attr("property"), attrs.attr("name")) {
                (Some("og:title"), _) if page.og_title.is_none() => page.og_title = content,
                (Some("og:image"), _) if page.og_image.is_none() => page.og_image = content,
                (_, Some("description")) if page.meta_description.is_none() => {
                    page.meta_description = content.filter(|c| !c.is_empty());
                }
                _ => {}
            }
        }

        if let Some(body) = document.select(&BODY).next() {
            page.body_classes = body.value().classes().map(str::to_string).collect();
        }

        for h1 in document.select(&H1) {
            let classes: Vec<&str> = h1.value().classes().collect();
            if classes.contains(&"archive-title") && page.archive_title.is_none() {
                page.archive_title = Some(text_of(h1));
            }
            if classes.contains(&"entry-title") && page.entry_title.is_none() {
                page.entry_title = Some(text_of(h1));
            }
        }
        if page.entry_title.is_none() && page.archive_title.is_none() {
            page.entry_title = document.select(&H1).next().map(text_of);
        }

        if let Some(span) = document.select(&ENTRY_AUTEUR).next() {
            page.author_tag = span.select(&TAG_LINK).next().map(text_of);
            page.author_href = span
                .select(&ANCHOR)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(&join);
        }
        if let Some(span) = document.select(&ENTRY_VOIX).next() {
            page.reader_tag = span.select(&TAG_LINK).next().map(text_of);
        }
        page.play_duration = document
            .select(&PLAY_DURATION)
            .next()
            .map(text_of)
            .filter(|d| !d.is_empty());

        page.inline_post_id = INLINE_POST_ID.captures(html).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse().ok())
        });
        page.data_play_id = document
            .select(&DATA_PLAY_ID)
            .find_map(|el| el.value().attr("data-play-id")?.trim().parse().ok());

        let entry = document.select(&ENTRY_CONTENT).next();
        page.entry_text = entry.map(entry_text).filter(|t| !t.is_empty());

        let loop_blocks: Vec<ElementRef<'_>> = document.select(&BLOCK_LOOP_ITEMS).collect();
        for anchor in document.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href").and_then(&join) else {
                continue;
            };
            let mut link = PageLink {
                href,
                text: text_of(anchor),
                in_entry_content: false,
                in_station_content: false,
                loop_block: None,
            };
            for ancestor in anchor.ancestors().filter_map(ElementRef::wrap) {
                let el = ancestor.value();
                if el.name() != "div" {
                    continue;
                }
                if has_class(ancestor, "entry-content") {
                    link.in_entry_content = true;
                }
                if has_class(ancestor, "station-content") {
                    link.in_station_content = true;
                }
                if link.loop_block.is_none() {
                    link.loop_block = loop_blocks.iter().position(|block| *block == ancestor);
                }
            }
            link.in_station_content &= link.in_entry_content;
            page.links.push(link);
        }

        if let Some(entry) = entry {
            for article in entry.select(&ARTICLE) {
                if let Some(href) = article
                    .select(&ANCHOR)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(&join)
                {
                    page.articles.push(ArticleLink {
                        classes: article.value().classes().map(str::to_string).collect(),
                        href,
                    });
                }
            }
        }

        let post_id = extract::post_id(&page);
        let scope = main_scope(&document, post_id);
        page.tracks = track_articles(scope, &join);
        page.buttons = scope
            .select(&BTN_DOWNLOAD)
            .filter(|a| !a.ancestors().filter_map(ElementRef::wrap).any(is_station_article))
            .filter_map(|a| {
                Some(DownloadButton {
                    href: join(a.value().attr("href")?)?,
                    data_url: a.value().attr("data-url").map(str::to_string),
                })
            })
            .collect();

        page.loop_more_href = document
            .select(&LOOP_MORE)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(&join);
        page.next_page_href = document
            .select(&NEXT_PAGE)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(&join);
        page.entry_title_links = document
            .select(&LISTING_ENTRY)
            .filter_map(|a| a.value().attr("href").and_then(&join))
            .collect();

        page
    }
}

/// The main article: `article#post-{id}`, else `article.post.entry`, else the document.
fn main_scope(document: &Html, post_id: Option<u64>) -> ElementRef<'_> {
    let root = document.root_element();
    let by_id = post_id.and_then(|id| {
        let wanted = format!("post-{id}");
        document
            .select(&ARTICLE)
            .find(|a| a.value().id() == Some(wanted.as_str()) && !is_station_article(*a))
    });
    by_id
        .or_else(|| {
            document
                .select(&ARTICLE)
                .find(|a| has_class(*a, "post") && has_class(*a, "entry"))
        })
        .unwrap_or(root)
}

fn track_articles(scope: ElementRef<'_>, join: &impl Fn(&str) -> Option<String>) -> Vec<TrackArticle> {
    let stations: Vec<ElementRef<'_>> = scope
        .select(&ARTICLE)
        .filter(|a| is_station_article(*a))
        .collect();
    let in_entry = |a: &ElementRef<'_>| {
        a.ancestors()
            .filter_map(ElementRef::wrap)
            .any(|p| p.value().name() == "div" && has_class(p, "entry-content"))
    };
    let prefer_entry = stations.iter().any(in_entry);

    stations
        .into_iter()
        .filter(|a| !prefer_entry || in_entry(a))
        .filter_map(|article| {
            let download_href = article
                .select(&BTN_DOWNLOAD)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(join)?;
            let title = article.select(&TRACK_TITLE).next().map(text_of).unwrap_or_default();
            let page_href = article
                .select(&ANCHOR)
                .next()
                .and_then(|a| a.value().attr("href"))
                .filter(|href| href.contains("/piste/"))
                .and_then(join);
            let duration = article
                .select(&PLAY_DURATION)
                .next()
                .map(text_of)
                .filter(|d| !d.is_empty());
            Some(TrackArticle {
                title,
                download_href,
                page_href,
                duration,
            })
        })
        .collect()
}

fn is_station_article(element: ElementRef<'_>) -> bool {
    element.value().name() == "article"
        && (has_class(element, "station") || has_class(element, "type-station"))
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Collapsed text of an element.
fn text_of(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Entry text without `script`, `style` and `ins` (ad) content.
fn entry_text(entry: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in entry.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().filter_map(ElementRef::wrap).any(|el| {
            matches!(el.value().name(), "script" | "style" | "ins")
        });
        if !skipped {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
        .chars()
        .take(ENTRY_TEXT_MAX_CHARS)
        .collect()
}

/// Joins `href` against `base` and drops the fragment.
fn absolutize(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    url.set_fragment(None);
    Some(url.to_string())
}

/// Collapses whitespace runs to single spaces and trims.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const BOOK_PAGE: &str = r#"<html><head>
<title>Dumas, Alexandre - Les Trois Mousquetaires | Litteratureaudio.com</title>
<meta property="og:image" content="https://cdn.example.com/cover.jpg">
<meta name="description" content="Un classique. Durée : 14h 05min. Bonne écoute.">
</head>
<body class="single postid-4242 single-post">
<article id="post-4242" class="post entry">
 <h1 class="entry-title">Les Trois Mousquetaires</h1>
 <span class="entry-auteur"><a href="/livre-audio-gratuit-mp3/auteur/alexandre-dumas" rel="tag">Alexandre Dumas</a></span>
 <span class="entry-voix"><a href="/livre-audio-gratuit-mp3/voix/ren" rel="tag">René Depasse</a></span>
 <div class="entry-content">
  <p>Intro <script>var x = 1;</script> texte.</p>
  <article class="station type-station">
   <a href="/livre-audio-gratuit-mp3/piste/chap-1">lien</a>
   <h3 class="entry-title">Chapitre 1</h3><span class="play-duration">12:01</span>
   <a class="btn-download" href="/d?nonce=1">Télécharger</a>
  </article>
  <article class="station type-station">
   <h3 class="entry-title">Chapitre 2</h3>
   <a class="btn-download" href="/d?nonce=2">Télécharger</a>
  </article>
  <a class="btn-download" data-url="https://www.litteratureaudio.com/livre-audio-gratuit-mp3/dumas-trois.html" href="/zip?download=9">ZIP</a>
  <a class="scroller no-ajax" href="/loop?more=1">Voir plus</a>
 </div>
</article>
</body></html>"#;

    fn parse_book() -> ParsedPage {
        ParsedPage::parse(
            "https://www.litteratureaudio.com/livre-audio-gratuit-mp3/dumas-trois.html",
            BOOK_PAGE,
        )
    }

    #[test]
    fn test_parse_metadata_fields() {
        let page = parse_book();
        assert!(page.title_tag.as_deref().unwrap().starts_with("Dumas, Alexandre"));
        assert_eq!(page.og_image.as_deref(), Some("https://cdn.example.com/cover.jpg"));
        assert_eq!(page.author_tag.as_deref(), Some("Alexandre Dumas"));
        assert_eq!(page.reader_tag.as_deref(), Some("René Depasse"));
        assert_eq!(page.inline_post_id, Some(4242));
        assert!(page.body_classes.contains(&"postid-4242".to_string()));
        assert_eq!(page.entry_title.as_deref(), Some("Les Trois Mousquetaires"));
    }

    #[test]
    fn test_parse_tracks_and_buttons() {
        let page = parse_book();
        assert_eq!(page.tracks.len(), 2);
        assert_eq!(page.tracks[0].title, "Chapitre 1");
        assert_eq!(page.tracks[0].duration.as_deref(), Some("12:01"));
        assert_eq!(
            page.tracks[0].download_href,
            "https://www.litteratureaudio.com/d?nonce=1"
        );
        assert!(page.tracks[0].page_href.as_deref().unwrap().contains("/piste/"));
        assert_eq!(page.tracks[1].page_href, None);

        assert_eq!(page.buttons.len(), 1);
        assert!(page.buttons[0].href.ends_with("/zip?download=9"));
        assert_eq!(
            page.loop_more_href.as_deref(),
            Some("https://www.litteratureaudio.com/loop?more=1")
        );
    }

    #[test]
    fn test_entry_text_skips_scripts() {
        let page = parse_book();
        let text = page.entry_text.unwrap();
        assert!(text.starts_with("Intro texte."));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn test_link_context_flags() {
        let html = r#"<body><nav><a href="/nav.html">nav</a></nav>
<div class="entry-content"><div class="station-content">
 <div class="block-loop-items"><a href="a.html">A</a></div>
 <div class="block-loop-items"><a href="b.html#x">B</a></div>
 <p><a href="c.html">C</a></p>
</div></div></body>"#;
        let page = ParsedPage::parse("https://example.com/dir/page.html", html);
        let by_text = |t: &str| page.links.iter().find(|l| l.text == t).unwrap().clone();

        let nav = by_text("nav");
        assert!(!nav.in_entry_content && !nav.in_station_content);
        assert_eq!(nav.loop_block, None);

        assert_eq!(by_text("A").loop_block, Some(0));
        let b = by_text("B");
        assert_eq!(b.loop_block, Some(1));
        assert_eq!(b.href, "https://example.com/dir/b.html");

        let c = by_text("C");
        assert!(c.in_station_content);
        assert_eq!(c.loop_block, None);
    }

    #[test]
    fn test_absolutize_skips_anchors_and_js() {
        let base = Url::parse("https://example.com/a/").unwrap();
        assert_eq!(absolutize(Some(&base), "#top"), None);
        assert_eq!(absolutize(Some(&base), "javascript:void(0)"), None);
        assert_eq!(
            absolutize(Some(&base), "../b.html#frag").as_deref(),
            Some("https://example.com/b.html")
        );
    }
}
