//! Site metadata extraction over a [`ParsedPage`].
//!
//! Every function here is pure: it reads the owned snapshot and never
//! touches the network.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{DownloadButton, ParsedPage, collapse_whitespace};
use crate::tree::ListingKind;

/// Path prefix shared by every work page.
pub const WORK_PATH: &str = "/livre-audio-gratuit-mp3/";

/// Path fragment of track pages.
pub const TRACK_PATH: &str = "/livre-audio-gratuit-mp3/piste/";

/// Path fragments of taxonomy pages (never works).
const TAXONOMY_PATHS: [&str; 6] = [
    "/livre-audio-gratuit-mp3/auteur/",
    "/livre-audio-gratuit-mp3/voix/",
    "/membre/",
    "/categorie/",
    "/tag/",
    "/genre/",
];

#[allow(clippy::expect_used)]
static TITLE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^-]+?)\s*-\s*(.+)$").expect("title split regex is valid"));

#[allow(clippy::expect_used)]
static DURATION_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)duree\s*:\s*([^.]+)").expect("duration regex is valid"));

#[allow(clippy::expect_used)]
static VERSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-version-(\d+)(?:\.html)?/?$").expect("version regex is valid"));

/// `<title>` without the trailing ` | Site` part.
fn title_tag_body(page: &ParsedPage) -> Option<&str> {
    let raw = page.title_tag.as_deref()?;
    let body = raw.rsplit_once(" | ").map_or(raw, |(head, _)| head).trim();
    (!body.is_empty()).then_some(body)
}

/// Work title: `<title>` minus the author prefix, else `og:title`, else the
/// entry heading.
#[must_use]
pub fn title(page: &ParsedPage) -> Option<String> {
    if let Some(body) = title_tag_body(page) {
        let title = TITLE_SPLIT
            .captures(body)
            .and_then(|caps| caps.get(2))
            .map_or(body, |m| m.as_str());
        return Some(title.trim().to_string());
    }
    page.og_title
        .as_deref()
        .map(|t| t.rsplit_once(" | ").map_or(t, |(head, _)| head).trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| page.entry_title.clone().filter(|t| !t.is_empty()))
}

/// Primary author: the author tag, else the `<title>` prefix with
/// `Last, First` turned into `First Last`.
#[must_use]
pub fn author(page: &ParsedPage) -> Option<String> {
    if let Some(tag) = page.author_tag.as_deref().filter(|t| !t.is_empty()) {
        return Some(tag.to_string());
    }
    let body = title_tag_body(page)?;
    let prefix = TITLE_SPLIT.captures(body)?.get(1)?.as_str().trim();
    let name = match prefix.split_once(',') {
        Some((last, first)) if !first.trim().is_empty() => {
            format!("{} {}", first.trim(), last.trim())
        }
        _ => prefix.to_string(),
    };
    (!name.is_empty()).then_some(name)
}

/// Narrator from the reader tag.
#[must_use]
pub fn reader(page: &ParsedPage) -> Option<String> {
    page.reader_tag.clone().filter(|r| !r.is_empty())
}

/// Cover image URL from `og:image`.
#[must_use]
pub fn cover_url(page: &ParsedPage) -> Option<String> {
    page.og_image.clone().filter(|c| !c.is_empty())
}

/// Meta description, else the entry content text.
#[must_use]
pub fn description(page: &ParsedPage) -> Option<String> {
    page.meta_description
        .clone()
        .or_else(|| page.entry_text.clone())
        .filter(|d| !d.is_empty())
}

/// Whole-work duration: the play duration, else `Durée : …` in the description.
#[must_use]
pub fn duration(page: &ParsedPage) -> Option<String> {
    if let Some(d) = page.play_duration.clone() {
        return Some(d);
    }
    let text = strip_accents(page.meta_description.as_deref()?);
    DURATION_IN_TEXT
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|d| !d.is_empty())
}

/// WordPress post id: body class, inline markup, then `data-play-id`.
#[must_use]
pub fn post_id(page: &ParsedPage) -> Option<u64> {
    page.body_classes
        .iter()
        .find_map(|c| c.strip_prefix("postid-")?.parse().ok())
        .or(page.inline_post_id)
        .or(page.data_play_id)
}

/// `N` of a `-version-N` URL slug.
#[must_use]
pub fn version_tag(url: &str) -> Option<u32> {
    let path = url_path(url)?;
    VERSION_SUFFIX
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Book-level download buttons: those bound to this page's URL, else the first.
#[must_use]
pub fn book_buttons(page: &ParsedPage) -> Vec<&DownloadButton> {
    let own = normalize_page_url(&page.url);
    let bound: Vec<&DownloadButton> = page
        .buttons
        .iter()
        .filter(|b| b.data_url.as_deref().map(normalize_page_url).as_deref() == Some(own.as_str()))
        .collect();
    if bound.is_empty() {
        page.buttons.iter().take(1).collect()
    } else {
        bound
    }
}

/// Work links of a listing page, deduplicated in document order.
#[must_use]
pub fn listing_entries(page: &ParsedPage) -> Vec<String> {
    let mut seen = HashSet::new();
    page.entry_title_links
        .iter()
        .filter(|href| is_book_link(href, &page.url))
        .filter(|href| seen.insert(normalize_page_url(href)))
        .cloned()
        .collect()
}

/// Display name of a listing: text after the first `:` of the archive
/// heading (entry heading for members), else the URL slug.
#[must_use]
pub fn listing_name(page: &ParsedPage, kind: ListingKind) -> String {
    let heading = match kind {
        ListingKind::Member => page.entry_title.as_deref(),
        ListingKind::Author | ListingKind::Reader => page.archive_title.as_deref(),
    };
    heading
        .map(|h| h.split_once(':').map_or(h, |(_, name)| name).trim())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| listing_slug(&page.url).map(|s| s.replace('-', " ")))
        .unwrap_or_else(|| page.url.clone())
}

/// Whether the page presents itself as a collection of works.
#[must_use]
pub fn is_collection_page(page: &ParsedPage) -> bool {
    if page.body_classes.iter().any(|c| c.contains("sommaire")) {
        return true;
    }
    if page.url.to_lowercase().contains("oeuvre-integrale") {
        return true;
    }
    let loop_block_books = page
        .links
        .iter()
        .filter(|l| l.in_station_content && l.loop_block.is_some() && is_book_link(&l.href, &page.url))
        .count();
    if loop_block_books >= 3 {
        return true;
    }
    let haystack = strip_accents(&format!(
        "{} {}",
        title(page).unwrap_or_default(),
        page.meta_description.as_deref().unwrap_or_default()
    ))
    .to_lowercase();
    ["oeuvre integrale", "sommaire", "projet collectif"]
        .iter()
        .any(|needle| haystack.contains(needle))
}

/// True for `/livre-audio-gratuit-mp3/<slug>.html` links other than `self_url`.
#[must_use]
pub fn is_book_link(href: &str, self_url: &str) -> bool {
    let Some(path) = url_path(href) else {
        return false;
    };
    path.contains(WORK_PATH)
        && path.ends_with(".html")
        && !path.contains(TRACK_PATH)
        && !is_taxonomy_path(&path)
        && normalize_page_url(href) != normalize_page_url(self_url)
}

/// True for author/reader/member/category links.
#[must_use]
pub fn is_taxonomy_link(href: &str) -> bool {
    url_path(href).is_some_and(|p| is_taxonomy_path(&p))
}

fn is_taxonomy_path(path: &str) -> bool {
    TAXONOMY_PATHS.iter().any(|t| path.contains(t))
}

/// Last path segment without `.html`.
#[must_use]
pub fn slug_from_url(url: &str) -> Option<String> {
    let path = url_path(url)?;
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let slug = last.strip_suffix(".html").unwrap_or(last);
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Slug of a listing URL, ignoring a trailing `/page/N`.
#[must_use]
pub fn listing_slug(url: &str) -> Option<String> {
    let path = url_path(url)?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let end = match segments.as_slice() {
        [.., "page", n] if n.chars().all(|c| c.is_ascii_digit()) => segments.len() - 2,
        _ => segments.len(),
    };
    segments.get(end.checked_sub(1)?).map(|s| (*s).to_string())
}

/// Slug of the page's author tag link.
#[must_use]
pub fn author_slug(page: &ParsedPage) -> Option<String> {
    page.author_href.as_deref().and_then(listing_slug)
}

/// URL without query, fragment or trailing slash; used as an identity key.
#[must_use]
pub fn normalize_page_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .trim()
            .trim_end_matches('/')
            .to_string(),
    }
}

/// Decoded path of an absolute URL.
#[must_use]
pub fn url_path(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    Some(
        urlencoding::decode(parsed.path())
            .map_or_else(|_| parsed.path().to_string(), |p| p.into_owned()),
    )
}

/// Replaces French accented letters by their base letter.
#[must_use]
pub fn strip_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ä' | 'ã' => 'a',
            'À' | 'Á' | 'Â' | 'Ä' | 'Ã' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'î' | 'ï' | 'í' => 'i',
            'Î' | 'Ï' | 'Í' => 'I',
            'ô' | 'ö' | 'ó' => 'o',
            'Ô' | 'Ö' | 'Ó' => 'O',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'Ù' | 'Û' | 'Ü' | 'Ú' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ÿ' => 'y',
            other => other,
        })
        .collect()
}

/// Strips tags and entities from a WordPress `rendered` field.
#[must_use]
pub fn html_to_text(fragment: &str) -> String {
    let document = scraper::Html::parse_fragment(fragment);
    collapse_whitespace(&document.root_element().text().collect::<String>())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::page::{PageLink, ParsedPage};

    const PAGE_URL: &str = "https://www.litteratureaudio.com/livre-audio-gratuit-mp3/dumas-trois.html";

    fn page_with_title(title: &str) -> ParsedPage {
        ParsedPage {
            url: PAGE_URL.to_string(),
            title_tag: Some(title.to_string()),
            ..ParsedPage::default()
        }
    }

    fn link(href: &str, station: bool, block: Option<usize>) -> PageLink {
        PageLink {
            href: href.to_string(),
            text: String::new(),
            in_entry_content: true,
            in_station_content: station,
            loop_block: block,
        }
    }

    // ==================== Title & Author Tests ====================

    #[test]
    fn test_title_strips_site_suffix_and_author_prefix() {
        let page = page_with_title("Dumas, Alexandre - Les Trois Mousquetaires | Litteratureaudio.com");
        assert_eq!(title(&page).as_deref(), Some("Les Trois Mousquetaires"));
    }

    #[test]
    fn test_title_without_prefix() {
        let page = page_with_title("Contes choisis | Litteratureaudio.com");
        assert_eq!(title(&page).as_deref(), Some("Contes choisis"));
    }

    #[test]
    fn test_title_falls_back_to_og_then_heading() {
        let mut page = ParsedPage {
            og_title: Some("Le Horla | Litteratureaudio.com".to_string()),
            entry_title: Some("Heading".to_string()),
            ..ParsedPage::default()
        };
        assert_eq!(title(&page).as_deref(), Some("Le Horla"));
        page.og_title = None;
        assert_eq!(title(&page).as_deref(), Some("Heading"));
    }

    #[test]
    fn test_author_prefers_tag() {
        let mut page = page_with_title("Dumas, Alexandre - Les Trois Mousquetaires | Site");
        page.author_tag = Some("Alexandre Dumas".to_string());
        assert_eq!(author(&page).as_deref(), Some("Alexandre Dumas"));
    }

    #[test]
    fn test_author_from_title_prefix_swaps_names() {
        let page = page_with_title("Verne, Jules - Michel Strogoff | Site");
        assert_eq!(author(&page).as_deref(), Some("Jules Verne"));
        let page = page_with_title("Collectif - Contes | Site");
        assert_eq!(author(&page).as_deref(), Some("Collectif"));
        let page = page_with_title("Contes | Site");
        assert_eq!(author(&page), None);
    }

    // ==================== Metadata Tests ====================

    #[test]
    fn test_duration_from_description() {
        let page = ParsedPage {
            meta_description: Some("Un roman. Durée : 14h 05min. Bonne écoute.".to_string()),
            ..ParsedPage::default()
        };
        assert_eq!(duration(&page).as_deref(), Some("14h 05min"));
    }

    #[test]
    fn test_post_id_precedence() {
        let mut page = ParsedPage {
            body_classes: vec!["single".to_string(), "postid-12".to_string()],
            inline_post_id: Some(34),
            data_play_id: Some(56),
            ..ParsedPage::default()
        };
        assert_eq!(post_id(&page), Some(12));
        page.body_classes.clear();
        assert_eq!(post_id(&page), Some(34));
        page.inline_post_id = None;
        assert_eq!(post_id(&page), Some(56));
    }

    #[test]
    fn test_version_tag() {
        assert_eq!(
            version_tag("https://example.com/livre-audio-gratuit-mp3/horla-version-2.html"),
            Some(2)
        );
        assert_eq!(version_tag(PAGE_URL), None);
    }

    #[test]
    fn test_book_buttons_prefer_bound_data_url() {
        let page = ParsedPage {
            url: PAGE_URL.to_string(),
            buttons: vec![
                DownloadButton {
                    href: "https://example.com/other.zip".to_string(),
                    data_url: Some("https://example.com/other.html".to_string()),
                },
                DownloadButton {
                    href: "https://example.com/mine.zip".to_string(),
                    data_url: Some(format!("{PAGE_URL}?utm=1")),
                },
            ],
            ..ParsedPage::default()
        };
        let buttons = book_buttons(&page);
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].href, "https://example.com/mine.zip");
    }

    // ==================== Link Shape Tests ====================

    #[test]
    fn test_is_book_link() {
        assert!(is_book_link(
            "https://example.com/livre-audio-gratuit-mp3/verne-strogoff.html",
            PAGE_URL
        ));
        assert!(!is_book_link(PAGE_URL, PAGE_URL));
        assert!(!is_book_link(
            "https://example.com/livre-audio-gratuit-mp3/piste/chap-1.html",
            PAGE_URL
        ));
        assert!(!is_book_link(
            "https://example.com/livre-audio-gratuit-mp3/auteur/jules-verne",
            PAGE_URL
        ));
        assert!(!is_book_link("https://example.com/contact.html", PAGE_URL));
    }

    #[test]
    fn test_listing_slug_ignores_page_suffix() {
        assert_eq!(
            listing_slug("https://example.com/livre-audio-gratuit-mp3/auteur/jules-verne/page/3").as_deref(),
            Some("jules-verne")
        );
        assert_eq!(
            listing_slug("https://example.com/membre/ren/").as_deref(),
            Some("ren")
        );
    }

    #[test]
    fn test_listing_name_after_colon() {
        let page = ParsedPage {
            url: "https://example.com/livre-audio-gratuit-mp3/auteur/jules-verne".to_string(),
            archive_title: Some("Auteur : Jules Verne".to_string()),
            ..ParsedPage::default()
        };
        assert_eq!(listing_name(&page, ListingKind::Author), "Jules Verne");
        assert_eq!(listing_name(&page, ListingKind::Member), "jules verne");
    }

    #[test]
    fn test_is_collection_page_signals() {
        let mut page = page_with_title("Contes | Site");
        assert!(!is_collection_page(&page));

        page.body_classes = vec!["single-sommaire".to_string()];
        assert!(is_collection_page(&page));

        let mut page = page_with_title("Contes | Site");
        page.links = (1..=3)
            .map(|i| link(&format!("https://example.com/livre-audio-gratuit-mp3/c{i}.html"), true, Some(0)))
            .collect();
        assert!(is_collection_page(&page));

        let page = page_with_title("Œuvre intégrale - Contes | Site");
        assert!(!is_collection_page(&page));
        let page = page_with_title("Zola - Les Rougon-Macquart (Oeuvre intégrale) | Site");
        assert!(is_collection_page(&page));
    }

    #[test]
    fn test_normalize_page_url() {
        assert_eq!(
            normalize_page_url("https://example.com/a.html?x=1#top"),
            "https://example.com/a.html"
        );
        assert_eq!(normalize_page_url("https://example.com/dir/"), "https://example.com/dir");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("<p>Un <em>beau</em>\n livre</p>"), "Un beau livre");
    }
}
