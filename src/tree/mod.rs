//! The resolved catalog tree.
//!
//! A top-level input resolves to one [`Node`]: a listing (author, reader or
//! member page), a collective project, or a single book. Projects and
//! listings own their children in discovery order. The tree is built once by
//! the [`resolver`], annotated with [`ResolvedPath`]s by the layout pass, and
//! read-only from then on.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub mod resolver;
pub mod sommaire;

/// The site's own label for anthologies without a single author.
pub const VARIOUS_AUTHORS: &str = "Auteurs divers";

/// Structural category of an input URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    /// A single work.
    Book,
    /// `/auteur/<slug>` listing.
    AuthorListing,
    /// `/voix/<slug>` listing.
    ReaderListing,
    /// `/membre/<slug>` listing.
    MemberListing,
    /// A page with a sommaire linking sub-works.
    CollectiveProject,
    /// The page could not be fetched.
    Unknown,
}

impl UrlKind {
    /// The listing flavour, if this is a listing kind.
    #[must_use]
    pub fn listing_kind(self) -> Option<ListingKind> {
        match self {
            Self::AuthorListing => Some(ListingKind::Author),
            Self::ReaderListing => Some(ListingKind::Reader),
            Self::MemberListing => Some(ListingKind::Member),
            _ => None,
        }
    }
}

/// Listing flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Works by one author.
    Author,
    /// Works read by one narrator.
    Reader,
    /// Works published by one site member.
    Member,
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Author => "author",
            Self::Reader => "reader",
            Self::Member => "member",
        })
    }
}

/// How a node was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Discovery {
    /// Given directly as an input URL.
    Direct,
    /// Found on an author/reader/member listing.
    Listing {
        /// Listing flavour.
        kind: ListingKind,
        /// Listing display name.
        name: String,
    },
    /// Found in a project's sommaire.
    Project {
        /// The project page URL.
        parent_url: String,
    },
}

impl Discovery {
    /// True when the node was found on a listing page.
    #[must_use]
    pub fn is_listing(&self) -> bool {
        matches!(self, Self::Listing { .. })
    }
}

/// One track of a book; `index` is 1-based and gapless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackRef {
    /// Position in the book.
    pub index: u32,
    /// Track title as shown on the page.
    pub title: String,
    /// File (or download endpoint) URL.
    pub url: String,
    /// The track's own page, when linked.
    pub page_url: Option<String>,
    /// Display duration, when shown.
    pub duration: Option<String>,
}

/// Variant format. Ordering is priority: MP3 before ZIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// MP3 audio.
    Mp3,
    /// ZIP archive of the whole work.
    Zip,
}

impl VariantKind {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Zip => "zip",
        }
    }
}

/// What a variant covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "track", rename_all = "lowercase")]
pub enum VariantScope {
    /// The whole work.
    Book,
    /// One track, by index.
    Track(u32),
}

/// A downloadable file of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadVariant {
    /// Format.
    pub kind: VariantKind,
    /// URL to fetch.
    pub url: String,
    /// Whole work or a single track.
    pub scope: VariantScope,
    /// Filename announced by the server, if probed.
    pub filename: Option<String>,
}

/// Filesystem location assigned by the layout pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    /// This node's own folder name (no separators).
    pub segment: String,
    /// Path relative to the output root.
    pub relative: PathBuf,
}

/// A single work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookNode {
    /// Page URL (fragment stripped).
    pub source_url: String,
    /// Work title.
    pub title: String,
    /// Primary author.
    pub author: Option<String>,
    /// Narrator.
    pub reader: Option<String>,
    /// Ordered tracks.
    pub tracks: Vec<TrackRef>,
    /// Available downloads.
    pub variants: Vec<DownloadVariant>,
    /// `N` of a `-version-N` URL.
    pub version: Option<u32>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Plain-text description.
    pub description: Option<String>,
    /// Display duration of the whole work.
    pub duration: Option<String>,
    /// WordPress post id.
    pub post_id: Option<u64>,
    /// How the book was reached.
    pub discovery: Discovery,
    /// Assigned location.
    pub path: Option<ResolvedPath>,
}

impl BookNode {
    /// A book with only a URL and a title; everything else empty.
    #[must_use]
    pub fn new(source_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
            author: None,
            reader: None,
            tracks: Vec::new(),
            variants: Vec::new(),
            version: None,
            cover_url: None,
            description: None,
            duration: None,
            post_id: None,
            discovery: Discovery::Direct,
            path: None,
        }
    }

    /// Variants of `kind`, in page order.
    pub fn variants_of(&self, kind: VariantKind) -> impl Iterator<Item = &DownloadVariant> {
        self.variants.iter().filter(move |v| v.kind == kind)
    }

    /// Title of track `index`, if present.
    #[must_use]
    pub fn track_title(&self, index: u32) -> Option<&str> {
        self.tracks
            .iter()
            .find(|t| t.index == index)
            .map(|t| t.title.as_str())
    }
}

/// A collective work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectNode {
    /// Project page URL.
    pub source_url: String,
    /// Project title.
    pub title: String,
    /// Declared author; `None` for authorless anthologies.
    pub author: Option<String>,
    /// Children carry two or more distinct authors.
    pub multi_author: bool,
    /// Sub-projects and books, in discovery order. Never empty.
    pub children: Vec<Node>,
    /// How the project was reached.
    pub discovery: Discovery,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Plain-text description.
    pub description: Option<String>,
    /// Assigned location.
    pub path: Option<ResolvedPath>,
}

/// An author, reader or member listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingNode {
    /// Listing flavour.
    pub kind: ListingKind,
    /// Display name (author/reader/member).
    pub name: String,
    /// First listing page URL.
    pub source_url: String,
    /// Resolved works, in discovery order.
    pub children: Vec<Node>,
    /// Assigned location.
    pub path: Option<ResolvedPath>,
}

/// A node of the resolved tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    /// Listing root.
    Listing(ListingNode),
    /// Collective project.
    Project(ProjectNode),
    /// Single work.
    Book(BookNode),
}

impl Node {
    /// Source URL of the node.
    #[must_use]
    pub fn source_url(&self) -> &str {
        match self {
            Self::Listing(l) => &l.source_url,
            Self::Project(p) => &p.source_url,
            Self::Book(b) => &b.source_url,
        }
    }

    /// Display title (listing name for listings).
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Listing(l) => &l.name,
            Self::Project(p) => &p.title,
            Self::Book(b) => &b.title,
        }
    }

    /// Assigned location, once laid out.
    #[must_use]
    pub fn path(&self) -> Option<&ResolvedPath> {
        match self {
            Self::Listing(l) => l.path.as_ref(),
            Self::Project(p) => p.path.as_ref(),
            Self::Book(b) => b.path.as_ref(),
        }
    }

    pub(crate) fn set_path(&mut self, path: ResolvedPath) {
        match self {
            Self::Listing(l) => l.path = Some(path),
            Self::Project(p) => p.path = Some(path),
            Self::Book(b) => b.path = Some(path),
        }
    }

    /// Children of containers; empty for books.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Listing(l) => &l.children,
            Self::Project(p) => &p.children,
            Self::Book(_) => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        match self {
            Self::Listing(l) => &mut l.children,
            Self::Project(p) => &mut p.children,
            Self::Book(_) => &mut [],
        }
    }

    /// Number of books in this subtree.
    #[must_use]
    pub fn book_count(&self) -> usize {
        match self {
            Self::Book(_) => 1,
            other => other.children().iter().map(Node::book_count).sum(),
        }
    }

    /// Normalized authors contributing to this subtree.
    ///
    /// Books contribute their own author. Containers contribute the union
    /// of their children, and a project whose children carry no author
    /// falls back to its declared one.
    #[must_use]
    pub fn contributing_authors(&self) -> BTreeSet<String> {
        match self {
            Self::Book(b) => b
                .author
                .as_deref()
                .and_then(normalize_author)
                .into_iter()
                .collect(),
            Self::Project(p) => {
                let from_children = union_authors(&p.children);
                if from_children.is_empty() {
                    p.author
                        .as_deref()
                        .and_then(normalize_author)
                        .into_iter()
                        .collect()
                } else {
                    from_children
                }
            }
            Self::Listing(l) => union_authors(&l.children),
        }
    }
}

/// Union of the contributing authors of `children`.
#[must_use]
pub fn union_authors(children: &[Node]) -> BTreeSet<String> {
    children
        .iter()
        .flat_map(Node::contributing_authors)
        .collect()
}

/// Comparison key for author names: trimmed, lowercased, single-spaced.
///
/// Returns `None` for empty names and for the site's "various authors"
/// label, which names no author at all.
#[must_use]
pub fn normalize_author(name: &str) -> Option<String> {
    let key = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if key.is_empty() || key == VARIOUS_AUTHORS.to_lowercase() {
        None
    } else {
        Some(key)
    }
}

/// Canonical form of a title used to group reader versions.
#[must_use]
pub fn canonical_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
