//! Folder path assignment.
//!
//! [`assign_paths`] walks a resolved tree top-down and gives every node a
//! [`ResolvedPath`]. Naming depends on the node's position:
//!
//! - a top-level book is `Author - Title`, or `Title (Reader)` when it is one
//!   reader's version of a shared title;
//! - a top-level project is `Author - Title` with a single declared author,
//!   `Auteurs divers - Title` when its children have several authors, and
//!   `Title` otherwise;
//! - a listing root is named after its author, reader or member;
//! - anything below a project or listing uses its title alone, except that a
//!   multi-author project found on a listing may be moved to the output root
//!   ([`MultiAuthorPlacement::IndependentRoot`]).
//!
//! Siblings sharing a title but read by different readers become
//! `Title (Reader)`. Remaining clashes get ` (2)`, ` (3)`, … in discovery
//! order. Names are compared case-insensitively.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::MultiAuthorPlacement;
use crate::download::filename::sanitize_filename;
use crate::tree::{BookNode, Node, ResolvedPath, VARIOUS_AUTHORS, canonical_title, normalize_author};

/// Highest numeric suffix tried before giving up.
const MAX_SUFFIX: usize = 999;

/// Layout failures. Only reachable with a degenerate tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// Every suffixed variant of a name is taken.
    #[error("no free folder name for '{name}' under '{}'", parent.display())]
    PathCollisionUnresolved {
        /// Parent folder, relative to the output root.
        parent: PathBuf,
        /// Base name.
        name: String,
    },
}

/// Names already taken, per parent folder.
#[derive(Debug, Default)]
struct Claims {
    taken: HashMap<PathBuf, HashSet<String>>,
}

impl Claims {
    fn claim(&mut self, parent: &Path, base: &str) -> Result<String, LayoutError> {
        let taken = self.taken.entry(parent.to_path_buf()).or_default();
        if taken.insert(base.to_lowercase()) {
            return Ok(base.to_string());
        }
        for n in 2..=MAX_SUFFIX {
            let candidate = format!("{base} ({n})");
            if taken.insert(candidate.to_lowercase()) {
                debug!(base, candidate = %candidate, "folder name collision suffixed");
                return Ok(candidate);
            }
        }
        Err(LayoutError::PathCollisionUnresolved {
            parent: parent.to_path_buf(),
            name: base.to_string(),
        })
    }
}

/// Annotates `root` and all its descendants with their folder.
///
/// # Errors
///
/// Returns [`LayoutError::PathCollisionUnresolved`] if a name cannot be made
/// unique.
pub fn assign_paths(root: &mut Node, placement: MultiAuthorPlacement) -> Result<(), LayoutError> {
    assign_roots([root], placement)
}

/// Lays out every input root of a run at once.
///
/// The output root is one namespace: same-named roots are suffixed in input
/// order, and top-level books sharing a title with a different reader are
/// all named `Title (Reader)`.
///
/// # Errors
///
/// Returns [`LayoutError::PathCollisionUnresolved`] if a name cannot be made
/// unique.
pub fn assign_roots<'a>(
    roots: impl IntoIterator<Item = &'a mut Node>,
    placement: MultiAuthorPlacement,
) -> Result<(), LayoutError> {
    let roots: Vec<&mut Node> = roots.into_iter().collect();
    let versioned = versioned_titles(roots.iter().map(|root| &**root));
    let mut claims = Claims::default();

    for root in roots {
        let base = match &*root {
            Node::Book(book) if needs_reader_suffix(book, &versioned) => reader_name(book),
            other => top_level_name(other),
        };
        let segment = claims.claim(Path::new(""), &base)?;
        let relative = PathBuf::from(&segment);
        root.set_path(ResolvedPath {
            segment,
            relative: relative.clone(),
        });
        assign_children(root, &relative, placement, &mut claims)?;
    }
    Ok(())
}

fn assign_children(
    parent: &mut Node,
    parent_path: &Path,
    placement: MultiAuthorPlacement,
    claims: &mut Claims,
) -> Result<(), LayoutError> {
    let parent_is_listing = matches!(parent, Node::Listing(_));
    let versioned = versioned_titles(parent.children());

    for child in parent.children_mut() {
        let independent = parent_is_listing
            && placement == MultiAuthorPlacement::IndependentRoot
            && matches!(child, Node::Project(p) if p.multi_author);

        let (folder, base) = if independent {
            (PathBuf::new(), various_authors_name(child.title()))
        } else {
            let base = match &*child {
                Node::Book(book) if needs_reader_suffix(book, &versioned) => reader_name(book),
                other => sanitize_filename(other.title()),
            };
            (parent_path.to_path_buf(), base)
        };

        let segment = claims.claim(&folder, &base)?;
        let relative = folder.join(&segment);
        child.set_path(ResolvedPath {
            segment,
            relative: relative.clone(),
        });
        assign_children(child, &relative, placement, claims)?;
    }
    Ok(())
}

/// Folder name of an input's root node.
#[must_use]
pub fn top_level_name(node: &Node) -> String {
    match node {
        Node::Listing(listing) => sanitize_filename(&listing.name),
        Node::Book(book) => {
            if book.version.is_some() && book.reader.is_some() {
                reader_name(book)
            } else {
                prefixed(book.author.as_deref(), &book.title)
            }
        }
        Node::Project(project) => {
            if project.multi_author {
                various_authors_name(&project.title)
            } else {
                prefixed(project.author.as_deref(), &project.title)
            }
        }
    }
}

fn prefixed(author: Option<&str>, title: &str) -> String {
    match author.filter(|a| normalize_author(a).is_some()) {
        Some(author) => sanitize_filename(&format!("{} - {title}", author.trim())),
        None => sanitize_filename(title),
    }
}

fn various_authors_name(title: &str) -> String {
    sanitize_filename(&format!("{VARIOUS_AUTHORS} - {title}"))
}

fn reader_name(book: &BookNode) -> String {
    match book.reader.as_deref() {
        Some(reader) => sanitize_filename(&format!("{} ({})", book.title, reader.trim())),
        None => sanitize_filename(&book.title),
    }
}

/// Canonical titles shared by sibling books read by different readers.
fn versioned_titles<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> HashSet<String> {
    let mut readers: HashMap<String, HashSet<String>> = HashMap::new();
    for node in nodes {
        if let Node::Book(book) = node {
            if let Some(reader) = book.reader.as_deref() {
                readers
                    .entry(canonical_title(&book.title))
                    .or_default()
                    .insert(reader.trim().to_lowercase());
            }
        }
    }
    readers
        .into_iter()
        .filter(|(_, r)| r.len() >= 2)
        .map(|(title, _)| title)
        .collect()
}

fn needs_reader_suffix(book: &BookNode, versioned: &HashSet<String>) -> bool {
    book.reader.is_some()
        && (book.version.is_some() || versioned.contains(&canonical_title(&book.title)))
}
