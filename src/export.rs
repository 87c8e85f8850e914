//! Metadata files written next to the audio, and the run summary.
//!
//! Every Project and Book folder can receive `cover.{jpg|png|webp}`,
//! `description.txt` and `<folder>.json`. The JSON is the contract the
//! verifier reads back: its `downloaded_files` list names files relative
//! to the folder.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::download::filename::cover_extension;
use crate::orchestrator::{DownloadResult, UnitReport};
use crate::tree::Node;

/// Value of the `tool` field in every JSON file.
pub const TOOL_NAME: &str = "ripper";

/// Name of the description file.
pub const DESCRIPTION_FILE: &str = "description.txt";

/// Errors produced while writing metadata files.
#[derive(Debug, Error)]
pub enum ExportError {
    /// I/O error writing a file.
    #[error("I/O error writing {}: {source}", path.display())]
    Io {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Descriptive part of a node's JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetadata {
    /// Title (listing name for listings).
    pub title: String,
    /// Author, when known.
    pub author: Option<String>,
    /// Narrator, for books.
    pub reader: Option<String>,
    /// Display duration.
    pub duration: Option<String>,
    /// Plain-text description.
    pub description: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// The node is a collective project.
    pub is_collective_project: bool,
    /// The project's children have several authors.
    pub multi_author: bool,
}

/// A child folder, as listed in a container's JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    /// Child title.
    pub title: String,
    /// Folder name under this one.
    pub folder: String,
    /// Child page URL.
    pub source_url: String,
}

/// Contents of `<folder>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFile {
    /// Always [`TOOL_NAME`].
    pub tool: String,
    /// Crate version that wrote the file.
    pub version: String,
    /// Page URL of the node.
    pub source_url: String,
    /// Descriptive fields.
    pub metadata: NodeMetadata,
    /// Download variants found on the page.
    #[serde(default)]
    pub download_links: Vec<serde_json::Value>,
    /// Tracks, in order.
    #[serde(default)]
    pub tracks: Vec<serde_json::Value>,
    /// Child folders of a container.
    #[serde(default)]
    pub children: Vec<ChildEntry>,
    /// Files obtained for a book, relative to its folder.
    #[serde(default)]
    pub downloaded_files: Vec<String>,
}

impl MetadataFile {
    /// Builds the file contents for `node`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Serialize`] if variants or tracks fail to
    /// serialize.
    pub fn for_node(node: &Node, downloaded_files: Vec<String>) -> Result<Self, ExportError> {
        let (metadata, download_links, tracks) = match node {
            Node::Book(book) => (
                NodeMetadata {
                    title: book.title.clone(),
                    author: book.author.clone(),
                    reader: book.reader.clone(),
                    duration: book.duration.clone(),
                    description: book.description.clone(),
                    cover_url: book.cover_url.clone(),
                    is_collective_project: false,
                    multi_author: false,
                },
                to_values(&book.variants)?,
                to_values(&book.tracks)?,
            ),
            Node::Project(project) => (
                NodeMetadata {
                    title: project.title.clone(),
                    author: project.author.clone(),
                    description: project.description.clone(),
                    cover_url: project.cover_url.clone(),
                    is_collective_project: true,
                    multi_author: project.multi_author,
                    ..NodeMetadata::default()
                },
                Vec::new(),
                Vec::new(),
            ),
            Node::Listing(listing) => (
                NodeMetadata {
                    title: listing.name.clone(),
                    ..NodeMetadata::default()
                },
                Vec::new(),
                Vec::new(),
            ),
        };

        let children = node
            .children()
            .iter()
            .map(|child| ChildEntry {
                title: child.title().to_string(),
                folder: child
                    .path()
                    .map(|p| p.segment.clone())
                    .unwrap_or_default(),
                source_url: child.source_url().to_string(),
            })
            .collect();

        Ok(Self {
            tool: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            source_url: node.source_url().to_string(),
            metadata,
            download_links,
            tracks,
            children,
            downloaded_files,
        })
    }
}

fn to_values<T: Serialize>(items: &[T]) -> Result<Vec<serde_json::Value>, ExportError> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(ExportError::from))
        .collect()
}

/// `<folder>/<folder name>.json`.
#[must_use]
pub fn metadata_path(folder: &Path) -> PathBuf {
    let name = folder
        .file_name()
        .map_or_else(|| "metadata".to_string(), |n| n.to_string_lossy().into_owned());
    folder.join(format!("{name}.json"))
}

/// Writes `value` as pretty JSON to `path`, removing the file if writing fails.
fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), ExportError> {
    let file = fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let write_result = {
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)
    };
    if let Err(err) = write_result {
        let _ = fs::remove_file(path);
        return Err(err.into());
    }
    Ok(())
}

/// Writes `<folder>.json` for `node`.
///
/// # Errors
///
/// Returns [`ExportError`] on I/O or serialization failure.
#[instrument(skip(node, downloaded_files), fields(folder = %folder.display()))]
pub fn write_metadata(
    folder: &Path,
    node: &Node,
    downloaded_files: Vec<String>,
) -> Result<PathBuf, ExportError> {
    let path = metadata_path(folder);
    let contents = MetadataFile::for_node(node, downloaded_files)?;
    write_json_file(&path, &contents)?;
    debug!(path = %path.display(), "metadata written");
    Ok(path)
}

/// Writes `description.txt` (trimmed, newline-terminated).
///
/// Returns `None` without touching the disk for a blank description.
///
/// # Errors
///
/// Returns [`ExportError::Io`] if the file cannot be written.
pub fn write_description(folder: &Path, text: &str) -> Result<Option<PathBuf>, ExportError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let path = folder.join(DESCRIPTION_FILE);
    fs::write(&path, format!("{text}\n")).map_err(|e| ExportError::io(&path, e))?;
    Ok(Some(path))
}

/// Writes `cover.<ext>` with the extension picked from `content_type`.
///
/// # Errors
///
/// Returns [`ExportError::Io`] if the file cannot be written.
pub fn write_cover(
    folder: &Path,
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<PathBuf, ExportError> {
    let path = folder.join(format!("cover.{}", cover_extension(content_type)));
    fs::write(&path, bytes).map_err(|e| ExportError::io(&path, e))?;
    Ok(path)
}

/// Files and bytes attributed to one author or project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Units that produced a file.
    pub files: usize,
    /// Bytes transferred.
    pub bytes: u64,
}

/// One failed unit in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    /// File URL.
    pub url: String,
    /// Book page URL.
    pub book_url: String,
    /// Intended target.
    pub target: PathBuf,
    /// Last error.
    pub error: String,
    /// Attempts made.
    pub attempts: u32,
}

/// JSON run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Units that produced a file.
    pub success: usize,
    /// Units skipped, any reason.
    pub skipped: usize,
    /// Units that failed after their retry budget.
    pub failed: usize,
    /// Bytes transferred.
    pub bytes: u64,
    /// Skip counts keyed by reason.
    pub skipped_by_reason: BTreeMap<String, usize>,
    /// Successful files per author.
    pub authors: BTreeMap<String, Tally>,
    /// Successful files per top-level folder.
    pub projects: BTreeMap<String, Tally>,
    /// Every failed unit.
    pub failures: Vec<FailureEntry>,
}

impl RunSummary {
    /// Aggregates unit reports.
    #[must_use]
    pub fn from_reports(reports: &[UnitReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match &report.result {
                DownloadResult::Success { bytes, .. } => {
                    summary.success += 1;
                    summary.bytes += bytes;
                    let author = report.author.clone().unwrap_or_else(|| "(unknown)".to_string());
                    add(summary.authors.entry(author).or_default(), *bytes);
                    add(summary.projects.entry(report.group.clone()).or_default(), *bytes);
                }
                DownloadResult::Skipped(reason) => {
                    summary.skipped += 1;
                    *summary
                        .skipped_by_reason
                        .entry(reason.as_str().to_string())
                        .or_default() += 1;
                }
                DownloadResult::Failed { error, attempts } => {
                    summary.failed += 1;
                    summary.failures.push(FailureEntry {
                        url: report.url.clone(),
                        book_url: report.book_url.clone(),
                        target: report.target.clone(),
                        error: error.clone(),
                        attempts: *attempts,
                    });
                }
            }
        }
        summary
    }
}

fn add(tally: &mut Tally, bytes: u64) {
    tally.files += 1;
    tally.bytes += bytes;
}

/// Writes the summary as pretty JSON, creating parent folders.
///
/// # Errors
///
/// Returns [`ExportError`] on I/O or serialization failure.
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ExportError::io(parent, e))?;
    }
    write_json_file(path, summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::orchestrator::SkipReason;
    use crate::tree::{
        BookNode, DownloadVariant, ProjectNode, ResolvedPath, TrackRef, VariantKind, VariantScope,
    };

    fn book() -> BookNode {
        let mut book = BookNode::new("https://example.com/livre-audio-gratuit-mp3/horla.html", "Le Horla");
        book.author = Some("Guy de Maupassant".to_string());
        book.reader = Some("René Depasse".to_string());
        book.tracks.push(TrackRef {
            index: 1,
            title: "Le Horla".to_string(),
            url: "https://cdn.example.com/horla.mp3".to_string(),
            page_url: None,
            duration: Some("1:02:03".to_string()),
        });
        book.variants.push(DownloadVariant {
            kind: VariantKind::Mp3,
            url: "https://cdn.example.com/horla.mp3".to_string(),
            scope: VariantScope::Track(1),
            filename: None,
        });
        book
    }

    fn report(result: DownloadResult, author: Option<&str>) -> UnitReport {
        UnitReport {
            book_url: "https://example.com/b.html".to_string(),
            book_title: "B".to_string(),
            author: author.map(String::from),
            group: "Dumas - B".to_string(),
            kind: Some(VariantKind::Mp3),
            url: "https://cdn.example.com/01.mp3".to_string(),
            target: PathBuf::from("dl/Dumas - B/01.mp3"),
            result,
        }
    }

    // ==================== Metadata File Tests ====================

    #[test]
    fn test_metadata_path_uses_folder_name() {
        assert_eq!(
            metadata_path(Path::new("dl/Maupassant - Le Horla")),
            PathBuf::from("dl/Maupassant - Le Horla/Maupassant - Le Horla.json")
        );
    }

    #[test]
    fn test_write_metadata_book() {
        let dir = TempDir::new().unwrap();
        let node = Node::Book(book());
        let path = write_metadata(dir.path(), &node, vec!["01 - Le Horla.mp3".to_string()]).unwrap();

        let written: MetadataFile =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.tool, TOOL_NAME);
        assert_eq!(written.metadata.reader.as_deref(), Some("René Depasse"));
        assert!(!written.metadata.is_collective_project);
        assert_eq!(written.tracks.len(), 1);
        assert_eq!(written.download_links[0]["kind"], "mp3");
        assert_eq!(written.downloaded_files, vec!["01 - Le Horla.mp3"]);
    }

    #[test]
    fn test_write_metadata_project_lists_children() {
        let dir = TempDir::new().unwrap();
        let mut child = book();
        child.path = Some(ResolvedPath {
            segment: "Le Horla".to_string(),
            relative: PathBuf::from("Contes/Le Horla"),
        });
        let node = Node::Project(ProjectNode {
            source_url: "https://example.com/contes.html".to_string(),
            title: "Contes".to_string(),
            author: Some("Guy de Maupassant".to_string()),
            multi_author: false,
            children: vec![Node::Book(child)],
            discovery: crate::tree::Discovery::Direct,
            cover_url: None,
            description: None,
            path: None,
        });

        let path = write_metadata(dir.path(), &node, Vec::new()).unwrap();
        let written: MetadataFile =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(written.metadata.is_collective_project);
        assert_eq!(written.children[0].folder, "Le Horla");
        assert!(written.downloaded_files.is_empty());
    }

    #[test]
    fn test_write_description_trims_and_skips_blank() {
        let dir = TempDir::new().unwrap();
        assert!(write_description(dir.path(), "   \n").unwrap().is_none());
        let path = write_description(dir.path(), "  Un conte.  ").unwrap().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "Un conte.\n");
    }

    #[test]
    fn test_write_cover_extension_from_content_type() {
        let dir = TempDir::new().unwrap();
        let path = write_cover(dir.path(), b"png", Some("image/png")).unwrap();
        assert!(path.ends_with("cover.png"));
        let path = write_cover(dir.path(), b"jpg", None).unwrap();
        assert!(path.ends_with("cover.jpg"));
    }

    // ==================== Summary Tests ====================

    #[test]
    fn test_summary_counts() {
        let reports = vec![
            report(DownloadResult::Success { attempts: 1, bytes: 100 }, Some("Dumas")),
            report(DownloadResult::Success { attempts: 3, bytes: 50 }, Some("Dumas")),
            report(DownloadResult::Skipped(SkipReason::AlreadyPresent), Some("Dumas")),
            report(
                DownloadResult::Failed {
                    error: "HTTP 503".to_string(),
                    attempts: 3,
                },
                None,
            ),
        ];
        let summary = RunSummary::from_reports(&reports);
        assert_eq!((summary.success, summary.skipped, summary.failed), (2, 1, 1));
        assert_eq!(summary.bytes, 150);
        assert_eq!(summary.authors["Dumas"], Tally { files: 2, bytes: 150 });
        assert_eq!(summary.projects["Dumas - B"].files, 2);
        assert_eq!(summary.skipped_by_reason["already_present"], 1);
        assert_eq!(summary.failures[0].attempts, 3);
    }

    #[test]
    fn test_write_summary_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("summary.json");
        write_summary(&path, &RunSummary::default()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["success"], 0);
    }
}
