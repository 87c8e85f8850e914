//! Checks an output folder against the JSON metadata written beside it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::export::{MetadataFile, TOOL_NAME};
use crate::pipeline::ProcessExit;

/// Verification could not run.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The folder does not exist.
    #[error("{} does not exist or is not a directory", path.display())]
    MissingRoot {
        /// Requested folder.
        path: PathBuf,
    },
}

/// A book with fewer MP3 files than tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteBook {
    /// Book folder.
    pub folder: PathBuf,
    /// Tracks listed in the JSON.
    pub expected_tracks: usize,
    /// MP3 files found in the folder.
    pub mp3_files: usize,
}

/// Result of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Metadata files checked.
    pub checked: usize,
    /// Listed files that are not on disk.
    pub missing_files: Vec<PathBuf>,
    /// Books missing tracks.
    pub incomplete_books: Vec<IncompleteBook>,
}

impl VerifyReport {
    /// Nothing is missing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.incomplete_books.is_empty()
    }

    /// [`ProcessExit::Failure`] when anything is missing.
    #[must_use]
    pub fn exit(&self) -> ProcessExit {
        if self.is_clean() {
            ProcessExit::Success
        } else {
            ProcessExit::Failure
        }
    }
}

/// Scans `root` for metadata files and checks each one.
///
/// # Errors
///
/// Returns [`VerifyError::MissingRoot`] if `root` is not a directory.
#[instrument(fields(root = %root.display()))]
pub fn verify_dir(root: &Path) -> Result<VerifyReport, VerifyError> {
    if !root.is_dir() {
        return Err(VerifyError::MissingRoot {
            path: root.to_path_buf(),
        });
    }

    let mut report = VerifyReport::default();
    for json_path in files_below(root, |p| has_extension(p, "json")) {
        let Some(metadata) = read_metadata(&json_path) else {
            continue;
        };
        let Some(folder) = json_path.parent() else {
            continue;
        };
        report.checked += 1;
        check_book(folder, &metadata, &mut report);
    }

    if report.checked == 0 {
        warn!("no metadata files found");
    }
    info!(
        checked = report.checked,
        missing = report.missing_files.len(),
        incomplete = report.incomplete_books.len(),
        "verification complete"
    );
    Ok(report)
}

fn read_metadata(path: &Path) -> Option<MetadataFile> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable metadata file");
            return None;
        }
    };
    match serde_json::from_str::<MetadataFile>(&text) {
        Ok(metadata) if metadata.tool == TOOL_NAME => Some(metadata),
        Ok(_) | Err(_) => {
            debug!(path = %path.display(), "not a metadata file, skipped");
            None
        }
    }
}

fn check_book(folder: &Path, metadata: &MetadataFile, report: &mut VerifyReport) {
    for name in &metadata.downloaded_files {
        let path = folder.join(name);
        if !path.exists() {
            warn!(path = %path.display(), "listed file missing");
            report.missing_files.push(path);
        }
    }

    let zip_only = metadata
        .downloaded_files
        .iter()
        .all(|name| has_extension(Path::new(name), "zip"));
    if metadata.tracks.is_empty() || metadata.downloaded_files.is_empty() || zip_only {
        return;
    }

    let mp3_files = files_below(folder, |p| has_extension(p, "mp3")).len();
    if mp3_files < metadata.tracks.len() {
        warn!(
            folder = %folder.display(),
            expected = metadata.tracks.len(),
            found = mp3_files,
            "book is missing tracks"
        );
        report.incomplete_books.push(IncompleteBook {
            folder: folder.to_path_buf(),
            expected_tracks: metadata.tracks.len(),
            mp3_files,
        });
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Regular files below `root` matching `keep`, sorted. Symlinked folders
/// (duplicate aliases) are not followed.
fn files_below(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %dir.display(), error = %error, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(error = %error, "skipping unreadable directory entry");
                    continue;
                }
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && keep(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::export::NodeMetadata;

    fn write_json(folder: &Path, tracks: usize, files: &[&str]) {
        fs::create_dir_all(folder).unwrap();
        let metadata = MetadataFile {
            tool: TOOL_NAME.to_string(),
            version: "0.0.0".to_string(),
            source_url: "https://example.com/b.html".to_string(),
            metadata: NodeMetadata::default(),
            download_links: Vec::new(),
            tracks: (0..tracks).map(|i| serde_json::json!({ "index": i + 1 })).collect(),
            children: Vec::new(),
            downloaded_files: files.iter().map(|f| (*f).to_string()).collect(),
        };
        fs::write(
            crate::export::metadata_path(folder),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_verify_clean_folder() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("Dumas - Livre");
        write_json(&book, 2, &["01.mp3", "02.mp3"]);
        fs::write(book.join("01.mp3"), b"a").unwrap();
        fs::write(book.join("02.mp3"), b"b").unwrap();

        let report = verify_dir(dir.path()).unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.is_clean());
        assert_eq!(report.exit(), ProcessExit::Success);
    }

    #[test]
    fn test_verify_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("Livre");
        write_json(&book, 0, &["livre.zip"]);

        let report = verify_dir(dir.path()).unwrap();
        assert_eq!(report.missing_files, vec![book.join("livre.zip")]);
        assert_eq!(report.exit(), ProcessExit::Failure);
    }

    #[test]
    fn test_verify_reports_missing_tracks() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("Livre");
        write_json(&book, 3, &["01.mp3"]);
        fs::write(book.join("01.mp3"), b"a").unwrap();

        let report = verify_dir(dir.path()).unwrap();
        assert!(report.missing_files.is_empty());
        assert_eq!(report.incomplete_books[0].expected_tracks, 3);
        assert_eq!(report.incomplete_books[0].mp3_files, 1);
    }

    #[test]
    fn test_verify_zip_only_book_not_counted() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("Livre");
        write_json(&book, 5, &["livre.zip"]);
        fs::write(book.join("livre.zip"), b"z").unwrap();
        assert!(verify_dir(dir.path()).unwrap().is_clean());
    }

    #[test]
    fn test_verify_ignores_foreign_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("summary.json"), r#"{"success": 1}"#).unwrap();
        let report = verify_dir(dir.path()).unwrap();
        assert_eq!(report.checked, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_verify_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            verify_dir(&dir.path().join("nope")),
            Err(VerifyError::MissingRoot { .. })
        ));
    }
}
