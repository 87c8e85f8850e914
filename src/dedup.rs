//! Run-wide duplicate tracking.
//!
//! [`DedupRegistry`] maps every target file to a [`DedupState`]. Workers
//! never read and write the state separately: [`DedupRegistry::claim`] is
//! one critical section that either hands the path to the caller (now
//! `Pending`) or says why not. [`DedupRegistry::settle`] records the outcome.
//!
//! The registry also remembers which folder each book source URL was
//! materialised in, so a book met twice in a run can be aliased instead of
//! downloaded again.

use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, warn};

use crate::page::extract::normalize_page_url;

/// Extensions that count as existing audio content.
pub const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "m4a", "ogg", "opus", "flac", "wav", "zip"];

/// Suffix of the note written where a symlink cannot be created.
pub const REDIRECT_SUFFIX: &str = ".redirect.txt";

/// State of one target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupState {
    /// Holds downloaded audio.
    Present,
    /// Nothing there (or the last attempt failed).
    Absent,
    /// A worker is transferring to it.
    Pending,
}

/// Answer to a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the path until it settles it.
    Claimed,
    /// Audio already there; skip.
    AlreadyPresent,
    /// Another worker is on it; skip.
    InFlight,
}

/// Shared path registry.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    paths: DashMap<PathBuf, DedupState>,
    books: DashMap<String, PathBuf>,
}

impl DedupRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks `path` and claims it when free.
    ///
    /// With `skip_existing`, a path already `Present` (or holding an audio
    /// file on disk) is not claimed. A `Pending` path is never claimed twice.
    pub fn claim(&self, path: &Path, skip_existing: bool) -> Claim {
        match self.paths.entry(normalize_key(path)) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                match current {
                    DedupState::Pending => Claim::InFlight,
                    DedupState::Present if skip_existing => Claim::AlreadyPresent,
                    DedupState::Present | DedupState::Absent => {
                        if skip_existing && has_audio_file(path) {
                            entry.insert(DedupState::Present);
                            return Claim::AlreadyPresent;
                        }
                        entry.insert(DedupState::Pending);
                        Claim::Claimed
                    }
                }
            }
            Entry::Vacant(entry) => {
                if skip_existing && has_audio_file(path) {
                    debug!(path = %path.display(), "audio already on disk");
                    entry.insert(DedupState::Present);
                    Claim::AlreadyPresent
                } else {
                    entry.insert(DedupState::Pending);
                    Claim::Claimed
                }
            }
        }
    }

    /// Records the outcome of a claimed transfer.
    pub fn settle(&self, path: &Path, success: bool) {
        let state = if success {
            DedupState::Present
        } else {
            DedupState::Absent
        };
        self.paths.insert(normalize_key(path), state);
    }

    /// Current state of `path`, if it was ever claimed or probed.
    #[must_use]
    pub fn state(&self, path: &Path) -> Option<DedupState> {
        self.paths.get(&normalize_key(path)).map(|s| *s)
    }

    /// Registers `folder` for the book at `source_url`.
    ///
    /// Returns the folder registered earlier for the same book, if it is a
    /// different one.
    pub fn register_book(&self, source_url: &str, folder: &Path) -> Option<PathBuf> {
        match self.books.entry(normalize_page_url(source_url)) {
            Entry::Occupied(entry) if entry.get() != folder => Some(entry.get().clone()),
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(folder.to_path_buf());
                None
            }
        }
    }
}

/// True when `path` is a non-empty file with an audio (or archive) extension.
#[must_use]
pub fn has_audio_file(path: &Path) -> bool {
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    supported && std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn normalize_key(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// How a duplicate folder was aliased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    /// Relative symbolic link.
    Symlink,
    /// Text note naming the target.
    RedirectNote,
}

/// Makes `link` point at `target` (both absolute or both relative to the
/// same root): a relative symlink where supported, else a
/// `<link>.redirect.txt` note.
///
/// # Errors
///
/// Returns the IO error when neither form can be written.
pub fn create_shortcut(target: &Path, link: &Path) -> std::io::Result<Shortcut> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let relative = relative_path(link.parent().unwrap_or(Path::new("")), target);

    #[cfg(unix)]
    {
        if !link.exists() {
            match std::os::unix::fs::symlink(&relative, link) {
                Ok(()) => return Ok(Shortcut::Symlink),
                Err(e) => warn!(link = %link.display(), error = %e, "symlink failed, writing note"),
            }
        }
    }

    let mut note = link.as_os_str().to_owned();
    note.push(REDIRECT_SUFFIX);
    let absolute = std::path::absolute(target).unwrap_or_else(|_| target.to_path_buf());
    std::fs::write(
        PathBuf::from(note),
        format!(
            "Already downloaded to:\n{}\n{}\n",
            relative.display(),
            absolute.display()
        ),
    )?;
    Ok(Shortcut::RedirectNote)
}

/// Path of `to` as seen from directory `from`.
#[must_use]
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_claim_then_settle() {
        let registry = DedupRegistry::new();
        let path = Path::new("dl/Book/01.mp3");
        assert_eq!(registry.claim(path, true), Claim::Claimed);
        assert_eq!(registry.state(path), Some(DedupState::Pending));
        assert_eq!(registry.claim(Path::new("./dl/Book/01.mp3"), true), Claim::InFlight);

        registry.settle(path, true);
        assert_eq!(registry.claim(path, true), Claim::AlreadyPresent);
        assert_eq!(registry.claim(path, false), Claim::Claimed);
    }

    #[test]
    fn test_failed_transfer_can_be_reclaimed() {
        let registry = DedupRegistry::new();
        let path = Path::new("dl/x.mp3");
        assert_eq!(registry.claim(path, true), Claim::Claimed);
        registry.settle(path, false);
        assert_eq!(registry.state(path), Some(DedupState::Absent));
        assert_eq!(registry.claim(path, true), Claim::Claimed);
    }

    #[test]
    fn test_existing_file_is_present_only_when_skipping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("01.mp3");
        std::fs::write(&path, b"ID3").unwrap();

        let registry = DedupRegistry::new();
        assert_eq!(registry.claim(&path, true), Claim::AlreadyPresent);
        assert_eq!(registry.state(&path), Some(DedupState::Present));

        let registry = DedupRegistry::new();
        assert_eq!(registry.claim(&path, false), Claim::Claimed);
    }

    #[test]
    fn test_has_audio_file_checks_extension_and_size() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("notes.txt");
        let empty = dir.path().join("empty.mp3");
        let audio = dir.path().join("a.FLAC");
        std::fs::write(&text, b"x").unwrap();
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&audio, b"x").unwrap();
        assert!(!has_audio_file(&text));
        assert!(!has_audio_file(&empty));
        assert!(has_audio_file(&audio));
        assert!(!has_audio_file(&dir.path().join("missing.mp3")));
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let registry = Arc::new(DedupRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.claim(Path::new("dl/same.mp3"), true)
            }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() == Claim::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_register_book_returns_first_folder() {
        let registry = DedupRegistry::new();
        let url = "https://example.com/livre-audio-gratuit-mp3/horla.html";
        assert_eq!(registry.register_book(url, Path::new("dl/A/Horla")), None);
        assert_eq!(registry.register_book(url, Path::new("dl/A/Horla")), None);
        assert_eq!(
            registry.register_book(&format!("{url}#x"), Path::new("dl/B/Horla")),
            Some(PathBuf::from("dl/A/Horla"))
        );
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("dl/B"), Path::new("dl/A/Horla")),
            PathBuf::from("../A/Horla")
        );
        assert_eq!(
            relative_path(Path::new("dl"), Path::new("dl/A")),
            PathBuf::from("A")
        );
    }

    #[test]
    fn test_create_shortcut() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("A").join("Horla");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("01.mp3"), b"x").unwrap();
        let link = dir.path().join("B").join("Horla");

        let kind = create_shortcut(&target, &link).unwrap();
        match kind {
            Shortcut::Symlink => assert!(link.join("01.mp3").exists()),
            Shortcut::RedirectNote => {
                let note = dir.path().join("B").join(format!("Horla{REDIRECT_SUFFIX}"));
                assert!(std::fs::read_to_string(note).unwrap().contains("Horla"));
            }
        }
    }
}
