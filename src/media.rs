//! Post-download media handling: ID3 tagging and ZIP extraction.
//!
//! Both operations are blocking file work and run on the blocking pool.
//! Callers treat every [`MediaError`] as non-fatal: the transfer that
//! produced the file already succeeded.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use id3::frame::{Picture, PictureType};
use id3::{Tag, TagLike, Version};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from tagging or extraction.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The ID3 tag could not be read or written.
    #[error("failed to tag {}: {source}", path.display())]
    Tag {
        /// Audio file.
        path: PathBuf,
        /// Tag library error.
        #[source]
        source: id3::Error,
    },

    /// The archive is unreadable.
    #[error("failed to read archive {}: {source}", path.display())]
    Archive {
        /// Archive file.
        path: PathBuf,
        /// Archive library error.
        #[source]
        source: zip::result::ZipError,
    },

    /// A file could not be created, copied or removed.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The blocking task did not complete.
    #[error("media task failed: {message}")]
    Task {
        /// Join error text.
        message: String,
    },
}

impl MediaError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Front cover to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
    /// Image bytes.
    pub data: Vec<u8>,
}

/// Fields written into a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFields {
    /// `TIT2`: track (or work) title.
    pub title: Option<String>,
    /// `TPE1`: narrator.
    pub artist: Option<String>,
    /// `TCOM`: author.
    pub composer: Option<String>,
    /// `TALB`: work title.
    pub album: Option<String>,
    /// `TRCK`: track number.
    pub track: Option<u32>,
    /// `APIC`: front cover.
    pub cover: Option<CoverImage>,
}

/// Writes `fields` into the ID3v2.4 tag of `path`, keeping other frames.
///
/// # Errors
///
/// Returns [`MediaError::Tag`] if the file cannot be tagged.
pub fn tag_file(path: &Path, fields: &TagFields) -> Result<(), MediaError> {
    let mut tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Tag::new(),
        Err(source) => {
            return Err(MediaError::Tag {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if let Some(title) = &fields.title {
        tag.set_title(title.as_str());
    }
    if let Some(artist) = &fields.artist {
        tag.set_artist(artist.as_str());
    }
    if let Some(composer) = &fields.composer {
        tag.set_text("TCOM", composer.as_str());
    }
    if let Some(album) = &fields.album {
        tag.set_album(album.as_str());
    }
    if let Some(track) = fields.track {
        tag.set_track(track);
    }
    if let Some(cover) = &fields.cover {
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type: cover.mime_type.clone(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: cover.data.clone(),
        });
    }

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|source| MediaError::Tag {
            path: path.to_path_buf(),
            source,
        })
}

/// [`tag_file`] on the blocking pool.
///
/// # Errors
///
/// Returns the tagging error, or [`MediaError::Task`] if the task panicked.
#[instrument(skip(fields), fields(path = %path.display()))]
pub async fn tag_audio(path: PathBuf, fields: TagFields) -> Result<(), MediaError> {
    tokio::task::spawn_blocking(move || tag_file(&path, &fields))
        .await
        .map_err(|e| MediaError::Task {
            message: e.to_string(),
        })?
}

/// Extracts `zip_path` into `dest`, skipping entries that would escape it.
///
/// Returns the extracted file paths in archive order.
///
/// # Errors
///
/// Returns [`MediaError`] if the archive is unreadable or a file cannot be
/// written.
pub fn extract_zip(zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let file = File::open(zip_path).map_err(|e| MediaError::io(zip_path, e))?;
    let archive_error = |source| MediaError::Archive {
        path: zip_path.to_path_buf(),
        source,
    };
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;
        let Some(safe_path) = entry.enclosed_name() else {
            debug!(entry = entry.name(), "skipping archive entry outside destination");
            continue;
        };
        let out_path = dest.join(safe_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| MediaError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| MediaError::io(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| MediaError::io(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| MediaError::io(&out_path, e))?;
        extracted.push(out_path);
    }
    Ok(extracted)
}

/// Extracts `zip_path` into `dest` on the blocking pool, then removes the archive.
///
/// # Errors
///
/// Returns the extraction error; the archive is kept in that case.
#[instrument(fields(zip = %zip_path.display(), dest = %dest.display()))]
pub async fn extract_archive(zip_path: PathBuf, dest: PathBuf) -> Result<Vec<PathBuf>, MediaError> {
    tokio::task::spawn_blocking(move || {
        let files = extract_zip(&zip_path, &dest)?;
        fs::remove_file(&zip_path).map_err(|e| MediaError::io(&zip_path, e))?;
        debug!(files = files.len(), "archive extracted and removed");
        Ok(files)
    })
    .await
    .map_err(|e| MediaError::Task {
        message: e.to_string(),
    })?
}
