//! File and folder naming helpers.
//!
//! Everything that ends up as a path component goes through
//! [`sanitize_filename`], so the same title always maps to the same name on
//! every platform.

use tracing::debug;
use url::Url;

use super::constants::MAX_NAME_CHARS;

/// Cleans a title for use as a file or folder name.
///
/// - `:` becomes `_` and `_` becomes a space
/// - `< > " / \ | ? *` and control characters are removed
/// - whitespace runs collapse to one space
/// - names longer than 180 characters are cut at the last word boundary
/// - Windows reserved device names get a trailing `_`
///
/// Returns `"untitled"` when nothing usable remains.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .filter_map(|c| match c {
            ':' => Some('_'),
            '_' => Some(' '),
            '<' | '>' | '"' | '/' | '\\' | '|' | '?' | '*' => None,
            c if c.is_control() => Some(' '),
            c => Some(c),
        })
        .collect();

    let mut collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > MAX_NAME_CHARS {
        let cut: String = collapsed.chars().take(MAX_NAME_CHARS).collect();
        collapsed = match cut.rfind(' ') {
            Some(pos) if pos > 0 => cut[..pos].to_string(),
            _ => cut,
        };
    }

    // Windows silently drops trailing dots and spaces.
    let mut cleaned = collapsed.trim_end_matches(['.', ' ']).to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return "untitled".to_string();
    }
    if is_windows_reserved_name(&cleaned) {
        cleaned.push('_');
    }
    cleaned
}

/// Returns true if the name is a Windows reserved name (CON, PRN, AUX, NUL, COM1–9, LPT1–9).
#[must_use]
pub fn is_windows_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim();
    let upper = stem.to_uppercase();
    matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || ((upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper.len() == 4
            && upper.as_bytes()[3].is_ascii_digit()
            && upper.as_bytes()[3] != b'0')
}

/// Parses a Content-Disposition header to extract the filename.
///
/// Handles:
/// - `attachment; filename="example.mp3"`
/// - `attachment; filename=example.mp3`
/// - `attachment; filename*=UTF-8''example.mp3` (RFC 5987)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();
        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Picks the cover file extension from an image Content-Type.
#[must_use]
pub fn cover_extension(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if mime.contains("png") {
        "png"
    } else if mime.contains("webp") {
        "webp"
    } else {
        "jpg"
    }
}

/// Returns the decoded last path segment of `url`, if it has one.
#[must_use]
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(
        |e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.to_string()
        },
        std::borrow::Cow::into_owned,
    );
    Some(decoded)
}

/// Lowercased extension of `name` (without the dot), if any.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== sanitize_filename Tests ====================

    #[test]
    fn test_sanitize_filename_colon_and_underscore() {
        assert_eq!(
            sanitize_filename("Tome 1: Les_Trois Mousquetaires"),
            "Tome 1_ Les Trois Mousquetaires"
        );
    }

    #[test]
    fn test_sanitize_filename_strips_forbidden_chars() {
        assert_eq!(sanitize_filename(r#"Qui? <Moi> "a/b\c" | *"#), "Qui Moi abc");
    }

    #[test]
    fn test_sanitize_filename_collapses_whitespace() {
        assert_eq!(sanitize_filename("  Le   Comte \t de\nMonte-Cristo "), "Le Comte de Monte-Cristo");
    }

    #[test]
    fn test_sanitize_filename_empty_is_untitled() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("???"), "untitled");
        assert_eq!(sanitize_filename(".."), "untitled");
    }

    #[test]
    fn test_sanitize_filename_truncates_on_word_boundary() {
        let long = "mot ".repeat(100);
        let out = sanitize_filename(&long);
        assert!(out.chars().count() <= MAX_NAME_CHARS);
        assert!(out.ends_with("mot"));
    }

    #[test]
    fn test_sanitize_filename_reserved_names() {
        assert_eq!(sanitize_filename("CON"), "CON_");
        assert_eq!(sanitize_filename("com3"), "com3_");
        assert_eq!(sanitize_filename("Console"), "Console");
    }

    #[test]
    fn test_sanitize_filename_trailing_dots() {
        assert_eq!(sanitize_filename("Vingt mille lieues..."), "Vingt mille lieues");
    }

    // ==================== Content-Disposition Tests ====================

    #[test]
    fn test_parse_content_disposition_quoted() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="01 - Chapitre.mp3""#),
            Some("01 - Chapitre.mp3".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_unquoted() {
        assert_eq!(
            parse_content_disposition("attachment; filename=book.zip; size=3"),
            Some("book.zip".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_rfc5987() {
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''Le%20Horla.mp3"),
            Some("Le Horla.mp3".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_missing() {
        assert_eq!(parse_content_disposition("inline"), None);
    }

    // ==================== URL / Extension Tests ====================

    #[test]
    fn test_url_file_name_decodes() {
        assert_eq!(
            url_file_name("https://example.com/a/Le%20Horla.mp3?x=1"),
            Some("Le Horla.mp3".to_string())
        );
        assert_eq!(url_file_name("https://example.com/"), None);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("track.MP3"), Some("mp3".to_string()));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("weird.a b"), None);
    }

    #[test]
    fn test_cover_extension() {
        assert_eq!(cover_extension(Some("image/png")), "png");
        assert_eq!(cover_extension(Some("image/webp; q=1")), "webp");
        assert_eq!(cover_extension(Some("image/jpeg")), "jpg");
        assert_eq!(cover_extension(None), "jpg");
    }
}
