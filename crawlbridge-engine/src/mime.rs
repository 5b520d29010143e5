//! Mimetype policy: extension mapping, validity, and size ceilings.
//!
//! The platform's full mimetype table is a collaborator; the crawler only
//! needs the lookup surface, expressed as the [`MimePolicy`] trait with a
//! built-in table covering the common document types.

use std::collections::HashMap;

/// Mimetype lookup consumed by the pipeline: what a file extension maps
/// to, whether a mimetype can be processed at all, and the largest binary
/// worth transmitting for it.
pub trait MimePolicy: Send + Sync {
    /// Mimetype for a bare file extension; empty when unknown.
    fn mime_type_for_extension(&self, extension: &str) -> String;

    /// Can this mimetype be processed at all?
    fn is_valid(&self, mime_type: &str) -> bool;

    /// Maximum binary size in bytes to transmit for this mimetype.
    fn max_size_in_bytes(&self, mime_type: &str) -> i64;
}

/// Extracts the file extension from a URL or path, without the dot,
/// lower-cased. Query strings and fragments are ignored; a very short
/// URL is treated as a bare extension.
pub fn file_extension(url: &str) -> String {
    if let Some(colon) = url.find("://") {
        if url[colon + 3..].find('/').is_none() {
            return String::new();
        }
    }

    let mut clean = url;
    if let Some((head, _)) = clean.split_once('#') {
        clean = head;
    }
    if let Some((head, _)) = clean.split_once('?') {
        clean = head;
    }
    let clean = clean.trim();

    let dot = clean.rfind('.');
    let sep = clean.rfind(['/', '\\']);
    match (dot, sep) {
        (Some(d), s) if d > 0 && s.map_or(true, |s| d > s) && d + 1 < clean.len() => {
            clean[d + 1..].to_lowercase().trim().to_string()
        }
        _ if url.len() <= 5 => url.to_lowercase().trim().to_string(),
        _ => String::new(),
    }
}

/// Built-in mimetype table for the common document types.
pub struct StandardMimePolicy {
    by_extension: HashMap<&'static str, &'static str>,
    max_sizes: HashMap<&'static str, i64>,
    default_max_size: i64,
}

const DEFAULT_MAX_SIZE: i64 = 50 * 1024 * 1024;

impl Default for StandardMimePolicy {
    fn default() -> Self {
        let by_extension = HashMap::from([
            ("txt", "text/plain"),
            ("md", "text/markdown"),
            ("csv", "text/csv"),
            ("html", "text/html"),
            ("htm", "text/html"),
            ("xml", "application/xml"),
            ("json", "application/json"),
            ("pdf", "application/pdf"),
            ("rtf", "application/rtf"),
            ("doc", "application/msword"),
            (
                "docx",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ),
            ("xls", "application/vnd.ms-excel"),
            (
                "xlsx",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            ("ppt", "application/vnd.ms-powerpoint"),
            (
                "pptx",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            ),
            ("odt", "application/vnd.oasis.opendocument.text"),
            ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
            ("odp", "application/vnd.oasis.opendocument.presentation"),
            ("msg", "application/vnd.ms-outlook"),
            ("eml", "message/rfc822"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png", "image/png"),
            ("gif", "image/gif"),
            ("tif", "image/tiff"),
            ("tiff", "image/tiff"),
            ("bmp", "image/bmp"),
            ("zip", "application/zip"),
        ]);
        let max_sizes = HashMap::from([
            ("application/zip", 250 * 1024 * 1024i64),
            ("application/pdf", 100 * 1024 * 1024i64),
        ]);
        Self {
            by_extension,
            max_sizes,
            default_max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl MimePolicy for StandardMimePolicy {
    fn mime_type_for_extension(&self, extension: &str) -> String {
        self.by_extension
            .get(extension.trim().to_lowercase().as_str())
            .map(|m| m.to_string())
            .unwrap_or_default()
    }

    fn is_valid(&self, mime_type: &str) -> bool {
        let trimmed = mime_type.trim();
        !trimmed.is_empty() && self.by_extension.values().any(|m| *m == trimmed)
    }

    fn max_size_in_bytes(&self, mime_type: &str) -> i64 {
        self.max_sizes
            .get(mime_type.trim())
            .copied()
            .unwrap_or(self.default_max_size)
    }
}
