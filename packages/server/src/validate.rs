//! Upload validation.
//!
//! Every check runs on every file and all failures are reported together, so
//! a client fixing a rejected batch sees everything wrong with it at once.

use common::MediaType;
use common::storage::ContentHash;
use serde::Serialize;

/// 499.9 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 524_182_323;

pub const MAX_FILES_PER_UPLOAD: usize = 10;

const ALLOWED_TYPES: &[(&str, MediaType)] = &[
    ("image/jpeg", MediaType::Image),
    ("image/png", MediaType::Image),
    ("image/gif", MediaType::Image),
    ("video/mp4", MediaType::Video),
    ("video/quicktime", MediaType::Video),
    ("video/x-matroska", MediaType::Video),
];

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "mp4", "mov", "mkv"];

/// One reason one file was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// Empty for batch-level failures.
    pub filename: String,
    /// Which property failed: `content_type`, `extension`, `size`, `filename`,
    /// `count` or `body`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn new(filename: &str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            field,
            message: message.into(),
        }
    }
}

/// What the ingest path knows about a file before validation.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_hash: ContentHash,
}

impl UploadCandidate {
    pub fn from_bytes(filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            content_hash: ContentHash::compute(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub content_hash: ContentHash,
    pub media_type: MediaType,
    pub size_bytes: u64,
    pub content_type: String,
    pub filename: String,
}

fn normalized_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn media_type_for(content_type: &str) -> Option<MediaType> {
    let mime = normalized_mime(content_type);
    ALLOWED_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == mime)
        .map(|(_, media_type)| *media_type)
}

fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    (!stem.is_empty()).then(|| ext.to_ascii_lowercase())
}

fn check_filename(filename: &str) -> Option<&'static str> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Some("filename cannot be empty");
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Some("control characters are not allowed in filenames");
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Some("path separators are not allowed in filenames");
    }
    if trimmed.starts_with('.') {
        return Some("hidden files are not allowed");
    }
    None
}

/// Validate one file. Pure.
pub fn validate_upload(candidate: &UploadCandidate) -> Result<ValidatedUpload, Vec<ValidationFailure>> {
    let name = candidate.filename.as_str();
    let mut failures = Vec::new();

    if let Some(message) = check_filename(name) {
        failures.push(ValidationFailure::new(name, "filename", message));
    }

    let media_type = media_type_for(&candidate.content_type);
    if media_type.is_none() {
        failures.push(ValidationFailure::new(
            name,
            "content_type",
            format!("content type '{}' is not accepted", candidate.content_type),
        ));
    }

    match extension(name) {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        Some(ext) => failures.push(ValidationFailure::new(
            name,
            "extension",
            format!("extension '.{ext}' is not accepted"),
        )),
        None => failures.push(ValidationFailure::new(
            name,
            "extension",
            "file has no extension",
        )),
    }

    if candidate.size_bytes > MAX_UPLOAD_BYTES {
        failures.push(ValidationFailure::new(
            name,
            "size",
            format!(
                "file is {} bytes, the limit is {MAX_UPLOAD_BYTES}",
                candidate.size_bytes
            ),
        ));
    }

    match media_type {
        Some(media_type) if failures.is_empty() => Ok(ValidatedUpload {
            content_hash: candidate.content_hash,
            media_type,
            size_bytes: candidate.size_bytes,
            content_type: normalized_mime(&candidate.content_type),
            filename: name.trim().to_string(),
        }),
        _ => Err(failures),
    }
}

/// Validate a whole upload request; every failure of every file is returned.
pub fn validate_batch(
    candidates: &[UploadCandidate],
) -> Result<Vec<ValidatedUpload>, Vec<ValidationFailure>> {
    let mut failures = Vec::new();
    if candidates.is_empty() || candidates.len() > MAX_FILES_PER_UPLOAD {
        failures.push(ValidationFailure::new(
            "",
            "count",
            format!(
                "between 1 and {MAX_FILES_PER_UPLOAD} files per upload, got {}",
                candidates.len()
            ),
        ));
    }

    let mut accepted = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match validate_upload(candidate) {
            Ok(v) => accepted.push(v),
            Err(mut f) => failures.append(&mut f),
        }
    }

    if failures.is_empty() {
        Ok(accepted)
    } else {
        Err(failures)
    }
}
