//! Local PDF input. Validates the path, names the document, and extracts plain text on request.

use crate::model::{BodyKind, BodyStatus, ContentRecord};
use crate::source::error::AcquireError;
use crate::source::{ContentSource, InputKind};
use std::panic::{self, UnwindSafe};
use std::path::{Path, PathBuf};

pub const DEFAULT_AUTHOR: &str = "PDF Conversion";

const EXTRACTION_FAILED_NOTICE: &str =
    "Failed to extract text from this PDF. Convert it with an external converter to keep its content.";

/// Caller-supplied overrides for a local document.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Title; defaults to the file stem.
    pub title: Option<String>,
    /// Author; defaults to [DEFAULT_AUTHOR].
    pub author: Option<String>,
    /// Extract the text layer. Not needed when an external converter reads the PDF itself.
    pub extract_text: bool,
}

/// A PDF on the local file system.
pub struct LocalDocument {
    path: PathBuf,
    options: DocumentOptions,
}

impl LocalDocument {
    pub fn new(path: impl Into<PathBuf>, options: DocumentOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for LocalDocument {
    fn kind(&self) -> InputKind {
        InputKind::Document
    }

    fn acquire(&mut self) -> Result<ContentRecord, AcquireError> {
        validate_document(&self.path)?;
        tracing::info!(path = %self.path.display(), "Reading PDF");

        let title = self
            .options
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| file_stem(&self.path));
        let author = self
            .options
            .author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AUTHOR)
            .to_string();

        let (body, body_status) = if self.options.extract_text {
            let text = extract_text(&self.path);
            let status = if text.trim().is_empty() {
                BodyStatus::EmptyContainer
            } else {
                BodyStatus::Found
            };
            (text, status)
        } else {
            (String::new(), BodyStatus::Deferred)
        };

        Ok(ContentRecord {
            title,
            author,
            published_at: None,
            body,
            body_kind: BodyKind::PlainText,
            body_status,
            source: self.path.display().to_string(),
            image_urls: Vec::new(),
        })
    }
}

/// Path must exist, be a regular file, and end in `.pdf` (any case).
pub fn validate_document(path: &Path) -> Result<(), AcquireError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AcquireError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            AcquireError::FileAccess {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !meta.is_file() {
        return Err(AcquireError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(AcquireError::UnsupportedExtension {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Document".to_string())
}

/// Best-effort text layer extraction. Failure yields a notice instead of an error.
pub(crate) fn extract_text(path: &Path) -> String {
    extract_guarded(path, |p| pdf_extract::extract_text(p))
}

/// pdf-extract panics on some fonts and encodings it does not support; treat that as a failure.
fn extract_guarded<E, F>(path: &Path, extract: F) -> String
where
    E: std::fmt::Display,
    F: FnOnce(&Path) -> Result<String, E> + UnwindSafe,
{
    match panic::catch_unwind(|| extract(path)) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(path = %path.display(), "Failed to extract text from PDF: {}", e);
            EXTRACTION_FAILED_NOTICE.to_string()
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown error".to_string());
            tracing::warn!(path = %path.display(), "PDF text extraction aborted: {}", reason);
            EXTRACTION_FAILED_NOTICE.to_string()
        }
    }
}
