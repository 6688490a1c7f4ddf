//! Data passed between pipeline stages: the acquired content and the converted file.

use crate::convert::{ImageReport, OutputFormat, Strategy};
use chrono::{DateTime, FixedOffset};
use std::path::PathBuf;

/// Whether `ContentRecord::body` holds markup (scraped page) or plain text (extracted document).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Markup,
    PlainText,
}

/// How the body was found during acquisition.
///
/// An empty body is not an error by itself; callers decide via
/// [EmptyBodyBehavior](crate::source::EmptyBodyBehavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStatus {
    /// A body container matched and has content.
    Found,
    /// A body container matched but holds nothing but whitespace.
    EmptyContainer,
    /// None of the body container selectors matched.
    NoContainer,
    /// Not read during acquisition; a document's text is left to the converter
    /// and extracted later only if a fallback needs it.
    Deferred,
}

impl BodyStatus {
    pub fn is_empty(self) -> bool {
        matches!(self, BodyStatus::EmptyContainer | BodyStatus::NoContainer)
    }
}

/// Normalized content produced once per run by a [ContentSource](crate::source::ContentSource).
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub title: String,
    pub author: String,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub body: String,
    pub body_kind: BodyKind,
    pub body_status: BodyStatus,
    /// Original URL or file path.
    pub source: String,
    /// Remote image URLs in order of first appearance in the body. Duplicates are kept.
    pub image_urls: Vec<String>,
}

impl ContentRecord {
    /// Publish date as shown in the e-book header, e.g. "March 4, 2024".
    pub fn published_label(&self) -> Option<String> {
        self.published_at
            .as_ref()
            .map(|d| d.format("%B %-d, %Y").to_string())
    }
}

/// Result of the conversion stage. The file at `path` belongs to the pipeline until cleanup.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub path: PathBuf,
    pub title: String,
    pub author: String,
    pub format: OutputFormat,
    pub strategy: Strategy,
    pub images: ImageReport,
}

impl ConversionOutcome {
    /// Base name of the output file, used as the attachment file name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("book.{}", self.format.extension()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ContentRecord {
        ContentRecord {
            title: "On Writing".to_string(),
            author: "someone".to_string(),
            published_at: None,
            body: "<p>Hello</p>".to_string(),
            body_kind: BodyKind::Markup,
            body_status: BodyStatus::Found,
            source: "https://someone.substack.com/p/on-writing".to_string(),
            image_urls: Vec::new(),
        }
    }

    #[test]
    fn published_label_formats_month_day_year() {
        let mut r = record();
        r.published_at = DateTime::parse_from_rfc3339("2024-03-04T09:30:00Z").ok();
        assert_eq!(r.published_label().as_deref(), Some("March 4, 2024"));
    }

    #[test]
    fn published_label_absent_without_date() {
        assert!(record().published_label().is_none());
    }

    #[test]
    fn body_status_emptiness() {
        assert!(!BodyStatus::Found.is_empty());
        assert!(BodyStatus::EmptyContainer.is_empty());
        assert!(BodyStatus::NoContainer.is_empty());
        assert!(!BodyStatus::Deferred.is_empty());
    }

    #[test]
    fn outcome_file_name_is_base_name() {
        let outcome = ConversionOutcome {
            path: PathBuf::from("/tmp/run/On Writing - someone.epub"),
            title: "On Writing".to_string(),
            author: "someone".to_string(),
            format: OutputFormat::Epub,
            strategy: Strategy::Direct,
            images: ImageReport::default(),
        };
        assert_eq!(outcome.file_name(), "On Writing - someone.epub");
    }
}
