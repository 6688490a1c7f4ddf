//! Content acquisition. Remote Substack article or local PDF, both producing a [ContentRecord].

mod client;
mod error;

pub mod document;
pub mod substack;

pub use client::{Fetch, FetchError, Fetched, HttpClient, HttpClientBuilder};
pub use document::{DocumentOptions, LocalDocument};
pub use error::AcquireError;
pub use substack::RemoteArticle;

use crate::model::{BodyKind, ContentRecord};

/// Which kind of input a record came from. Drives strategy selection in conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Article,
    Document,
}

/// How to handle a record whose body came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyBodyBehavior {
    /// Log a warning and keep the empty body (default).
    #[default]
    Warn,
    /// Replace the body with a short notice.
    Placeholder,
    /// Fail the run.
    Fail,
}

const EMPTY_BODY_PLACEHOLDER: &str = "No article content could be extracted from this page.";

/// Source of one document per run.
pub trait ContentSource {
    fn kind(&self) -> InputKind;

    fn acquire(&mut self) -> Result<ContentRecord, AcquireError>;
}

/// Apply the empty-body policy to a freshly acquired record.
///
/// Records with content pass through unchanged whatever the behavior.
pub fn check_body(
    mut record: ContentRecord,
    behavior: EmptyBodyBehavior,
) -> Result<ContentRecord, AcquireError> {
    if !record.body_status.is_empty() {
        return Ok(record);
    }
    match behavior {
        EmptyBodyBehavior::Warn => {
            tracing::warn!(
                status = ?record.body_status,
                source = %record.source,
                "No body content found; the e-book will only contain the header"
            );
        }
        EmptyBodyBehavior::Placeholder => {
            record.body = match record.body_kind {
                BodyKind::Markup => format!("<p>{}</p>", EMPTY_BODY_PLACEHOLDER),
                BodyKind::PlainText => EMPTY_BODY_PLACEHOLDER.to_string(),
            };
        }
        EmptyBodyBehavior::Fail => {
            return Err(AcquireError::EmptyBody {
                status: record.body_status,
                source_ref: record.source.clone(),
            });
        }
    }
    Ok(record)
}
