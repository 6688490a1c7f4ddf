//! Shared error type for content acquisition (remote article and local document).

use crate::model::BodyStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors while validating input or acquiring content. All of them end the run.
#[derive(Debug, Error)]
pub enum AcquireError {
    // Input validation
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("The URL must be from a Substack site (host '{host}'). Use --any-host for custom domains.")]
    NotSubstack { host: String },

    #[error("File does not exist: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Path is a directory, not a file: {}", path.display())]
    NotAFile { path: PathBuf },

    #[error("File does not have a .pdf extension: {}", path.display())]
    UnsupportedExtension { path: PathBuf },

    #[error("Error accessing file {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body: {source}")]
    BodyRead {
        #[source]
        source: reqwest::Error,
    },

    // Parsing
    #[error("Could not parse article page: {message}")]
    Parse { message: String },

    #[error("Article body is empty ({status:?}) at {source_ref}.")]
    EmptyBody {
        status: BodyStatus,
        source_ref: String,
    },
}
