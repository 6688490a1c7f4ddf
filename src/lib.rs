//! substack2kindle: fetch a Substack article or read a local PDF, convert it to
//! EPUB, AZW3 or MOBI, and email it to a Send-to-Kindle address.

pub mod cli;
pub mod config;
pub mod convert;
pub mod delivery;
pub mod epub;
pub mod mobi;
pub mod model;
pub mod source;

// Re-exports for CLI and consumers.
pub use convert::{
    convert, resolve_strategy, sanitize_filename, ConvertError, ConvertOptions, ExternalConverter,
    ImageReport, OutputFormat, Strategy,
};
pub use delivery::{build_message, send_to_kindle, DeliveryError, EmailConfig};
pub use epub::{write_epub, EpubBook, EpubError};
pub use mobi::{write_mobi, MobiBook, MobiError};
pub use model::{BodyKind, BodyStatus, ContentRecord, ConversionOutcome};
pub use source::{
    check_body, AcquireError, ContentSource, EmptyBodyBehavior, HttpClient, HttpClientBuilder,
    InputKind, LocalDocument, RemoteArticle,
};
