//! Format conversion. Turns a [ContentRecord] into an EPUB, AZW3 or MOBI file on disk.
//!
//! Strategy is decided once per call by [resolve_strategy]; the converter path
//! falls back to direct construction where one exists.

mod document;
mod images;
mod markup;

pub mod external;

pub use external::{ConverterError, ExternalConverter, DEFAULT_CONVERTER};
pub use images::{download_images, DownloadedImage, ImageKind, ImageOutcome, ImageReport};

use crate::epub::{self, EpubBook, EpubError, Resource, Section};
use crate::mobi::{self, MobiBook, MobiError};
use crate::model::{BodyKind, ContentRecord, ConversionOutcome};
use crate::source::{Fetch, InputKind};
use markup::{escape_attr, escape_text, ImageLinks, ImageRef};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Per part, so title and author joined stay well under the usual 255-byte name limit.
const MAX_FILENAME_BYTES: usize = 100;
const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const ARTICLE_STYLESHEET: &str = r#"body {
  font-family: serif;
  margin: 5%;
  text-align: justify;
}
h1, h2, h3, h4, h5, h6 {
  text-align: left;
  margin-top: 1em;
}
img {
  max-width: 100%;
  height: auto;
}
blockquote {
  margin: 1em 2em;
  font-style: italic;
}
"#;

/// Target e-book format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Epub,
    Azw3,
    Mobi,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Azw3 => "azw3",
            OutputFormat::Mobi => "mobi",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epub" => Ok(OutputFormat::Epub),
            "azw3" => Ok(OutputFormat::Azw3),
            "mobi" => Ok(OutputFormat::Mobi),
            _ => Err(ConvertError::UnsupportedFormat {
                value: s.to_string(),
            }),
        }
    }
}

/// How a conversion is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Written by this crate.
    Direct,
    /// Transcoded by an external converter program.
    ExternalConverter,
    /// No way to produce the format without a converter.
    Unavailable,
}

/// Single decision point for converter vs. direct construction.
pub fn resolve_strategy(
    input: InputKind,
    format: OutputFormat,
    tool_available: bool,
    skip_requested: bool,
) -> Strategy {
    let use_tool = tool_available && !skip_requested;
    match (input, format) {
        (InputKind::Article, OutputFormat::Epub) => Strategy::Direct,
        (InputKind::Article, _) if use_tool => Strategy::ExternalConverter,
        (InputKind::Article, _) => Strategy::Direct,
        (InputKind::Document, _) if use_tool => Strategy::ExternalConverter,
        (InputKind::Document, OutputFormat::Epub) => Strategy::Direct,
        (InputKind::Document, _) => Strategy::Unavailable,
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported format '{value}'. Use epub, azw3 or mobi.")]
    UnsupportedFormat { value: String },

    #[error(transparent)]
    Epub(#[from] EpubError),

    #[error(transparent)]
    Mobi(#[from] MobiError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot produce {format} from a PDF without an external converter: {reason}. Install Calibre (ebook-convert) or choose --format epub.")]
    DirectUnavailable { format: OutputFormat, reason: String },

    #[error("Failed to create scratch directory: {0}")]
    TempDir(#[source] std::io::Error),
}

/// Per-call knobs. The converter is looked up once by the caller.
#[derive(Default)]
pub struct ConvertOptions<'a> {
    pub converter: Option<&'a ExternalConverter>,
    pub skip_converter: bool,
    /// Attach the original PDF to a directly built document EPUB.
    pub include_original: bool,
    pub progress: Option<&'a dyn Fn(u32, u32)>,
}

/// Convert `record` into `format`, writing the result inside `work_dir`.
pub fn convert(
    record: &ContentRecord,
    input: InputKind,
    format: OutputFormat,
    work_dir: &Path,
    fetcher: &dyn Fetch,
    options: &ConvertOptions<'_>,
) -> Result<ConversionOutcome, ConvertError> {
    let strategy = resolve_strategy(
        input,
        format,
        options.converter.is_some(),
        options.skip_converter,
    );
    if format == OutputFormat::Mobi {
        tracing::warn!("MOBI is no longer accepted by Amazon's Send to Kindle; prefer epub or azw3");
    }
    tracing::info!(?input, %format, ?strategy, "Converting");

    let out_path = work_dir.join(output_file_name(record, format));
    let (used, images) = match input {
        InputKind::Article => convert_article(record, format, strategy, &out_path, fetcher, options)?,
        InputKind::Document => (
            document::convert_document(record, format, strategy, &out_path, options)?,
            ImageReport::default(),
        ),
    };

    Ok(ConversionOutcome {
        path: out_path,
        title: record.title.clone(),
        author: record.author.clone(),
        format,
        strategy: used,
        images,
    })
}

fn convert_article(
    record: &ContentRecord,
    format: OutputFormat,
    strategy: Strategy,
    out_path: &Path,
    fetcher: &dyn Fetch,
    options: &ConvertOptions<'_>,
) -> Result<(Strategy, ImageReport), ConvertError> {
    let (downloaded, report) = download_images(&record.image_urls, fetcher, options.progress);
    tracing::info!(
        embedded = report.embedded_count(),
        failed = report.failed_count(),
        "Images processed"
    );

    if format == OutputFormat::Epub {
        write_article_epub(record, &downloaded, &report, out_path)?;
        return Ok((Strategy::Direct, report));
    }

    if let (Strategy::ExternalConverter, Some(converter)) = (strategy, options.converter) {
        let intermediate = out_path.with_extension("intermediate.epub");
        write_article_epub(record, &downloaded, &report, &intermediate)?;
        let result = converter.run(&intermediate, out_path);
        remove_scratch(&intermediate);
        match result {
            Ok(()) => return Ok((Strategy::ExternalConverter, report)),
            Err(e) => {
                tracing::warn!("External conversion failed, building {} directly: {}", format, e);
                remove_scratch(out_path);
            }
        }
    }

    write_article_mobi(record, &downloaded, &report, out_path)?;
    Ok((Strategy::Direct, report))
}

/// Title, byline, date and source link shown above the body.
fn article_header(record: &ContentRecord) -> String {
    let mut header = format!(
        "<h1>{}</h1>\n<p><strong>By {}</strong></p>\n",
        escape_text(&record.title),
        escape_text(&record.author)
    );
    if let Some(label) = record.published_label() {
        header.push_str(&format!("<p><em>Published: {}</em></p>\n", escape_text(&label)));
    }
    header.push_str(&format!(
        "<p><em>Source: <a href=\"{}\">{}</a></em></p>\n<hr/>\n",
        escape_attr(&record.source),
        escape_text(&record.source)
    ));
    header
}

/// Body as XHTML with `img` occurrences resolved through `links`.
fn article_body(record: &ContentRecord, links: &mut ImageLinks) -> String {
    match record.body_kind {
        BodyKind::Markup => markup::to_xhtml(&record.body, links),
        BodyKind::PlainText => document::paragraphs(&record.body)
            .iter()
            .map(|p| format!("<p>{}</p>", p))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Pair each report entry with its target, in reference order.
fn image_links(
    report: &ImageReport,
    downloaded: &[DownloadedImage],
    target: impl Fn(&DownloadedImage) -> ImageRef,
) -> ImageLinks {
    let mut links = ImageLinks::default();
    for (url, outcome) in &report.entries {
        let found = match outcome {
            ImageOutcome::Embedded { file_name } => downloaded
                .iter()
                .find(|img| &img.file_name == file_name)
                .map(&target),
            ImageOutcome::Failed { .. } => None,
        };
        links.push(url, found);
    }
    links
}

fn write_article_epub(
    record: &ContentRecord,
    downloaded: &[DownloadedImage],
    report: &ImageReport,
    path: &Path,
) -> Result<(), ConvertError> {
    let mut links = image_links(report, downloaded, |img| {
        ImageRef::Href(format!("images/{}", img.file_name))
    });
    let body = format!("{}{}", article_header(record), article_body(record, &mut links));

    let mut book = EpubBook::new(&record.title, &record.author);
    book.stylesheet = Some(ARTICLE_STYLESHEET.to_string());
    book.sections.push(Section {
        title: record.title.clone(),
        body,
    });
    book.resources = downloaded
        .iter()
        .map(|img| Resource {
            href: format!("images/{}", img.file_name),
            media_type: img.kind.media_type().to_string(),
            data: img.data.clone(),
        })
        .collect();

    epub::write_epub(&book, path)?;
    tracing::debug!(path = %path.display(), "Wrote EPUB");
    Ok(())
}

fn write_article_mobi(
    record: &ContentRecord,
    downloaded: &[DownloadedImage],
    report: &ImageReport,
    path: &Path,
) -> Result<(), ConvertError> {
    // Mobipocket image records hold JPEG, PNG and GIF only; the rest keep their remote URL.
    let embeddable: Vec<&DownloadedImage> = downloaded
        .iter()
        .filter(|img| !matches!(img.kind, ImageKind::Svg | ImageKind::Webp))
        .collect();
    let mut links = image_links(report, downloaded, |img| {
        match embeddable.iter().position(|e| e.file_name == img.file_name) {
            Some(pos) => ImageRef::RecIndex(pos + 1),
            None => ImageRef::Href(img.url.clone()),
        }
    });
    let html = format!(
        "<html><head><title>{}</title></head><body>\n{}{}\n</body></html>",
        escape_text(&record.title),
        article_header(record),
        article_body(record, &mut links)
    );

    let mut book = MobiBook::new(&record.title, &record.author);
    book.source = Some(record.source.clone());
    book.html = html;
    book.images = embeddable.iter().map(|img| img.data.clone()).collect();

    mobi::write_mobi(&book, path)?;
    tracing::debug!(path = %path.display(), "Wrote MOBI container");
    Ok(())
}

/// `"{title} - {author}.{ext}"`, both parts sanitized.
pub fn output_file_name(record: &ContentRecord, format: OutputFormat) -> String {
    let title = sanitize_filename(&record.title);
    let author = sanitize_filename(&record.author);
    let stem = match (title.is_empty(), author.is_empty()) {
        (true, true) => "book".to_string(),
        (false, true) => title,
        (true, false) => author,
        (false, false) => format!("{} - {}", title, author),
    };
    format!("{}.{}", stem, format.extension())
}

/// Replace characters that are invalid in file names, trim, and cap at 100 bytes
/// on a character boundary.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim();
    let mut end = trimmed.len().min(MAX_FILENAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].trim_end().to_string()
}

fn remove_scratch(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), "Failed to remove intermediate file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::images::testing::*;
    use super::*;
    use crate::model::BodyStatus;
    use std::io::Read;
    use zip::read::ZipArchive;

    fn article(body: &str, image_urls: &[&str]) -> ContentRecord {
        ContentRecord {
            title: "On Writing: A Memoir?".to_string(),
            author: "Jane Doe".to_string(),
            published_at: chrono::DateTime::parse_from_rfc3339("2024-03-04T09:30:00Z").ok(),
            body: body.to_string(),
            body_kind: BodyKind::Markup,
            body_status: BodyStatus::Found,
            source: "https://jane.substack.com/p/on-writing".to_string(),
            image_urls: image_urls.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let zip = ZipArchive::new(file).unwrap();
        zip.file_names().map(String::from).collect()
    }

    fn zip_entry(path: &Path, name: &str) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let mut s = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn format_parsing_is_case_insensitive_and_exhaustive() {
        assert_eq!("EPUB".parse::<OutputFormat>().unwrap(), OutputFormat::Epub);
        assert_eq!("Azw3".parse::<OutputFormat>().unwrap(), OutputFormat::Azw3);
        assert_eq!("mobi".parse::<OutputFormat>().unwrap(), OutputFormat::Mobi);
        for bad in ["pdf", "", "kfx", "epub3"] {
            assert!(matches!(
                bad.parse::<OutputFormat>(),
                Err(ConvertError::UnsupportedFormat { .. })
            ));
        }
    }

    #[test]
    fn strategy_table() {
        use InputKind::*;
        use OutputFormat::*;
        assert_eq!(resolve_strategy(Article, Epub, true, false), Strategy::Direct);
        assert_eq!(resolve_strategy(Article, Azw3, true, false), Strategy::ExternalConverter);
        assert_eq!(resolve_strategy(Article, Mobi, true, true), Strategy::Direct);
        assert_eq!(resolve_strategy(Article, Azw3, false, false), Strategy::Direct);
        assert_eq!(resolve_strategy(Document, Epub, true, false), Strategy::ExternalConverter);
        assert_eq!(resolve_strategy(Document, Epub, false, false), Strategy::Direct);
        assert_eq!(resolve_strategy(Document, Azw3, false, false), Strategy::Unavailable);
        assert_eq!(resolve_strategy(Document, Mobi, true, true), Strategy::Unavailable);
    }

    #[test]
    fn sanitize_removes_forbidden_chars_and_caps_length() {
        let nasty = r#"a/b\c:d*e?f"g<h>i|j"#;
        let clean = sanitize_filename(nasty);
        assert!(!clean.contains(FORBIDDEN_FILENAME_CHARS));
        assert_eq!(clean, "a_b_c_d_e_f_g_h_i_j");

        let long = format!("{}{}", "é".repeat(150), "?");
        let clean = sanitize_filename(&long);
        assert_eq!(clean, "é".repeat(50));
        assert!(!clean.contains('?'));

        // Three-byte characters: 100 is not a boundary, so back off to 99.
        let clean = sanitize_filename(&"日本語".repeat(40));
        assert_eq!(clean.len(), 99);
        assert_eq!(clean.chars().count(), 33);

        assert_eq!(sanitize_filename("  padded  "), "padded");
    }

    #[test]
    fn output_file_name_joins_title_and_author() {
        let r = article("<p>x</p>", &[]);
        assert_eq!(
            output_file_name(&r, OutputFormat::Azw3),
            "On Writing_ A Memoir_ - Jane Doe.azw3"
        );
    }

    #[test]
    fn article_epub_without_images_has_no_image_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let record = article("<p>Hello <b>world</b></p>", &[]);
        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Epub,
            dir.path(),
            &StubFetcher::default(),
            &ConvertOptions::default(),
        )?;
        assert_eq!(outcome.strategy, Strategy::Direct);
        assert!(outcome.images.is_empty());
        assert!(outcome.path.exists());
        let names = zip_names(&outcome.path);
        assert!(!names.iter().any(|n| n.contains("images/")));

        let section = zip_entry(&outcome.path, "OEBPS/section-1.xhtml");
        assert!(section.contains("<h1>On Writing: A Memoir?</h1>"));
        assert!(section.contains("<p><strong>By Jane Doe</strong></p>"));
        assert!(section.contains("<p><em>Published: March 4, 2024</em></p>"));
        assert!(section.contains(r#"<a href="https://jane.substack.com/p/on-writing">"#));
        assert!(section.contains("<p>Hello <b>world</b></p>"));
        Ok(())
    }

    #[test]
    fn long_cjk_title_and_author_still_convert() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut record = article("<p>本文</p>", &[]);
        record.title = "日本語のタイトル".repeat(15);
        record.author = "著者".repeat(40);
        let name = output_file_name(&record, OutputFormat::Epub);
        assert!(name.len() <= 2 * MAX_FILENAME_BYTES + ".epub".len() + 3);

        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Epub,
            dir.path(),
            &StubFetcher::default(),
            &ConvertOptions::default(),
        )?;
        assert!(outcome.path.exists());
        assert_eq!(outcome.file_name(), name);

        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Mobi,
            dir.path(),
            &StubFetcher::default(),
            &ConvertOptions::default(),
        )?;
        assert!(outcome.path.exists());
        Ok(())
    }

    #[test]
    fn article_header_omits_unknown_date() {
        let mut record = article("", &[]);
        record.published_at = None;
        assert!(!article_header(&record).contains("Published"));
    }

    #[test]
    fn article_epub_embeds_only_successful_downloads() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let urls = ["https://cdn/a.png", "https://cdn/gone.png", "https://cdn/c.jpg"];
        let body = r#"<p><img src="https://cdn/a.png"></p><p><img src="https://cdn/gone.png"></p><p><img src="https://cdn/c.jpg"></p>"#;
        let record = article(body, &urls);
        let fetcher = StubFetcher::default()
            .with("https://cdn/a.png", PNG_BYTES)
            .with("https://cdn/c.jpg", JPEG_BYTES);
        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Epub,
            dir.path(),
            &fetcher,
            &ConvertOptions::default(),
        )?;
        assert_eq!(outcome.images.len(), 3);
        assert_eq!(outcome.images.failed_count(), 1);

        let names = zip_names(&outcome.path);
        let embedded: Vec<_> = names.iter().filter(|n| n.contains("images/")).collect();
        assert_eq!(embedded.len(), 2);

        let section = zip_entry(&outcome.path, "OEBPS/section-1.xhtml");
        assert!(section.contains(r#"src="images/image-001.png""#));
        assert!(section.contains(r#"src="images/image-002.jpg""#));
        assert!(section.contains(r#"src="https://cdn/gone.png""#));
        Ok(())
    }

    #[test]
    fn azw3_without_converter_is_built_directly() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let record = article(r#"<p>Body text</p><img src="https://cdn/a.png">"#, &["https://cdn/a.png"]);
        let fetcher = StubFetcher::default().with("https://cdn/a.png", PNG_BYTES);
        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Azw3,
            dir.path(),
            &fetcher,
            &ConvertOptions::default(),
        )?;
        assert_eq!(outcome.strategy, Strategy::Direct);
        assert_eq!(outcome.file_name(), "On Writing_ A Memoir_ - Jane Doe.azw3");

        let bytes = std::fs::read(&outcome.path)?;
        let info = crate::mobi::testing::inspect(&bytes).ok_or("unreadable MOBI")?;
        assert_eq!(info.full_name, "On Writing: A Memoir?");
        assert_eq!(info.authors, vec!["Jane Doe".to_string()]);
        assert_eq!(info.image_count, 1);
        assert!(info.text.contains("Body text"));
        assert!(info.text.contains(r#"recindex="00001""#));
        Ok(())
    }

    #[test]
    fn mobi_keeps_webp_and_svg_remote() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let urls = ["https://cdn/a.webp", "https://cdn/b.png", "https://cdn/c.svg"];
        let body = r#"<img src="https://cdn/a.webp"><img src="https://cdn/b.png"><img src="https://cdn/c.svg">"#;
        let record = article(body, &urls);
        let fetcher = StubFetcher::default()
            .with("https://cdn/a.webp", WEBP_BYTES)
            .with("https://cdn/b.png", PNG_BYTES)
            .with("https://cdn/c.svg", SVG_BYTES);
        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Mobi,
            dir.path(),
            &fetcher,
            &ConvertOptions::default(),
        )?;
        assert_eq!(outcome.images.embedded_count(), 3);

        let bytes = std::fs::read(&outcome.path)?;
        let info = crate::mobi::testing::inspect(&bytes).ok_or("unreadable MOBI")?;
        assert_eq!(info.image_count, 1);
        assert!(info.text.contains(r#"src="https://cdn/a.webp""#));
        assert!(info.text.contains(r#"recindex="00001""#));
        assert!(!info.text.contains("00002"));
        assert!(info.text.contains(r#"src="https://cdn/c.svg""#));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_converter_falls_back_to_direct() -> Result<(), Box<dyn std::error::Error>> {
        let Some(converter) = ExternalConverter::detect("false") else {
            return Ok(());
        };
        let dir = tempfile::tempdir()?;
        let record = article("<p>Fallback</p>", &[]);
        let options = ConvertOptions {
            converter: Some(&converter),
            ..ConvertOptions::default()
        };
        let outcome = convert(
            &record,
            InputKind::Article,
            OutputFormat::Mobi,
            dir.path(),
            &StubFetcher::default(),
            &options,
        )?;
        assert_eq!(outcome.strategy, Strategy::Direct);
        assert!(outcome.path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != outcome.path)
            .collect();
        assert!(leftovers.is_empty(), "intermediate EPUB was not removed");
        Ok(())
    }

    #[test]
    fn progress_callback_sees_every_image() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let record = article("", &["https://cdn/a.png", "https://cdn/b.png"]);
        let seen = std::cell::Cell::new(0u32);
        let cb = |n: u32, _total: u32| seen.set(n);
        let options = ConvertOptions {
            progress: Some(&cb),
            ..ConvertOptions::default()
        };
        convert(
            &record,
            InputKind::Article,
            OutputFormat::Epub,
            dir.path(),
            &StubFetcher::default(),
            &options,
        )?;
        assert_eq!(seen.get(), 2);
        Ok(())
    }
}
