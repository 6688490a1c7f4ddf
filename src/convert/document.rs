//! PDF conversion: converter first, text-only EPUB as the fallback.

use super::markup::{escape_attr, escape_text};
use super::{remove_scratch, ConvertError, ConvertOptions, OutputFormat, Strategy};
use crate::epub::{self, EpubBook, Resource, Section};
use crate::model::{BodyStatus, ContentRecord};
use crate::source::document::extract_text;
use std::path::Path;

const PARAGRAPHS_PER_SECTION: usize = 100;

pub(super) fn convert_document(
    record: &ContentRecord,
    format: OutputFormat,
    strategy: Strategy,
    out_path: &Path,
    options: &ConvertOptions<'_>,
) -> Result<Strategy, ConvertError> {
    let pdf_path = Path::new(&record.source);

    let converter = match (strategy, options.converter) {
        (Strategy::ExternalConverter, Some(c)) => c,
        (Strategy::Direct, _) => {
            write_document_epub(record, pdf_path, options.include_original, out_path)?;
            return Ok(Strategy::Direct);
        }
        _ => {
            return Err(ConvertError::DirectUnavailable {
                format,
                reason: "no external converter found".to_string(),
            });
        }
    };

    if format == OutputFormat::Epub {
        return match converter.run(pdf_path, out_path) {
            Ok(()) => Ok(Strategy::ExternalConverter),
            Err(e) => {
                tracing::warn!("External conversion failed, building a text-only EPUB: {}", e);
                remove_scratch(out_path);
                write_document_epub(record, pdf_path, options.include_original, out_path)?;
                Ok(Strategy::Direct)
            }
        };
    }

    // PDF -> EPUB -> Kindle format, both steps through the converter when possible.
    let intermediate = out_path.with_extension("intermediate.epub");
    if let Err(e) = converter.run(pdf_path, &intermediate) {
        tracing::warn!("External PDF conversion failed, building a text-only EPUB: {}", e);
        remove_scratch(&intermediate);
        write_document_epub(record, pdf_path, options.include_original, &intermediate)?;
    }
    let result = converter.run(&intermediate, out_path);
    remove_scratch(&intermediate);
    match result {
        Ok(()) => Ok(Strategy::ExternalConverter),
        Err(e) => {
            remove_scratch(out_path);
            Err(ConvertError::DirectUnavailable {
                format,
                reason: e.to_string(),
            })
        }
    }
}

/// Cover page, the text split into "Content Part N" sections, and optionally the PDF itself.
pub(super) fn write_document_epub(
    record: &ContentRecord,
    pdf_path: &Path,
    include_original: bool,
    out_path: &Path,
) -> Result<(), ConvertError> {
    let text = if record.body_status == BodyStatus::Deferred {
        extract_text(pdf_path)
    } else {
        record.body.clone()
    };

    let mut book = EpubBook::new(&record.title, &record.author);
    book.sections.push(Section {
        title: "Cover".to_string(),
        body: format!(
            "<h1>{}</h1>\n<h2>By {}</h2>\n<p>This is a converted PDF document.</p>\n<p>The original PDF may contain formatting and content that could not be fully preserved in this text-only conversion.</p>",
            escape_text(&record.title),
            escape_text(&record.author)
        ),
    });

    let paragraphs = paragraphs(&text);
    for (i, chunk) in paragraphs.chunks(PARAGRAPHS_PER_SECTION).enumerate() {
        let body = chunk
            .iter()
            .map(|p| format!("<p>{}</p>", p))
            .collect::<Vec<_>>()
            .join("\n");
        book.sections.push(Section {
            title: format!("Content Part {}", i + 1),
            body,
        });
    }
    tracing::debug!(
        paragraphs = paragraphs.len(),
        sections = book.sections.len(),
        "Laid out PDF text"
    );

    if include_original {
        attach_original(&mut book, pdf_path);
    }

    epub::write_epub(&book, out_path)?;
    Ok(())
}

fn attach_original(book: &mut EpubBook, pdf_path: &Path) {
    let data = match std::fs::read(pdf_path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(path = %pdf_path.display(), "Failed to include original PDF: {}", e);
            return;
        }
    };
    let file_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "original.pdf".to_string());
    let href = format!("original/{}", file_name);
    book.sections.push(Section {
        title: "Original PDF".to_string(),
        body: format!(
            "<h1>Original PDF Document</h1>\n<p>The original PDF file \"{}\" is included in this book.</p>\n<p>If your reader supports it, you can <a href=\"{}\">open the PDF</a>.</p>",
            escape_text(&file_name),
            escape_attr(&href)
        ),
    });
    book.resources.push(Resource {
        href,
        media_type: "application/pdf".to_string(),
        data,
    });
}

/// Split plain text on blank lines into cleaned, escaped paragraphs. Empty ones are dropped.
pub(super) fn paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(clean_text)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Join lines, collapse whitespace, drop control characters, escape for XHTML.
fn clean_text(raw: &str) -> String {
    let visible: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = visible.split_whitespace().collect::<Vec<_>>().join(" ");
    escape_text(&collapsed)
}
