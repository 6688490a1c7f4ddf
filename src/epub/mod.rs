//! EPUB 3 writer. Writes mimetype, container, OPF, nav + NCX, stylesheet, sections, and resources.

use chrono::{DateTime, Utc};
use std::io::{Seek, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const STYLESHEET_HREF: &str = "style.css";

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book author is empty.")]
    EmptyAuthor,

    #[error("Cannot write EPUB: book has no sections.")]
    NoSections,

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// One XHTML document in reading order. `body` is an XHTML fragment placed inside `<body>`.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// A binary file carried in the container (image or attachment).
#[derive(Debug, Clone)]
pub struct Resource {
    /// Path relative to the OPF, e.g. `images/image-001.png`.
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Everything needed to write one EPUB.
#[derive(Debug, Clone)]
pub struct EpubBook {
    /// Unique identifier, e.g. `urn:uuid:...`.
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub language: String,
    pub modified: DateTime<Utc>,
    pub stylesheet: Option<String>,
    pub sections: Vec<Section>,
    pub resources: Vec<Resource>,
}

impl EpubBook {
    /// New book with a random `urn:uuid` identifier, language `en`, and no content.
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            identifier: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            title: title.into(),
            author: author.into(),
            language: "en".to_string(),
            modified: Utc::now(),
            stylesheet: None,
            sections: Vec::new(),
            resources: Vec::new(),
        }
    }
}

/// Write `book` to an EPUB file at `path`.
pub fn write_epub(book: &EpubBook, path: &Path) -> Result<(), EpubError> {
    validate_book(book)?;

    let path = path.to_path_buf();
    let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
        path: path.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // 1. Mimetype first, uncompressed (required by OCF)
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    // 2. Container
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    write_opf(book, &mut zip, options_deflate)?;
    write_nav_xhtml(book, &mut zip, options_deflate)?;
    write_ncx(book, &mut zip, options_deflate)?;
    if let Some(css) = &book.stylesheet {
        zip.start_file(format!("{}{}", OEBPS_PREFIX, STYLESHEET_HREF), options_deflate)?;
        zip.write_all(css.as_bytes())?;
    }
    write_sections(book, &mut zip, options_deflate)?;

    // Images are already compressed.
    for res in &book.resources {
        let opts = if res.media_type.starts_with("image/") && !res.media_type.contains("svg") {
            options_stored
        } else {
            options_deflate
        };
        zip.start_file(format!("{}{}", OEBPS_PREFIX, res.href), opts)?;
        zip.write_all(&res.data)?;
    }

    zip.finish()?;
    Ok(())
}

fn validate_book(book: &EpubBook) -> Result<(), EpubError> {
    if book.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if book.author.trim().is_empty() {
        return Err(EpubError::EmptyAuthor);
    }
    if book.sections.is_empty() {
        return Err(EpubError::NoSections);
    }
    Ok(())
}

fn section_href(i: usize) -> String {
    format!("section-{}.xhtml", i + 1)
}

fn write_opf(
    book: &EpubBook,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
    );
    if book.stylesheet.is_some() {
        manifest.push_str(&format!(
            r#"    <item id="css" href="{}" media-type="text/css"/>
"#,
            STYLESHEET_HREF
        ));
    }
    for (i, _) in book.sections.iter().enumerate() {
        manifest.push_str(&format!(
            r#"    <item id="section-{}" href="{}" media-type="application/xhtml+xml"/>
"#,
            i + 1,
            section_href(i)
        ));
    }
    for (i, res) in book.resources.iter().enumerate() {
        manifest.push_str(&format!(
            r#"    <item id="res-{}" href="{}" media-type="{}"/>
"#,
            i + 1,
            xml_escape(&res.href),
            xml_escape(&res.media_type)
        ));
    }

    let spine = book
        .sections
        .iter()
        .enumerate()
        .map(|(i, _)| format!(r#"    <itemref idref="section-{}"/>"#, i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}
  </spine>
</package>
"#,
        id = xml_escape(&book.identifier),
        title = xml_escape(&book.title),
        creator = xml_escape(&book.author),
        language = xml_escape(&book.language),
        modified = book.modified.format("%Y-%m-%dT%H:%M:%SZ"),
        manifest = manifest,
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_nav_xhtml(
    book: &EpubBook,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_links = String::new();
    for (i, section) in book.sections.iter().enumerate() {
        nav_links.push_str(&format!(
            r#"      <li><a href="{}">{}</a></li>
"#,
            section_href(i),
            xml_escape(&section.title)
        ));
    }
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
        nav_links
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_ncx(
    book: &EpubBook,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, section) in book.sections.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
            i + 1,
            i + 1,
            xml_escape(&section.title),
            section_href(i)
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&book.identifier),
        xml_escape(&book.title),
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_sections(
    book: &EpubBook,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let css_link = if book.stylesheet.is_some() {
        format!(
            r#"
  <link rel="stylesheet" type="text/css" href="{}"/>"#,
            STYLESHEET_HREF
        )
    } else {
        String::new()
    };
    let lang = xml_escape(&book.language);
    for (i, section) in book.sections.iter().enumerate() {
        let html = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>{css}
</head>
<body>
{body}
</body>
</html>
"#,
            lang = lang,
            title = xml_escape(&section.title),
            css = css_link,
            body = section.body
        );
        zip.start_file(format!("{}{}", OEBPS_PREFIX, section_href(i)), options)?;
        zip.write_all(html.as_bytes())?;
    }
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
