//! Minimal Mobipocket (MOBI 6) writer.
//!
//! Layout: PalmDB header and record list, record 0 (PalmDOC header, MOBI header,
//! EXTH metadata, full name), uncompressed text records, image records, EOF record.
//! Kindle readers open the result as both `.mobi` and `.azw3`.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TEXT_RECORD_SIZE: usize = 4096;
const PALMDB_HEADER_LEN: usize = 78;
const MOBI_HEADER_LEN: u32 = 232;
const PALMDB_NAME_LEN: usize = 31;
const EOF_RECORD: &[u8] = &[0xE9, 0x8E, 0x0D, 0x0A];
const NO_INDEX: u32 = 0xFFFF_FFFF;

const EXTH_AUTHOR: u32 = 100;
const EXTH_PUBLISHING_DATE: u32 = 106;
const EXTH_SOURCE: u32 = 112;
const EXTH_TITLE: u32 = 503;
const EXTH_LANGUAGE: u32 = 524;

#[derive(Debug, Error)]
pub enum MobiError {
    #[error("Cannot write MOBI: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write MOBI: book has no text.")]
    EmptyText,

    #[error("Cannot write MOBI: {count} records exceed the PalmDB limit.")]
    TooManyRecords { count: usize },

    #[error("Failed to write MOBI file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Content and metadata for one MOBI file. `html` may reference images as
/// `<img recindex="00001"/>`, 1-based into `images`.
#[derive(Debug, Clone)]
pub struct MobiBook {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub created: DateTime<Utc>,
    pub unique_id: u32,
    pub source: Option<String>,
    pub html: String,
    pub images: Vec<Vec<u8>>,
}

impl MobiBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            authors: vec![author.into()],
            language: "en".to_string(),
            created: Utc::now(),
            unique_id: uuid::Uuid::new_v4().as_fields().0,
            source: None,
            html: String::new(),
            images: Vec::new(),
        }
    }
}

pub fn write_mobi(book: &MobiBook, path: &Path) -> Result<(), MobiError> {
    let bytes = to_bytes(book)?;
    std::fs::write(path, bytes).map_err(|e| MobiError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Serialize `book` into a complete PalmDB file.
pub fn to_bytes(book: &MobiBook) -> Result<Vec<u8>, MobiError> {
    if book.title.trim().is_empty() {
        return Err(MobiError::EmptyTitle);
    }
    if book.html.is_empty() {
        return Err(MobiError::EmptyText);
    }

    let text_records = split_text(&book.html);
    let record_count = 1 + text_records.len() + book.images.len() + 1;
    if record_count > u16::MAX as usize {
        return Err(MobiError::TooManyRecords {
            count: record_count,
        });
    }

    let mut records: Vec<Vec<u8>> = Vec::with_capacity(record_count);
    records.push(record_zero(book, text_records.len()));
    records.extend(text_records.iter().map(|r| r.to_vec()));
    records.extend(book.images.iter().cloned());
    records.push(EOF_RECORD.to_vec());

    let mut out = palmdb_header(book, &records);
    for record in &records {
        out.extend_from_slice(record);
    }
    Ok(out)
}

/// Chunks of at most [TEXT_RECORD_SIZE] bytes that never split a UTF-8 sequence.
fn split_text(html: &str) -> Vec<&[u8]> {
    let mut records = Vec::new();
    let mut start = 0;
    while start < html.len() {
        let mut end = (start + TEXT_RECORD_SIZE).min(html.len());
        while !html.is_char_boundary(end) {
            end -= 1;
        }
        records.push(&html.as_bytes()[start..end]);
        start = end;
    }
    records
}

fn palmdb_name(title: &str) -> Vec<u8> {
    let mut name: Vec<u8> = title
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c as u8),
            c if c.is_whitespace() || c == '-' || c == '_' => Some(b'_'),
            _ => None,
        })
        .take(PALMDB_NAME_LEN)
        .collect();
    if name.is_empty() {
        name.extend_from_slice(b"book");
    }
    name.resize(32, 0);
    name
}

fn palmdb_header(book: &MobiBook, records: &[Vec<u8>]) -> Vec<u8> {
    let count = records.len();
    let timestamp = book.created.timestamp().clamp(0, u32::MAX as i64) as u32;
    let mut h = Vec::with_capacity(PALMDB_HEADER_LEN + 8 * count + 2);
    h.extend_from_slice(&palmdb_name(&book.title));
    put_u16(&mut h, 0); // attributes
    put_u16(&mut h, 0); // version
    put_u32(&mut h, timestamp);
    put_u32(&mut h, timestamp);
    put_u32(&mut h, 0); // last backup
    put_u32(&mut h, 0); // modification number
    put_u32(&mut h, 0); // app info
    put_u32(&mut h, 0); // sort info
    h.extend_from_slice(b"BOOK");
    h.extend_from_slice(b"MOBI");
    put_u32(&mut h, (2 * count - 1) as u32);
    put_u32(&mut h, 0); // next record list
    put_u16(&mut h, count as u16);

    let mut offset = PALMDB_HEADER_LEN + 8 * count + 2;
    for (i, record) in records.iter().enumerate() {
        put_u32(&mut h, offset as u32);
        let uid = (2 * i) as u32;
        h.push(0); // record attributes
        h.extend_from_slice(&uid.to_be_bytes()[1..]);
        offset += record.len();
    }
    put_u16(&mut h, 0); // gap
    h
}

fn record_zero(book: &MobiBook, text_count: usize) -> Vec<u8> {
    let exth = exth_block(book);
    let full_name = book.title.as_bytes();
    let full_name_offset = 16 + MOBI_HEADER_LEN as usize + exth.len();
    let first_non_text = (1 + text_count) as u32;
    let first_image = if book.images.is_empty() {
        NO_INDEX
    } else {
        first_non_text
    };
    let last_content = (text_count + book.images.len()) as u16;

    let mut r = Vec::new();
    // PalmDOC header
    put_u16(&mut r, 1); // no compression
    put_u16(&mut r, 0);
    put_u32(&mut r, book.html.len() as u32);
    put_u16(&mut r, text_count as u16);
    put_u16(&mut r, TEXT_RECORD_SIZE as u16);
    put_u16(&mut r, 0); // encryption
    put_u16(&mut r, 0);

    // MOBI header
    let start = r.len();
    r.extend_from_slice(b"MOBI");
    put_u32(&mut r, MOBI_HEADER_LEN);
    put_u32(&mut r, 2); // book
    put_u32(&mut r, 65001); // UTF-8
    put_u32(&mut r, book.unique_id);
    put_u32(&mut r, 6);
    for _ in 0..10 {
        put_u32(&mut r, NO_INDEX); // orthographic, inflection, index names/keys, extra indexes
    }
    put_u32(&mut r, first_non_text);
    put_u32(&mut r, full_name_offset as u32);
    put_u32(&mut r, full_name.len() as u32);
    put_u32(&mut r, 9); // English
    put_u32(&mut r, 0);
    put_u32(&mut r, 0);
    put_u32(&mut r, 6); // min reader version
    put_u32(&mut r, first_image);
    for _ in 0..4 {
        put_u32(&mut r, 0); // huffman
    }
    put_u32(&mut r, 0x40); // has EXTH
    r.extend_from_slice(&[0; 32]);
    put_u32(&mut r, NO_INDEX);
    put_u32(&mut r, NO_INDEX); // DRM offset
    put_u32(&mut r, 0);
    put_u32(&mut r, 0);
    put_u32(&mut r, 0);
    r.extend_from_slice(&[0; 8]);
    put_u16(&mut r, 1); // first content record
    put_u16(&mut r, last_content);
    put_u32(&mut r, 1);
    put_u32(&mut r, NO_INDEX); // FCIS
    put_u32(&mut r, 1);
    put_u32(&mut r, NO_INDEX); // FLIS
    put_u32(&mut r, 1);
    r.extend_from_slice(&[0; 8]);
    put_u32(&mut r, NO_INDEX);
    put_u32(&mut r, 0);
    put_u32(&mut r, NO_INDEX);
    put_u32(&mut r, NO_INDEX);
    put_u32(&mut r, 0); // no trailing entries
    put_u32(&mut r, NO_INDEX); // INDX
    debug_assert_eq!(r.len() - start, MOBI_HEADER_LEN as usize);

    r.extend_from_slice(&exth);
    r.extend_from_slice(full_name);
    r.extend_from_slice(&[0, 0]);
    while r.len() % 4 != 0 {
        r.push(0);
    }
    r
}

fn exth_block(book: &MobiBook) -> Vec<u8> {
    let mut entries: Vec<(u32, &str)> = book
        .authors
        .iter()
        .filter(|a| !a.trim().is_empty())
        .map(|a| (EXTH_AUTHOR, a.as_str()))
        .collect();
    let date = book.created.to_rfc3339();
    entries.push((EXTH_PUBLISHING_DATE, date.as_str()));
    if let Some(source) = &book.source {
        entries.push((EXTH_SOURCE, source.as_str()));
    }
    entries.push((EXTH_TITLE, book.title.as_str()));
    entries.push((EXTH_LANGUAGE, book.language.as_str()));

    let mut body = Vec::new();
    for (kind, value) in &entries {
        put_u32(&mut body, *kind);
        put_u32(&mut body, (8 + value.len()) as u32);
        body.extend_from_slice(value.as_bytes());
    }

    let mut exth = Vec::with_capacity(12 + body.len() + 3);
    exth.extend_from_slice(b"EXTH");
    put_u32(&mut exth, (12 + body.len()) as u32);
    put_u32(&mut exth, entries.len() as u32);
    exth.extend_from_slice(&body);
    while exth.len() % 4 != 0 {
        exth.push(0);
    }
    exth
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}
