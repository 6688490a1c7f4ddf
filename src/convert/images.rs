//! Best-effort image downloads. Every reference gets an outcome; failures never abort a conversion.

use crate::source::Fetch;

/// Image formats we know how to embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Svg,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
            ImageKind::Svg => "svg",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
            ImageKind::Svg => "image/svg+xml",
        }
    }

    /// Magic bytes first, then the Content-Type header, then the URL extension.
    fn detect(data: &[u8], content_type: Option<&str>, url: &str) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageKind::Jpeg);
        }
        if data.starts_with(b"\x89PNG") {
            return Some(ImageKind::Png);
        }
        if data.starts_with(b"GIF8") {
            return Some(ImageKind::Gif);
        }
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(ImageKind::Webp);
        }
        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("svg") {
                return Some(ImageKind::Svg);
            }
            if ct.contains("jpeg") || ct.contains("jpg") {
                return Some(ImageKind::Jpeg);
            }
            if ct.contains("png") {
                return Some(ImageKind::Png);
            }
        }
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".svg") {
            Some(ImageKind::Svg)
        } else {
            None
        }
    }
}

/// One image fetched into memory, ready to be embedded.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub url: String,
    /// Local file name, e.g. `image-003.png`. Unique within one conversion.
    pub file_name: String,
    pub kind: ImageKind,
    pub data: Vec<u8>,
}

/// What happened to one image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Embedded { file_name: String },
    Failed { reason: String },
}

/// Ordered `(url, outcome)` pairs, one per image reference in the record.
#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    pub entries: Vec<(String, ImageOutcome)>,
}

impl ImageReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, ImageOutcome::Embedded { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.embedded_count()
    }
}

/// Download every reference in order. Duplicated URLs are fetched once per occurrence.
///
/// Returns the embedded images (in reference order) and the full report.
pub fn download_images(
    urls: &[String],
    fetcher: &dyn Fetch,
    progress: Option<&dyn Fn(u32, u32)>,
) -> (Vec<DownloadedImage>, ImageReport) {
    let total = urls.len() as u32;
    let mut images = Vec::new();
    let mut report = ImageReport::default();

    for (i, url) in urls.iter().enumerate() {
        if let Some(p) = progress {
            p(i as u32 + 1, total);
        }
        let outcome = match fetcher.fetch(url) {
            Ok(fetched) => {
                match ImageKind::detect(&fetched.bytes, fetched.content_type.as_deref(), url) {
                    Some(kind) => {
                        let file_name = format!("image-{:03}.{}", images.len() + 1, kind.extension());
                        images.push(DownloadedImage {
                            url: url.clone(),
                            file_name: file_name.clone(),
                            kind,
                            data: fetched.bytes,
                        });
                        ImageOutcome::Embedded { file_name }
                    }
                    None => ImageOutcome::Failed {
                        reason: "response is not a recognized image".to_string(),
                    },
                }
            }
            Err(e) => ImageOutcome::Failed {
                reason: e.to_string(),
            },
        };
        if let ImageOutcome::Failed { reason } = &outcome {
            tracing::warn!(url = %url, "Skipping image: {}", reason);
        }
        report.entries.push((url.clone(), outcome));
    }

    (images, report)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::source::{Fetch, FetchError, Fetched};
    use std::collections::HashMap;

    pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    pub const WEBP_BYTES: &[u8] = b"RIFF\x24\0\0\0WEBPVP8 ";
    pub const SVG_BYTES: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg"/>"#;

    /// Serves canned bodies by URL; anything else is a 404.
    #[derive(Default)]
    pub struct StubFetcher {
        pub bodies: HashMap<String, Vec<u8>>,
    }

    impl StubFetcher {
        pub fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }
    }

    impl Fetch for StubFetcher {
        fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
            match self.bodies.get(url) {
                Some(b) => Ok(Fetched {
                    bytes: b.clone(),
                    content_type: None,
                }),
                None => Err(FetchError::Status { status: 404 }),
            }
        }
    }
}
