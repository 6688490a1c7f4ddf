//! Substack adapter. Fetches one article page and extracts title, author, date, body and images.
//!
//! Every field is looked up through an ordered list of selectors; the first non-empty match wins.
//! Paywalled posts only expose the free preview (`.available-content`).

use crate::model::{BodyKind, BodyStatus, ContentRecord};
use crate::source::client::HttpClient;
use crate::source::error::AcquireError;
use crate::source::{ContentSource, InputKind};
use chrono::{DateTime, FixedOffset};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

const TITLE_SELECTORS: &[&str] = &["h1.post-title", "h1"];

const AUTHOR_SELECTORS: &[&str] = &[
    ".byline-link",
    ".author-name",
    ".substack-author",
    ".post-header .author",
    "meta[name='author']",
];

const BODY_SELECTORS: &[&str] = &[
    ".available-content",
    ".subscriber-content",
    ".post-content",
    ".body",
];

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector, AcquireError> {
    Selector::parse(sel).map_err(|e| AcquireError::Parse {
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Remote Substack article behind one URL.
pub struct RemoteArticle<'a> {
    url: String,
    client: &'a HttpClient,
    allow_any_host: bool,
}

impl<'a> RemoteArticle<'a> {
    pub fn new(url: impl Into<String>, client: &'a HttpClient) -> Self {
        Self {
            url: url.into(),
            client,
            allow_any_host: false,
        }
    }

    /// Accept hosts outside substack.com (publications on custom domains).
    pub fn allow_any_host(mut self, allow: bool) -> Self {
        self.allow_any_host = allow;
        self
    }
}

impl ContentSource for RemoteArticle<'_> {
    fn kind(&self) -> InputKind {
        InputKind::Article
    }

    fn acquire(&mut self) -> Result<ContentRecord, AcquireError> {
        let url = ensure_article_url(&self.url, self.allow_any_host)?;
        tracing::info!(url = %url, "Scraping article");

        let response = self
            .client
            .get(url.as_str())
            .map_err(|e| AcquireError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let html = response
            .text()
            .map_err(|e| AcquireError::BodyRead { source: e })?;

        let record = parse_article(&html, &self.url)?;
        tracing::info!(
            title = %record.title,
            author = %record.author,
            images = record.image_urls.len(),
            "Scraped article"
        );
        Ok(record)
    }
}

/// Require an absolute http(s) URL with a host; unless `allow_any_host`, the host must be Substack's.
pub fn ensure_article_url(input: &str, allow_any_host: bool) -> Result<Url, AcquireError> {
    let url = Url::parse(input.trim()).map_err(|e| AcquireError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AcquireError::InvalidUrl {
            input: input.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    let host = url.host_str().ok_or_else(|| AcquireError::InvalidUrl {
        input: input.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    if !allow_any_host && !is_substack_host(host) {
        return Err(AcquireError::NotSubstack {
            host: host.to_string(),
        });
    }
    Ok(url)
}

fn is_substack_host(host: &str) -> bool {
    host.ends_with("substack.com") || host.contains(".substack.")
}

/// Extract a [ContentRecord] from an article page. Never fails on missing content;
/// an absent or empty body is reported through `body_status`.
pub fn parse_article(html: &str, url: &str) -> Result<ContentRecord, AcquireError> {
    let doc = Html::parse_document(html);
    let json_ld = json_ld_article(&doc)?;

    let title = first_text(&doc, TITLE_SELECTORS)?
        .or_else(|| {
            json_ld
                .as_ref()
                .and_then(|v| v.get("headline"))
                .and_then(|h| h.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| title_from_url(url));

    let author = first_text(&doc, AUTHOR_SELECTORS)?
        .or_else(|| json_ld.as_ref().and_then(json_ld_author))
        .unwrap_or_else(|| author_from_url(url));

    let published_at = time_datetime(&doc)?.or_else(|| {
        json_ld
            .as_ref()
            .and_then(|v| v.get("datePublished"))
            .and_then(|d| d.as_str())
            .and_then(parse_timestamp)
    });

    let (body, body_status, image_urls) = match find_body(&doc)? {
        Some(container) => {
            let body = container.inner_html();
            let status = if body.trim().is_empty() {
                BodyStatus::EmptyContainer
            } else {
                BodyStatus::Found
            };
            (body, status, collect_images(container)?)
        }
        None => (String::new(), BodyStatus::NoContainer, Vec::new()),
    };

    Ok(ContentRecord {
        title,
        author,
        published_at,
        body,
        body_kind: BodyKind::Markup,
        body_status,
        source: url.to_string(),
        image_urls,
    })
}

/// First non-empty text (or `content` attribute for meta tags) among the candidates.
fn first_text(doc: &Html, candidates: &[&str]) -> Result<Option<String>, AcquireError> {
    for candidate in candidates {
        let sel = parse_selector(candidate)?;
        for el in doc.select(&sel) {
            let text = if el.value().name() == "meta" {
                el.value().attr("content").unwrap_or_default().to_string()
            } else {
                el.text().collect::<String>()
            };
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }
    Ok(None)
}

fn time_datetime(doc: &Html) -> Result<Option<DateTime<FixedOffset>>, AcquireError> {
    let sel = parse_selector("time[datetime]")?;
    Ok(doc
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_timestamp))
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s.trim()).ok()
}

fn find_body(doc: &Html) -> Result<Option<ElementRef<'_>>, AcquireError> {
    for candidate in BODY_SELECTORS {
        let sel = parse_selector(candidate)?;
        if let Some(el) = doc.select(&sel).next() {
            return Ok(Some(el));
        }
    }
    Ok(None)
}

fn collect_images(container: ElementRef<'_>) -> Result<Vec<String>, AcquireError> {
    let sel = parse_selector("img")?;
    Ok(container
        .select(&sel)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(String::from)
        .collect())
}

/// First JSON-LD object on the page, if any parses.
fn json_ld_article(doc: &Html) -> Result<Option<serde_json::Value>, AcquireError> {
    let sel = parse_selector(r#"script[type="application/ld+json"]"#)?;
    for script in doc.select(&sel) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<serde_json::Value>(raw.trim()) {
            Ok(serde_json::Value::Array(items)) => {
                if let Some(obj) = items.into_iter().find(|v| v.is_object()) {
                    return Ok(Some(obj));
                }
            }
            Ok(v @ serde_json::Value::Object(_)) => return Ok(Some(v)),
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring unparseable JSON-LD: {}", e),
        }
    }
    Ok(None)
}

/// `author` may be a string, an object with `name`, or an array of either.
fn json_ld_author(v: &serde_json::Value) -> Option<String> {
    fn name_of(a: &serde_json::Value) -> Option<String> {
        match a {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(_) => a.get("name").and_then(|n| n.as_str()).map(String::from),
            serde_json::Value::Array(items) => items.iter().find_map(name_of),
            _ => None,
        }
    }
    v.get("author")
        .and_then(name_of)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Subdomain of the article host, e.g. "example" for example.substack.com.
fn author_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .and_then(|host| host.split('.').next().map(String::from))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Last path segment (the post slug), else the host.
fn title_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "Untitled".to_string();
    };
    parsed
        .path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(String::from))
        .or_else(|| parsed.host_str().map(String::from))
        .unwrap_or_else(|| "Untitled".to_string())
}
