//! Re-serializes scraped HTML as well-formed XHTML and points `img` elements at embedded copies.

use scraper::{ElementRef, Html, Node};
use std::collections::HashMap;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "iframe", "form", "button", "input", "svg", "source", "template",
];

/// Attributes dropped from `img` once it points at an embedded copy.
const RESPONSIVE_IMG_ATTRS: &[&str] = &["srcset", "sizes", "data-attrs"];

/// Where an embedded image lives inside the output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Relative path inside an EPUB.
    Href(String),
    /// 1-based image record index inside a MOBI file.
    RecIndex(usize),
}

/// Per-URL queue of targets, consumed in document order so that each `img`
/// occurrence maps to its own download.
#[derive(Debug, Default)]
pub struct ImageLinks {
    by_url: HashMap<String, (Vec<Option<ImageRef>>, usize)>,
}

impl ImageLinks {
    /// Register the next occurrence of `url`. `None` keeps the remote URL (failed download).
    pub fn push(&mut self, url: &str, target: Option<ImageRef>) {
        self.by_url
            .entry(url.to_string())
            .or_default()
            .0
            .push(target);
    }

    /// Target for the next occurrence of `src`. Extra occurrences reuse the last target.
    fn take_next(&mut self, src: &str) -> Option<ImageRef> {
        let (targets, cursor) = self.by_url.get_mut(src)?;
        let idx = (*cursor).min(targets.len().checked_sub(1)?);
        *cursor += 1;
        targets[idx].clone()
    }
}

/// Parse `fragment` as HTML and write it back as XHTML. Scripts, forms, inline SVG and
/// similar are dropped; comments are removed.
pub fn to_xhtml(fragment: &str, links: &mut ImageLinks) -> String {
    let doc = Html::parse_fragment(fragment);
    let mut out = String::with_capacity(fragment.len());
    write_children(doc.root_element(), links, &mut out);
    out
}

fn write_children(el: ElementRef<'_>, links: &mut ImageLinks, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_element(child_el, links, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(el: ElementRef<'_>, links: &mut ImageLinks, out: &mut String) {
    let name = el.value().name();
    if DROPPED_ELEMENTS.contains(&name) {
        return;
    }
    // Prefixed tags such as Word's `<o:p>` have no namespace binding here; keep their content only.
    if !is_xml_name(name) {
        write_children(el, links, out);
        return;
    }

    let target = if name == "img" {
        el.value()
            .attr("src")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|src| links.take_next(src))
    } else {
        None
    };

    out.push('<');
    out.push_str(name);
    for (attr, value) in el.value().attrs() {
        if !is_xml_name(attr) {
            continue;
        }
        if let Some(t) = &target {
            if RESPONSIVE_IMG_ATTRS.contains(&attr) {
                continue;
            }
            if attr == "src" {
                match t {
                    ImageRef::Href(href) => {
                        out.push_str(&format!(r#" src="{}""#, escape_attr(href)));
                    }
                    ImageRef::RecIndex(n) => {
                        out.push_str(&format!(r#" recindex="{:05}""#, n));
                    }
                }
                continue;
            }
        }
        out.push_str(&format!(r#" {}="{}""#, attr, escape_attr(value)));
    }

    if VOID_ELEMENTS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');
    write_children(el, links, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Unprefixed names that are safe to emit in XHTML (html5ever accepts far more).
/// Namespace declarations are rejected too.
fn is_xml_name(name: &str) -> bool {
    if name.starts_with("xmlns") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Characters XML 1.0 does not allow in a document.
fn is_forbidden_in_xml(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}

fn escape(s: &str, quotes: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            // Vertical tab and form feed still separate words.
            c if is_forbidden_in_xml(c) && c.is_whitespace() => out.push(' '),
            c if is_forbidden_in_xml(c) => {}
            c => out.push(c),
        }
    }
    out
}

/// Escape text content and drop characters XML forbids.
pub fn escape_text(s: &str) -> String {
    escape(s, false)
}

/// Like [escape_text], also escaping double quotes.
pub fn escape_attr(s: &str) -> String {
    escape(s, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_elements_are_self_closed() {
        let out = to_xhtml("<p>a<br>b</p><hr>", &mut ImageLinks::default());
        assert_eq!(out, "<p>a<br/>b</p><hr/>");
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let out = to_xhtml(
            r#"<a href="/x?a=1&amp;b=2" title="say &quot;hi&quot;">Tom &amp; Jerry &lt;3</a>"#,
            &mut ImageLinks::default(),
        );
        assert!(out.starts_with("<a "));
        assert!(out.contains(r#"href="/x?a=1&amp;b=2""#));
        assert!(out.contains(r#"title="say &quot;hi&quot;""#));
        assert!(out.ends_with(">Tom &amp; Jerry &lt;3</a>"));
    }

    #[test]
    fn xml_forbidden_control_chars_are_removed() {
        let out = to_xhtml("<p>a\u{0B}b\u{0C}c\u{01}d\te</p>", &mut ImageLinks::default());
        assert_eq!(out, "<p>a b cd\te</p>");
        let out = to_xhtml("<a title=\"x\u{1F}y\">t</a>", &mut ImageLinks::default());
        assert_eq!(out, r#"<a title="xy">t</a>"#);
    }

    #[test]
    fn prefixed_names_and_namespace_declarations_are_dropped() {
        let out = to_xhtml(
            r#"<p xmlns:o="urn:schemas" xml:lang="en" class="x">Hi<o:p>there</o:p></p>"#,
            &mut ImageLinks::default(),
        );
        assert_eq!(out, r#"<p class="x">Hithere</p>"#);
    }

    #[test]
    fn scripts_and_comments_are_dropped() {
        let out = to_xhtml(
            "<p>keep</p><script>alert(1)</script><!-- note --><form><input></form>",
            &mut ImageLinks::default(),
        );
        assert_eq!(out, "<p>keep</p>");
    }

    #[test]
    fn img_src_rewritten_to_href() {
        let mut links = ImageLinks::default();
        links.push(
            "https://cdn/a.png",
            Some(ImageRef::Href("images/image-001.png".to_string())),
        );
        let out = to_xhtml(
            r#"<img src="https://cdn/a.png" srcset="https://cdn/a.png 2x" alt="A">"#,
            &mut links,
        );
        assert!(out.starts_with("<img "));
        assert!(out.contains(r#"src="images/image-001.png""#));
        assert!(out.contains(r#"alt="A""#));
        assert!(!out.contains("srcset"));
        assert!(out.ends_with("/>"));
    }

    #[test]
    fn img_src_rewritten_to_recindex() {
        let mut links = ImageLinks::default();
        links.push("https://cdn/a.png", Some(ImageRef::RecIndex(3)));
        let out = to_xhtml(r#"<img src="https://cdn/a.png">"#, &mut links);
        assert_eq!(out, r#"<img recindex="00003"/>"#);
    }

    #[test]
    fn failed_download_keeps_remote_src() {
        let mut links = ImageLinks::default();
        links.push("https://cdn/a.png", None);
        let out = to_xhtml(r#"<img src="https://cdn/a.png" srcset="x 2x">"#, &mut links);
        assert!(out.contains(r#"src="https://cdn/a.png""#));
        assert!(out.contains(r#"srcset="x 2x""#));
    }

    #[test]
    fn duplicate_urls_map_per_occurrence() {
        let mut links = ImageLinks::default();
        links.push("https://cdn/a.png", None);
        links.push(
            "https://cdn/a.png",
            Some(ImageRef::Href("images/image-001.png".to_string())),
        );
        let out = to_xhtml(
            r#"<img src="https://cdn/a.png"><img src="https://cdn/a.png">"#,
            &mut links,
        );
        assert_eq!(
            out,
            r#"<img src="https://cdn/a.png"/><img src="images/image-001.png"/>"#
        );
    }

    #[test]
    fn unknown_images_are_left_alone() {
        let out = to_xhtml(r#"<img src="https://cdn/z.png">"#, &mut ImageLinks::default());
        assert_eq!(out, r#"<img src="https://cdn/z.png"/>"#);
    }
}
